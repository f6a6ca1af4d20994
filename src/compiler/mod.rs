// src/compiler/mod.rs
//! Compiled execution path: AST to bytecode, with interpreter fallback

pub mod bytecode;
pub mod codegen;
pub mod executable;

pub use bytecode::{Instruction, Program};
pub use codegen::{CodeGenerator, CodegenError};
pub use executable::{CompiledRule, ExecutionMode, GeneratedRule, InterpretedRule, RuleCompiler};
