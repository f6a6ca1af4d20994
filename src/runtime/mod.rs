// src/runtime/mod.rs
//! Runtime components: values, messages, evaluation and the bytecode VM

pub mod context;
pub mod interpreter;
pub mod message;
pub mod ops;
pub mod value;
pub mod vm;

pub use context::{EvaluationContext, RuleError};
pub use interpreter::Interpreter;
pub use message::Message;
pub use value::Value;
pub use vm::VM;
