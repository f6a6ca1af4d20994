// src/compiler/bytecode.rs
//! Bytecode instructions for the rule VM

use crate::functions::RegisteredFunction;
use crate::parser::ast::{ArithmeticOp, ComparisonOp};
use crate::Value;
use std::sync::Arc;

/// Bytecode instructions executed by the VM
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // Stack operations
    Push(Value),
    Pop,

    // Variable access
    LoadField(String),
    LoadVariable(String),
    StoreVariable(String),

    // Container access
    GetField(String),
    Index,
    MakeList(usize),
    MakeMap(Vec<String>),

    // Operators
    Arithmetic(ArithmeticOp),
    Compare(ComparisonOp),
    Negate,
    Not,
    /// Fails unless the top of the stack is a Boolean; leaves it in place
    AssertBoolean,

    // Control flow; targets are label ids until resolved, then indices
    Jump(usize),
    /// Pops a Boolean and jumps when it is false
    JumpIfFalse(usize),
    /// Pops a Boolean and jumps when it is true
    JumpIfTrue(usize),

    /// Call the program's function `function`. One value was pushed per
    /// `true` slot in `present`, in parameter order.
    Call { function: usize, present: Vec<bool> },
}

impl Instruction {
    /// Target of a jump instruction, `None` for everything else
    pub(crate) fn jump_target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Instruction::Jump(target)
            | Instruction::JumpIfFalse(target)
            | Instruction::JumpIfTrue(target) => Some(target),
            _ => None,
        }
    }
}

/// Instructions plus the functions they call
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub functions: Vec<Arc<RegisteredFunction>>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
