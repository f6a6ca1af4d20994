// src/runtime/vm.rs
//! Stack machine that executes generated rule programs
//!
//! Operator semantics come from [`ops`](super::ops), the same module the
//! interpreter uses, so both execution paths agree on every result.

use crate::compiler::bytecode::{Instruction, Program};
use crate::runtime::context::EvaluationContext;
use crate::runtime::ops;
use crate::{EvaluationError, Value};

pub struct VM;

impl VM {
    /// Execute a program. Returns the value left on top of the stack, if any.
    pub fn execute(
        program: &Program,
        ctx: &mut EvaluationContext,
    ) -> Result<Option<Value>, EvaluationError> {
        let bytecode = &program.instructions;
        let mut stack: Vec<Value> = Vec::with_capacity(16);
        let mut pc = 0; // Program counter

        while pc < bytecode.len() {
            match &bytecode[pc] {
                Instruction::Push(value) => stack.push(value.clone()),

                Instruction::Pop => {
                    pop(&mut stack)?;
                }

                Instruction::LoadField(name) => stack.push(ctx.field(name)),

                Instruction::LoadVariable(name) => {
                    let value = ctx
                        .binding(name)
                        .cloned()
                        .ok_or_else(|| EvaluationError::UnboundVariable(name.clone()))?;
                    stack.push(value);
                }

                Instruction::StoreVariable(name) => {
                    let value = pop(&mut stack)?;
                    ctx.bind(name.as_str(), value);
                }

                Instruction::GetField(field) => {
                    let object = pop(&mut stack)?;
                    stack.push(ops::field(&object, field));
                }

                Instruction::Index => {
                    let index = pop(&mut stack)?;
                    let object = pop(&mut stack)?;
                    stack.push(ops::index(&object, &index));
                }

                Instruction::MakeList(count) => {
                    let items = pop_n(&mut stack, *count)?;
                    stack.push(Value::List(items));
                }

                Instruction::MakeMap(keys) => {
                    let values = pop_n(&mut stack, keys.len())?;
                    let map = keys.iter().cloned().zip(values).collect();
                    stack.push(Value::Map(map));
                }

                Instruction::Arithmetic(op) => {
                    let right = pop(&mut stack)?;
                    let left = pop(&mut stack)?;
                    stack.push(ops::arithmetic(*op, &left, &right)?);
                }

                Instruction::Compare(op) => {
                    let right = pop(&mut stack)?;
                    let left = pop(&mut stack)?;
                    stack.push(Value::Boolean(ops::compare(*op, &left, &right)));
                }

                Instruction::Negate => {
                    let operand = pop(&mut stack)?;
                    stack.push(ops::negate(&operand)?);
                }

                Instruction::Not => {
                    let operand = pop(&mut stack)?;
                    stack.push(Value::Boolean(!ops::truthy(&operand, "NOT")?));
                }

                Instruction::AssertBoolean => {
                    let top = stack.last().ok_or(EvaluationError::StackUnderflow)?;
                    ops::truthy(top, "logical operator")?;
                }

                Instruction::Jump(target) => {
                    pc = *target;
                    continue;
                }

                Instruction::JumpIfFalse(target) => {
                    if !ops::truthy(&pop(&mut stack)?, "logical operator")? {
                        pc = *target;
                        continue;
                    }
                }

                Instruction::JumpIfTrue(target) => {
                    if ops::truthy(&pop(&mut stack)?, "logical operator")? {
                        pc = *target;
                        continue;
                    }
                }

                Instruction::Call { function, present } => {
                    let supplied = present.iter().filter(|p| **p).count();
                    let mut values = pop_n(&mut stack, supplied)?.into_iter();
                    let args = present
                        .iter()
                        .map(|p| if *p { values.next() } else { None })
                        .collect();

                    let function = program
                        .functions
                        .get(*function)
                        .ok_or(EvaluationError::StackUnderflow)?;
                    stack.push(function.call(args, ctx)?);
                }
            }

            pc += 1;
        }

        Ok(stack.pop())
    }
}

#[inline]
fn pop(stack: &mut Vec<Value>) -> Result<Value, EvaluationError> {
    stack.pop().ok_or(EvaluationError::StackUnderflow)
}

/// Pop `count` values, returned in push order
fn pop_n(stack: &mut Vec<Value>, count: usize) -> Result<Vec<Value>, EvaluationError> {
    if stack.len() < count {
        return Err(EvaluationError::StackUnderflow);
    }
    Ok(stack.split_off(stack.len() - count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::{ArithmeticOp, ComparisonOp};
    use crate::runtime::message::Message;

    fn run(instructions: Vec<Instruction>) -> Result<Option<Value>, EvaluationError> {
        let program = Program {
            instructions,
            functions: Vec::new(),
        };
        let mut ctx = EvaluationContext::new(Message::new().with_field("n", 4));
        VM::execute(&program, &mut ctx)
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let result = run(vec![
            Instruction::LoadField("n".into()),
            Instruction::Push(Value::Long(2)),
            Instruction::Arithmetic(ArithmeticOp::Mul),
            Instruction::Push(Value::Double(8.0)),
            Instruction::Compare(ComparisonOp::Eq),
        ]);
        assert_eq!(result, Ok(Some(Value::Boolean(true))));
    }

    #[test]
    fn test_containers() {
        let result = run(vec![
            Instruction::Push(Value::Long(1)),
            Instruction::Push(Value::Long(2)),
            Instruction::MakeList(2),
            Instruction::MakeMap(vec!["items".into()]),
            Instruction::GetField("items".into()),
            Instruction::Push(Value::Long(1)),
            Instruction::Index,
        ]);
        assert_eq!(result, Ok(Some(Value::Long(2))));
    }

    #[test]
    fn test_stack_underflow() {
        let result = run(vec![Instruction::Arithmetic(ArithmeticOp::Add)]);
        assert_eq!(result, Err(EvaluationError::StackUnderflow));
    }

    #[test]
    fn test_logical_operand_must_be_boolean() {
        let result = run(vec![
            Instruction::Push(Value::Long(1)),
            Instruction::JumpIfFalse(3),
        ]);
        assert!(matches!(result, Err(EvaluationError::TypeMismatch { .. })));
    }
}
