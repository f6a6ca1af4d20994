// src/compiler/codegen.rs
//! Translates checked rule ASTs into bytecode programs

use crate::compiler::bytecode::{Instruction, Program};
use crate::functions::RegisteredFunction;
use crate::parser::ast::*;
use crate::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodegenError {
    #[error("program has {actual} instructions, the limit is {limit}")]
    ProgramTooLarge { limit: usize, actual: usize },

    #[error("jump to unplaced label {0}")]
    UnresolvedLabel(usize),
}

pub struct CodeGenerator {
    instructions: Vec<Instruction>,
    functions: Vec<Arc<RegisteredFunction>>,
    label_counter: usize,
    labels: Vec<(usize, usize)>, // (label_id, instruction_index)
    max_instructions: usize,
}

impl CodeGenerator {
    fn new(max_instructions: usize) -> Self {
        Self {
            instructions: Vec::new(),
            functions: Vec::new(),
            label_counter: 0,
            labels: Vec::new(),
            max_instructions,
        }
    }

    /// Program that leaves the condition's value on the stack
    pub fn generate_condition(
        rule: &Rule,
        max_instructions: usize,
    ) -> Result<Program, CodegenError> {
        let mut generator = CodeGenerator::new(max_instructions);
        generator.compile_expression(&rule.when)?;
        generator.finish()
    }

    /// Program that runs the statements and leaves the stack empty
    pub fn generate_actions(
        rule: &Rule,
        max_instructions: usize,
    ) -> Result<Program, CodegenError> {
        let mut generator = CodeGenerator::new(max_instructions);
        for statement in &rule.then {
            generator.compile_statement(statement)?;
        }
        generator.finish()
    }

    fn compile_statement(&mut self, statement: &Statement) -> Result<(), CodegenError> {
        match statement {
            Statement::Call(call) => {
                self.compile_call(call)?;
                self.emit(Instruction::Pop)?;
            }
            Statement::Let { name, value } => {
                self.compile_expression(value)?;
                self.emit(Instruction::StoreVariable(name.clone()))?;
            }
        }
        Ok(())
    }

    fn compile_expression(&mut self, expr: &Expression) -> Result<(), CodegenError> {
        match expr {
            Expression::Long(n) => self.emit(Instruction::Push(Value::Long(*n))),
            Expression::Double(f) => self.emit(Instruction::Push(Value::Double(*f))),
            Expression::String(s) => self.emit(Instruction::Push(Value::String(s.clone()))),
            Expression::Boolean(b) => self.emit(Instruction::Push(Value::Boolean(*b))),

            Expression::List(items) => {
                for item in items {
                    self.compile_expression(item)?;
                }
                self.emit(Instruction::MakeList(items.len()))
            }

            Expression::Map(entries) => {
                for (_, value) in entries {
                    self.compile_expression(value)?;
                }
                let keys = entries.iter().map(|(key, _)| key.clone()).collect();
                self.emit(Instruction::MakeMap(keys))
            }

            Expression::MessageField(name) => self.emit(Instruction::LoadField(name.clone())),

            Expression::Variable { name, .. } => {
                self.emit(Instruction::LoadVariable(name.clone()))
            }

            Expression::FieldAccess { object, field } => {
                self.compile_expression(object)?;
                self.emit(Instruction::GetField(field.clone()))
            }

            Expression::Index { object, index } => {
                self.compile_expression(object)?;
                self.compile_expression(index)?;
                self.emit(Instruction::Index)
            }

            Expression::Call(call) => self.compile_call(call),

            Expression::Logical { op, left, right } => {
                let short_circuit = self.new_label();
                let end = self.new_label();

                self.compile_expression(left)?;
                match op {
                    LogicalOp::And => self.emit(Instruction::JumpIfFalse(short_circuit))?,
                    LogicalOp::Or => self.emit(Instruction::JumpIfTrue(short_circuit))?,
                }
                self.compile_expression(right)?;
                self.emit(Instruction::AssertBoolean)?;
                self.emit(Instruction::Jump(end))?;

                self.place_label(short_circuit);
                self.emit(Instruction::Push(Value::Boolean(*op == LogicalOp::Or)))?;
                self.place_label(end);
                Ok(())
            }

            Expression::Not(operand) => {
                self.compile_expression(operand)?;
                self.emit(Instruction::Not)
            }

            Expression::Comparison { op, left, right } => {
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                self.emit(Instruction::Compare(*op))
            }

            Expression::Arithmetic { op, left, right, .. } => {
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                self.emit(Instruction::Arithmetic(*op))
            }

            Expression::Negate(operand) => {
                self.compile_expression(operand)?;
                self.emit(Instruction::Negate)
            }
        }
    }

    fn compile_call(&mut self, call: &FunctionCall) -> Result<(), CodegenError> {
        for arg in call.args.iter().flatten() {
            self.compile_expression(arg)?;
        }

        let present = call.args.iter().map(Option::is_some).collect();
        let function = self.function_slot(&call.function);
        self.emit(Instruction::Call { function, present })
    }

    fn function_slot(&mut self, function: &Arc<RegisteredFunction>) -> usize {
        if let Some(idx) = self.functions.iter().position(|f| Arc::ptr_eq(f, function)) {
            return idx;
        }
        self.functions.push(Arc::clone(function));
        self.functions.len() - 1
    }

    fn emit(&mut self, instruction: Instruction) -> Result<(), CodegenError> {
        if self.instructions.len() >= self.max_instructions {
            return Err(CodegenError::ProgramTooLarge {
                limit: self.max_instructions,
                actual: self.instructions.len() + 1,
            });
        }
        self.instructions.push(instruction);
        Ok(())
    }

    fn new_label(&mut self) -> usize {
        let label = self.label_counter;
        self.label_counter += 1;
        label
    }

    fn place_label(&mut self, label: usize) {
        let position = self.instructions.len();
        self.labels.push((label, position));
    }

    /// Replace label ids with instruction indices
    fn finish(mut self) -> Result<Program, CodegenError> {
        for label in self.instructions.iter_mut().filter_map(Instruction::jump_target_mut) {
            let (_, position) = self
                .labels
                .iter()
                .find(|(id, _)| id == label)
                .ok_or(CodegenError::UnresolvedLabel(*label))?;
            *label = *position;
        }

        Ok(Program {
            instructions: self.instructions,
            functions: self.functions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::parser::parse_rule;

    fn rule(source: &str) -> Rule {
        parse_rule(source, &FunctionRegistry::with_builtins()).unwrap()
    }

    #[test]
    fn test_short_circuit_jumps_are_resolved() {
        let rule = rule(r#"rule "a" when true AND false then end"#);
        let program = CodeGenerator::generate_condition(&rule, 64).unwrap();

        assert_eq!(
            program.instructions,
            vec![
                Instruction::Push(Value::Boolean(true)),
                Instruction::JumpIfFalse(5),
                Instruction::Push(Value::Boolean(false)),
                Instruction::AssertBoolean,
                Instruction::Jump(6),
                Instruction::Push(Value::Boolean(false)),
            ]
        );
    }

    #[test]
    fn test_jump_targets_stay_in_bounds() {
        let rule = rule(
            r#"rule "j" when (true OR false) AND NOT (false AND true) then end"#,
        );
        let program = CodeGenerator::generate_condition(&rule, 64).unwrap();

        let mut instructions = program.instructions.clone();
        let targets: Vec<usize> = instructions
            .iter_mut()
            .filter_map(Instruction::jump_target_mut)
            .map(|target| *target)
            .collect();
        assert!(!targets.is_empty());
        assert!(targets.iter().all(|&target| target <= program.len()));
    }

    #[test]
    fn test_functions_are_deduplicated() {
        let rule = rule(
            r#"rule "f" when true then set_field("a", 1); set_field("b", 2); remove_field("c"); end"#,
        );
        let program = CodeGenerator::generate_actions(&rule, 64).unwrap();

        assert_eq!(program.functions.len(), 2);
        assert_eq!(
            program.instructions.last(),
            Some(&Instruction::Pop)
        );
    }

    #[test]
    fn test_optional_arguments_are_marked_absent() {
        let rule = rule(r#"rule "o" when to_long(value: "1") == 1 then end"#);
        let program = CodeGenerator::generate_condition(&rule, 64).unwrap();

        assert!(program.instructions.contains(&Instruction::Call {
            function: 0,
            present: vec![true, false],
        }));
    }

    #[test]
    fn test_instruction_limit() {
        let rule = rule(r#"rule "big" when 1 + 2 + 3 + 4 == 10 then end"#);
        let result = CodeGenerator::generate_condition(&rule, 4);

        assert!(matches!(
            result,
            Err(CodegenError::ProgramTooLarge { limit: 4, .. })
        ));
    }
}
