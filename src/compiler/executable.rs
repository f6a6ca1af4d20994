// src/compiler/executable.rs
//! Executable forms of a parsed rule

use crate::compiler::bytecode::Program;
use crate::compiler::codegen::{CodeGenerator, CodegenError};
use crate::config::CodegenConfig;
use crate::parser::ast::Rule;
use crate::runtime::context::EvaluationContext;
use crate::runtime::interpreter::Interpreter;
use crate::runtime::ops;
use crate::runtime::vm::VM;
use crate::EvaluationError;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which execution path a compiled rule uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Interpreted,
    Generated,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Interpreted => write!(f, "interpreted"),
            ExecutionMode::Generated => write!(f, "generated"),
        }
    }
}

/// A rule ready to run. Callers do not depend on which form backs it.
pub trait CompiledRule: Send + Sync + fmt::Debug {
    fn rule(&self) -> &Rule;

    fn evaluate_condition(&self, ctx: &mut EvaluationContext) -> Result<bool, EvaluationError>;

    /// Run the actions with fresh `let` bindings
    fn execute(&self, ctx: &mut EvaluationContext) -> Result<(), EvaluationError>;

    fn execution_mode(&self) -> ExecutionMode;

    fn id(&self) -> &str {
        &self.rule().id
    }
}

/// Walks the AST on every evaluation
#[derive(Debug)]
pub struct InterpretedRule {
    rule: Arc<Rule>,
}

impl InterpretedRule {
    pub fn new(rule: Arc<Rule>) -> Self {
        Self { rule }
    }
}

impl CompiledRule for InterpretedRule {
    fn rule(&self) -> &Rule {
        &self.rule
    }

    fn evaluate_condition(&self, ctx: &mut EvaluationContext) -> Result<bool, EvaluationError> {
        Interpreter::evaluate_condition(&self.rule, ctx)
    }

    fn execute(&self, ctx: &mut EvaluationContext) -> Result<(), EvaluationError> {
        Interpreter::execute(&self.rule, ctx)
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Interpreted
    }
}

/// Runs bytecode generated from the AST, one program per entry point
#[derive(Debug)]
pub struct GeneratedRule {
    rule: Arc<Rule>,
    when: Program,
    then: Program,
}

impl GeneratedRule {
    pub fn generate(rule: Arc<Rule>, max_instructions: usize) -> Result<Self, CodegenError> {
        let when = CodeGenerator::generate_condition(&rule, max_instructions)?;
        let then = CodeGenerator::generate_actions(&rule, max_instructions)?;
        Ok(Self { rule, when, then })
    }

    pub fn condition_program(&self) -> &Program {
        &self.when
    }

    pub fn action_program(&self) -> &Program {
        &self.then
    }
}

impl CompiledRule for GeneratedRule {
    fn rule(&self) -> &Rule {
        &self.rule
    }

    fn evaluate_condition(&self, ctx: &mut EvaluationContext) -> Result<bool, EvaluationError> {
        let value = VM::execute(&self.when, ctx)?.ok_or(EvaluationError::StackUnderflow)?;
        ops::truthy(&value, "rule condition")
    }

    fn execute(&self, ctx: &mut EvaluationContext) -> Result<(), EvaluationError> {
        ctx.clear_bindings();
        VM::execute(&self.then, ctx)?;
        Ok(())
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Generated
    }
}

/// Chooses the execution form for each parsed rule
#[derive(Debug, Clone, Default)]
pub struct RuleCompiler {
    config: CodegenConfig,
}

impl RuleCompiler {
    pub fn new(config: CodegenConfig) -> Self {
        Self { config }
    }

    /// Generated form when enabled and generation succeeds, otherwise the
    /// interpreter. Generation failures are logged and never surfaced.
    pub fn compile(&self, rule: Arc<Rule>) -> Arc<dyn CompiledRule> {
        if !self.config.enabled {
            return Arc::new(InterpretedRule::new(rule));
        }

        match GeneratedRule::generate(Arc::clone(&rule), self.config.max_instructions) {
            Ok(generated) => {
                debug!(
                    rule = %rule.id,
                    condition_len = generated.when.len(),
                    action_len = generated.then.len(),
                    "generated bytecode for rule"
                );
                Arc::new(generated)
            }
            Err(err) => {
                warn!(rule = %rule.id, error = %err, "code generation failed, interpreting rule");
                Arc::new(InterpretedRule::new(rule))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::parser::parse_rule;
    use crate::runtime::message::Message;
    use crate::Value;

    fn rule(source: &str) -> Arc<Rule> {
        Arc::new(parse_rule(source, &FunctionRegistry::with_builtins()).unwrap())
    }

    #[test]
    fn test_generated_rule_runs() {
        let compiler = RuleCompiler::default();
        let compiled = compiler.compile(rule(
            r#"rule "g" when to_long($message.n) > 3 then set_field("big", true); end"#,
        ));
        assert_eq!(compiled.execution_mode(), ExecutionMode::Generated);

        let mut ctx = EvaluationContext::new(Message::new().with_field("n", 4));
        assert_eq!(compiled.evaluate_condition(&mut ctx), Ok(true));
        compiled.execute(&mut ctx).unwrap();
        assert_eq!(ctx.field("big"), Value::Boolean(true));
    }

    #[test]
    fn test_fallback_to_interpreter() {
        let compiler = RuleCompiler::new(CodegenConfig {
            enabled: true,
            max_instructions: 2,
        });
        let compiled = compiler.compile(rule(
            r#"rule "big" when 1 + 2 + 3 == 6 then set_field("ok", true); end"#,
        ));
        assert_eq!(compiled.execution_mode(), ExecutionMode::Interpreted);

        let mut ctx = EvaluationContext::new(Message::new());
        assert_eq!(compiled.evaluate_condition(&mut ctx), Ok(true));
    }

    #[test]
    fn test_codegen_disabled() {
        let compiler = RuleCompiler::new(CodegenConfig {
            enabled: false,
            ..CodegenConfig::default()
        });
        let compiled = compiler.compile(rule(r#"rule "d" when true then end"#));
        assert_eq!(compiled.execution_mode(), ExecutionMode::Interpreted);
        assert_eq!(compiled.id(), "d");
    }
}
