// src/runtime/interpreter.rs
//! Tree-walking evaluator for parsed rules

use super::context::EvaluationContext;
use super::ops;
use crate::parser::ast::{Expression, FunctionCall, LogicalOp, Rule, Statement};
use crate::{EvaluationError, Value};

pub struct Interpreter;

impl Interpreter {
    /// Evaluate the rule's `when` expression
    pub fn evaluate_condition(
        rule: &Rule,
        ctx: &mut EvaluationContext,
    ) -> Result<bool, EvaluationError> {
        let value = Self::evaluate(&rule.when, ctx)?;
        ops::truthy(&value, "rule condition")
    }

    /// Run the rule's `then` statements in order. The first failing
    /// statement aborts the rest of this rule.
    pub fn execute(rule: &Rule, ctx: &mut EvaluationContext) -> Result<(), EvaluationError> {
        ctx.clear_bindings();
        for statement in &rule.then {
            Self::execute_statement(statement, ctx)?;
        }
        Ok(())
    }

    /// Condition, then actions if it matched. Returns whether it matched.
    pub fn run(rule: &Rule, ctx: &mut EvaluationContext) -> Result<bool, EvaluationError> {
        let matched = Self::evaluate_condition(rule, ctx)?;
        if matched {
            Self::execute(rule, ctx)?;
        }
        Ok(matched)
    }

    fn execute_statement(
        statement: &Statement,
        ctx: &mut EvaluationContext,
    ) -> Result<(), EvaluationError> {
        match statement {
            Statement::Call(call) => {
                Self::call(call, ctx)?;
            }
            Statement::Let { name, value } => {
                let value = Self::evaluate(value, ctx)?;
                ctx.bind(name.as_str(), value);
            }
        }
        Ok(())
    }

    pub fn evaluate(expr: &Expression, ctx: &mut EvaluationContext) -> Result<Value, EvaluationError> {
        match expr {
            Expression::Long(n) => Ok(Value::Long(*n)),
            Expression::Double(f) => Ok(Value::Double(*f)),
            Expression::String(s) => Ok(Value::String(s.clone())),
            Expression::Boolean(b) => Ok(Value::Boolean(*b)),

            Expression::List(items) => {
                let values = items
                    .iter()
                    .map(|item| Self::evaluate(item, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(values))
            }

            Expression::Map(entries) => {
                let mut map = ahash::HashMap::default();
                for (key, value) in entries {
                    map.insert(key.clone(), Self::evaluate(value, ctx)?);
                }
                Ok(Value::Map(map))
            }

            Expression::MessageField(name) => Ok(ctx.field(name)),

            Expression::Variable { name, .. } => ctx
                .binding(name)
                .cloned()
                .ok_or_else(|| EvaluationError::UnboundVariable(name.clone())),

            Expression::FieldAccess { object, field } => {
                let object = Self::evaluate(object, ctx)?;
                Ok(ops::field(&object, field))
            }

            Expression::Index { object, index } => {
                let object = Self::evaluate(object, ctx)?;
                let index = Self::evaluate(index, ctx)?;
                Ok(ops::index(&object, &index))
            }

            Expression::Call(call) => Self::call(call, ctx),

            Expression::Logical { op, left, right } => {
                let left = ops::truthy(&Self::evaluate(left, ctx)?, "logical operator")?;
                let short_circuit = match op {
                    LogicalOp::And => !left,
                    LogicalOp::Or => left,
                };
                if short_circuit {
                    return Ok(Value::Boolean(left));
                }
                let right = ops::truthy(&Self::evaluate(right, ctx)?, "logical operator")?;
                Ok(Value::Boolean(right))
            }

            Expression::Not(operand) => {
                let value = ops::truthy(&Self::evaluate(operand, ctx)?, "NOT")?;
                Ok(Value::Boolean(!value))
            }

            Expression::Comparison { op, left, right } => {
                let left = Self::evaluate(left, ctx)?;
                let right = Self::evaluate(right, ctx)?;
                Ok(Value::Boolean(ops::compare(*op, &left, &right)))
            }

            Expression::Arithmetic { op, left, right, .. } => {
                let left = Self::evaluate(left, ctx)?;
                let right = Self::evaluate(right, ctx)?;
                ops::arithmetic(*op, &left, &right)
            }

            Expression::Negate(operand) => ops::negate(&Self::evaluate(operand, ctx)?),
        }
    }

    fn call(call: &FunctionCall, ctx: &mut EvaluationContext) -> Result<Value, EvaluationError> {
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let value = match arg {
                Some(expr) => Some(Self::evaluate(expr, ctx)?),
                None => None,
            };
            args.push(value);
        }
        call.function.call(args, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::parser::parse_rule;
    use crate::runtime::message::Message;

    fn rule(source: &str) -> Rule {
        parse_rule(source, &FunctionRegistry::with_builtins()).unwrap()
    }

    #[test]
    fn test_has_field_set_field() {
        let rule = rule(r#"rule "r1" when has_field("user") then set_field("greeting", "hi"); end"#);

        let mut ctx = EvaluationContext::new(Message::new().with_field("user", "bob"));
        assert!(Interpreter::run(&rule, &mut ctx).unwrap());
        assert_eq!(ctx.field("greeting"), Value::from("hi"));

        let mut ctx = EvaluationContext::new(Message::new());
        assert!(!Interpreter::run(&rule, &mut ctx).unwrap());
        assert!(ctx.message().fields.is_empty());
    }

    #[test]
    fn test_short_circuit_skips_failing_operand() {
        let rule = rule(r#"rule "s" when false AND 1 / 0 == 1 then end"#);
        let mut ctx = EvaluationContext::new(Message::new());
        assert_eq!(Interpreter::evaluate_condition(&rule, &mut ctx), Ok(false));

        let rule = self::rule(r#"rule "s" when true OR 1 / 0 == 1 then end"#);
        assert_eq!(Interpreter::evaluate_condition(&rule, &mut ctx), Ok(true));
    }

    #[test]
    fn test_failing_statement_stops_the_rule() {
        let rule = rule(
            r#"rule "f"
when true
then
  set_field("before", 1);
  set_field("ratio", 10 / to_long($message.zero));
  set_field("after", 1);
end"#,
        );
        let mut ctx = EvaluationContext::new(Message::new().with_field("zero", 0));

        assert_eq!(
            Interpreter::execute(&rule, &mut ctx),
            Err(EvaluationError::DivisionByZero)
        );
        assert!(ctx.message().has_field("before"));
        assert!(!ctx.message().has_field("after"));
    }

    #[test]
    fn test_empty_field_name_is_rejected() {
        let rule = rule(r#"rule "n" when true then set_field(to_string($message.missing), "x"); end"#);
        let mut ctx = EvaluationContext::new(Message::new());
        assert!(matches!(
            Interpreter::execute(&rule, &mut ctx),
            Err(EvaluationError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_let_bindings_and_map_access() {
        let rule = rule(
            r#"rule "l"
when true
then
  let parsed = regex("(\\w+)@(\\w+)", to_string($message.email));
  set_field("user", parsed["0"]);
  set_field("domain", parsed["1"]);
end"#,
        );
        let mut ctx = EvaluationContext::new(Message::new().with_field("email", "bob@example"));
        Interpreter::execute(&rule, &mut ctx).unwrap();

        assert_eq!(ctx.field("user"), Value::from("bob"));
        assert_eq!(ctx.field("domain"), Value::from("example"));
    }

    #[test]
    fn test_mixed_arithmetic() {
        let rule = rule(r#"rule "m" when 7 / 2 == 3 AND 7 / 2.0 == 3.5 AND -(2 - 5) % 2 == 1 then end"#);
        let mut ctx = EvaluationContext::new(Message::new());
        assert_eq!(Interpreter::evaluate_condition(&rule, &mut ctx), Ok(true));
    }
}
