// src/runtime/context.rs
//! Per-message evaluation state

use crate::runtime::message::Message;
use crate::{EvaluationError, Value};
use ahash::HashMap;
use thiserror::Error;

/// Evaluation failure attributed to the rule that raised it
#[derive(Error, Debug, Clone, PartialEq)]
#[error("rule '{rule_id}': {error}")]
pub struct RuleError {
    pub rule_id: String,
    pub error: EvaluationError,
}

/// Mutable state for evaluating rules against one message.
///
/// Owned by a single processing call and dropped when that message is done.
#[derive(Debug)]
pub struct EvaluationContext {
    /// Message being processed (rules mutate it in place)
    message: Message,

    /// `let` bindings of the rule currently executing
    bindings: HashMap<String, Value>,

    /// Errors raised while evaluating or executing rules
    errors: Vec<RuleError>,
}

impl EvaluationContext {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            bindings: HashMap::default(),
            errors: Vec::new(),
        }
    }

    #[inline]
    pub fn message(&self) -> &Message {
        &self.message
    }

    #[inline]
    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    /// Field of the current message, `Null` when absent
    #[inline]
    pub fn field(&self, name: &str) -> Value {
        self.message.field(name).cloned().unwrap_or(Value::Null)
    }

    #[inline]
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    #[inline]
    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Drop all `let` bindings; called before each rule's actions run
    pub fn clear_bindings(&mut self) {
        self.bindings.clear();
    }

    pub fn add_error(&mut self, rule_id: &str, error: EvaluationError) {
        self.errors.push(RuleError {
            rule_id: rule_id.to_string(),
            error,
        });
    }

    pub fn errors(&self) -> &[RuleError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn into_parts(self) -> (Message, Vec<RuleError>) {
        (self.message, self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings() {
        let mut ctx = EvaluationContext::new(Message::new());

        ctx.bind("x", Value::Long(5));
        assert_eq!(ctx.binding("x"), Some(&Value::Long(5)));

        ctx.clear_bindings();
        assert_eq!(ctx.binding("x"), None);
    }

    #[test]
    fn test_field_access() {
        let mut ctx = EvaluationContext::new(Message::new().with_field("count", 5));

        assert_eq!(ctx.field("count"), Value::Long(5));
        assert_eq!(ctx.field("missing"), Value::Null);

        ctx.message_mut().set_field("count", Value::Long(6));
        ctx.add_error("r1", EvaluationError::DivisionByZero);
        let (message, errors) = ctx.into_parts();
        assert_eq!(message.field("count"), Some(&Value::Long(6)));
        assert_eq!(errors[0].to_string(), "rule 'r1': division by zero");
    }
}
