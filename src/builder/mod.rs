// src/builder/mod.rs
//! Structured rule editing: validate condition/action steps and generate
//! rule source from them

pub mod validators;

use crate::functions::FunctionRegistry;
use crate::parser::parse_rule;
use crate::parser::types::ValueType;
use crate::parser::ParseError;
use ahash::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use validators::{variable_reference, StepValidator, ValidationContext};

/// One condition or action: a function call with named parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleBuilderStep {
    pub function: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub negate: bool,
    #[serde(default, rename = "outputvariable", skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    fn keyword(self) -> &'static str {
        match self {
            LogicalOperator::And => "and",
            LogicalOperator::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleBuilder {
    #[serde(default)]
    pub conditions: Vec<RuleBuilderStep>,
    #[serde(default)]
    pub actions: Vec<RuleBuilderStep>,
    #[serde(default)]
    pub operator: LogicalOperator,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleBuilderDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub rule_builder: RuleBuilder,
    /// Generated source, set once the rule validates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSection {
    Condition,
    Action,
}

impl fmt::Display for StepSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepSection::Condition => write!(f, "condition"),
            StepSection::Action => write!(f, "action"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleBuilderError {
    #[error("{section} {index} is invalid: {reason}")]
    StepInvalid {
        section: StepSection,
        index: usize,
        reason: String,
    },

    #[error("generated rule does not parse: {0}")]
    Parse(ParseError),
}

pub struct RuleBuilderService {
    registry: Arc<FunctionRegistry>,
    condition_validators: Vec<Box<dyn StepValidator>>,
    action_validators: Vec<Box<dyn StepValidator>>,
}

impl fmt::Debug for RuleBuilderService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleBuilderService")
            .field("condition_validators", &self.condition_validators.len())
            .field("action_validators", &self.action_validators.len())
            .finish()
    }
}

impl RuleBuilderService {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            condition_validators: validators::condition_validators(),
            action_validators: validators::action_validators(),
        }
    }

    pub fn with_condition_validator(mut self, validator: Box<dyn StepValidator>) -> Self {
        self.condition_validators.push(validator);
        self
    }

    pub fn with_action_validator(mut self, validator: Box<dyn StepValidator>) -> Self {
        self.action_validators.push(validator);
        self
    }

    /// Run every validator and attach reasons to the failing steps. Source is
    /// generated and parsed only when all steps pass.
    pub fn validate(&self, mut dto: RuleBuilderDto) -> RuleBuilderDto {
        dto.errors.clear();
        dto.source = None;

        let mut step_failed = false;
        self.check_steps(&mut dto.rule_builder, |_, _, reason, step| {
            step.errors.push(reason);
            step_failed = true;
            true
        });

        if step_failed {
            return dto;
        }

        let source = self.generate_source(&dto);
        match parse_rule(&source, &self.registry) {
            Ok(_) => dto.source = Some(source),
            Err(errors) => {
                if let Some(first) = errors.first() {
                    dto.errors.push(first.to_string());
                }
            }
        }
        dto
    }

    /// Stop at the first failing validator or the parse error
    pub fn validate_and_fail_fast(
        &self,
        mut dto: RuleBuilderDto,
    ) -> Result<RuleBuilderDto, RuleBuilderError> {
        let mut failure = None;
        self.check_steps(&mut dto.rule_builder, |section, index, reason, _| {
            failure = Some(RuleBuilderError::StepInvalid {
                section,
                index,
                reason,
            });
            false
        });
        if let Some(err) = failure {
            return Err(err);
        }

        let source = self.generate_source(&dto);
        if let Err(errors) = parse_rule(&source, &self.registry) {
            if let Some(first) = errors.first() {
                return Err(RuleBuilderError::Parse(first.clone()));
            }
        }

        dto.errors.clear();
        dto.source = Some(source);
        Ok(dto)
    }

    /// Rule source for the DTO's steps, using named arguments throughout
    pub fn generate_source(&self, dto: &RuleBuilderDto) -> String {
        let builder = &dto.rule_builder;
        let mut source = format!("rule \"{}\"\nwhen\n", escape(&dto.title));

        if builder.conditions.is_empty() {
            source.push_str("    true\n");
        }
        for (idx, step) in builder.conditions.iter().enumerate() {
            source.push_str("    ");
            if idx > 0 {
                source.push_str(builder.operator.keyword());
                source.push(' ');
            }
            if step.negate {
                source.push_str("not ");
            }
            source.push_str(&call(step));
            source.push('\n');
        }

        source.push_str("then\n");
        for step in &builder.actions {
            source.push_str("    ");
            if let Some(variable) = &step.output_variable {
                let _ = write!(source, "let {} = ", variable);
            }
            source.push_str(&call(step));
            source.push_str(";\n");
        }
        source.push_str("end\n");
        source
    }

    /// Visit every failing validator in step order. The callback returns
    /// whether to keep going.
    fn check_steps<F>(&self, builder: &mut RuleBuilder, mut on_failure: F)
    where
        F: FnMut(StepSection, usize, String, &mut RuleBuilderStep) -> bool,
    {
        let mut variables: HashMap<String, ValueType> = HashMap::default();

        for step in builder.conditions.iter_mut().chain(builder.actions.iter_mut()) {
            step.errors.clear();
        }

        let no_variables = HashMap::default();
        for (index, step) in builder.conditions.iter_mut().enumerate() {
            let ctx = ValidationContext {
                registry: &self.registry,
                variables: &no_variables,
            };
            for validator in &self.condition_validators {
                if let Err(reason) = validator.validate(step, &ctx) {
                    if !on_failure(StepSection::Condition, index, reason, step) {
                        return;
                    }
                }
            }
        }

        for (index, step) in builder.actions.iter_mut().enumerate() {
            let ctx = ValidationContext {
                registry: &self.registry,
                variables: &variables,
            };
            let mut failures = Vec::new();
            for validator in &self.action_validators {
                if let Err(reason) = validator.validate(step, &ctx) {
                    failures.push(reason);
                }
            }
            for reason in failures {
                if !on_failure(StepSection::Action, index, reason, step) {
                    return;
                }
            }

            if let Some(name) = &step.output_variable {
                let ty = self
                    .registry
                    .resolve(&step.function)
                    .map_or(ValueType::Object, |f| f.descriptor().return_type());
                variables.entry(name.clone()).or_insert(ty);
            }
        }
    }
}

fn call(step: &RuleBuilderStep) -> String {
    let args: Vec<String> = step
        .parameters
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| format!("{}: {}", name, literal(value)))
        .collect();
    format!("{}({})", step.function, args.join(", "))
}

fn literal(value: &serde_json::Value) -> String {
    if let Some(variable) = variable_reference(value) {
        return variable.to_string();
    }

    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => {
                let f = n.as_f64().unwrap_or_default();
                let text = format!("{:?}", f);
                if text.contains(['.', 'e', 'E']) {
                    text
                } else {
                    format!("{}.0", text)
                }
            }
        },
        serde_json::Value::String(s) => format!("\"{}\"", escape(s)),
        serde_json::Value::Array(items) => {
            let items: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", items.join(", "))
        }
        serde_json::Value::Object(entries) => {
            let entries: Vec<String> = entries
                .iter()
                .map(|(key, value)| format!("\"{}\": {}", escape(key), literal(value)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> RuleBuilderService {
        RuleBuilderService::new(Arc::new(FunctionRegistry::with_builtins()))
    }

    #[test]
    fn test_generate_source() {
        let dto: RuleBuilderDto = serde_json::from_value(json!({
            "title": "tag \"admins\"",
            "rule_builder": {
                "operator": "OR",
                "conditions": [
                    {"function": "has_field", "parameters": {"field": "admin"}},
                    {"function": "has_field", "parameters": {"field": "root"}, "negate": true}
                ],
                "actions": [
                    {"function": "to_string", "parameters": {"value": 1.5}, "outputvariable": "s"},
                    {"function": "set_field", "parameters": {"field": "tag", "value": "$s"}}
                ]
            }
        }))
        .unwrap();

        let source = service().generate_source(&dto);
        assert_eq!(
            source,
            "rule \"tag \\\"admins\\\"\"\nwhen\n    has_field(field: \"admin\")\n    or not has_field(field: \"root\")\nthen\n    let s = to_string(value: 1.5);\n    set_field(field: \"tag\", value: s);\nend\n"
        );
    }

    #[test]
    fn test_empty_conditions_generate_true() {
        let dto = RuleBuilderDto {
            title: "always".to_string(),
            ..RuleBuilderDto::default()
        };
        let validated = service().validate(dto);
        assert!(validated.errors.is_empty());
        assert!(validated.source.unwrap().contains("when\n    true\n"));
    }

    #[test]
    fn test_literal_numbers() {
        assert_eq!(literal(&json!(3)), "3");
        assert_eq!(literal(&json!(2.0)), "2.0");
        assert_eq!(literal(&json!([1, "a"])), "[1, \"a\"]");
    }
}
