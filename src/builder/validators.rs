// src/builder/validators.rs
//! Per-step checks for rule builder conditions and actions

use crate::builder::RuleBuilderStep;
use crate::functions::FunctionRegistry;
use crate::parser::types::ValueType;
use ahash::HashMap;

/// What a validator can see besides the step itself
pub struct ValidationContext<'a> {
    pub registry: &'a FunctionRegistry,
    /// Output variables defined by earlier actions, with their types
    pub variables: &'a HashMap<String, ValueType>,
}

pub trait StepValidator: Send + Sync {
    /// Returns the reason the step is invalid
    fn validate(&self, step: &RuleBuilderStep, ctx: &ValidationContext<'_>) -> Result<(), String>;
}

/// Name of the variable a parameter value references, if any
pub fn variable_reference(value: &serde_json::Value) -> Option<&str> {
    value.as_str().and_then(|s| s.strip_prefix('$'))
}

/// Type a JSON parameter value would have as a literal
pub fn literal_type(value: &serde_json::Value) -> Option<ValueType> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(_) => Some(ValueType::Boolean),
        serde_json::Value::Number(n) if n.is_i64() => Some(ValueType::Long),
        serde_json::Value::Number(_) => Some(ValueType::Double),
        serde_json::Value::String(_) => Some(ValueType::String),
        serde_json::Value::Array(_) => Some(ValueType::List),
        serde_json::Value::Object(_) => Some(ValueType::Map),
    }
}

pub struct FunctionExists;

impl StepValidator for FunctionExists {
    fn validate(&self, step: &RuleBuilderStep, ctx: &ValidationContext<'_>) -> Result<(), String> {
        if ctx.registry.contains(&step.function) {
            Ok(())
        } else {
            Err(format!("function '{}' does not exist", step.function))
        }
    }
}

pub struct ConditionReturnsBoolean;

impl StepValidator for ConditionReturnsBoolean {
    fn validate(&self, step: &RuleBuilderStep, ctx: &ValidationContext<'_>) -> Result<(), String> {
        let Some(function) = ctx.registry.resolve(&step.function) else {
            return Ok(());
        };
        let return_type = function.descriptor().return_type();
        if return_type == ValueType::Boolean {
            Ok(())
        } else {
            Err(format!(
                "function '{}' returns {} and cannot be used as a condition",
                step.function, return_type
            ))
        }
    }
}

pub struct KnownParameters;

impl StepValidator for KnownParameters {
    fn validate(&self, step: &RuleBuilderStep, ctx: &ValidationContext<'_>) -> Result<(), String> {
        let Some(function) = ctx.registry.resolve(&step.function) else {
            return Ok(());
        };
        match step
            .parameters
            .keys()
            .find(|name| function.descriptor().param_index(name).is_none())
        {
            Some(name) => Err(format!(
                "function '{}' has no parameter '{}'",
                step.function, name
            )),
            None => Ok(()),
        }
    }
}

pub struct RequiredParametersPresent;

impl StepValidator for RequiredParametersPresent {
    fn validate(&self, step: &RuleBuilderStep, ctx: &ValidationContext<'_>) -> Result<(), String> {
        let Some(function) = ctx.registry.resolve(&step.function) else {
            return Ok(());
        };
        for param in function.descriptor().params() {
            let supplied = step
                .parameters
                .get(param.name())
                .is_some_and(|value| !value.is_null());
            if !param.is_optional() && !supplied {
                return Err(format!(
                    "missing required parameter '{}' of function '{}'",
                    param.name(),
                    step.function
                ));
            }
        }
        Ok(())
    }
}

/// Literal and variable arguments must fit the declared parameter type
pub struct ParameterTypes;

impl StepValidator for ParameterTypes {
    fn validate(&self, step: &RuleBuilderStep, ctx: &ValidationContext<'_>) -> Result<(), String> {
        let Some(function) = ctx.registry.resolve(&step.function) else {
            return Ok(());
        };
        for param in function.descriptor().params() {
            let Some(value) = step.parameters.get(param.name()) else {
                continue;
            };
            let actual = match variable_reference(value) {
                Some(name) => ctx.variables.get(name).copied(),
                None => literal_type(value),
            };
            if let Some(actual) = actual {
                if !actual.is_assignable_to(param.value_type()) {
                    return Err(format!(
                        "parameter '{}' of function '{}' expects {}, got {}",
                        param.name(),
                        step.function,
                        param.value_type(),
                        actual
                    ));
                }
            }
        }
        Ok(())
    }
}

pub struct VariablesDefined;

impl StepValidator for VariablesDefined {
    fn validate(&self, step: &RuleBuilderStep, ctx: &ValidationContext<'_>) -> Result<(), String> {
        for value in step.parameters.values() {
            if let Some(name) = variable_reference(value) {
                if !ctx.variables.contains_key(name) {
                    return Err(format!("variable '{}' is not defined by a previous action", name));
                }
            }
        }
        Ok(())
    }
}

pub struct UniqueOutputVariable;

impl StepValidator for UniqueOutputVariable {
    fn validate(&self, step: &RuleBuilderStep, ctx: &ValidationContext<'_>) -> Result<(), String> {
        match &step.output_variable {
            Some(name) if ctx.variables.contains_key(name) => {
                Err(format!("output variable '{}' is already defined", name))
            }
            Some(name) if !is_identifier(name) => {
                Err(format!("output variable '{}' is not a valid identifier", name))
            }
            _ => Ok(()),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn condition_validators() -> Vec<Box<dyn StepValidator>> {
    vec![
        Box::new(FunctionExists),
        Box::new(ConditionReturnsBoolean),
        Box::new(KnownParameters),
        Box::new(RequiredParametersPresent),
        Box::new(VariablesDefined),
        Box::new(ParameterTypes),
    ]
}

pub fn action_validators() -> Vec<Box<dyn StepValidator>> {
    vec![
        Box::new(FunctionExists),
        Box::new(KnownParameters),
        Box::new(RequiredParametersPresent),
        Box::new(VariablesDefined),
        Box::new(ParameterTypes),
        Box::new(UniqueOutputVariable),
    ]
}
