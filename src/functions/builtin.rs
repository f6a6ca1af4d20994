// src/functions/builtin.rs
//! Standard function library available to every rule

use super::{Function, FunctionArgs, FunctionDescriptor, ParameterDescriptor};
use crate::parser::types::ValueType;
use crate::runtime::context::EvaluationContext;
use crate::{EvaluationError, Value};
use ahash::HashMap;
use regex::Regex;
use std::sync::Arc;

type Builtin = (FunctionDescriptor, Arc<dyn Function>);

fn function<F>(descriptor: FunctionDescriptor, implementation: F) -> Builtin
where
    F: Fn(&FunctionArgs<'_>, &mut EvaluationContext) -> Result<Value, EvaluationError>
        + Send
        + Sync
        + 'static,
{
    (descriptor, Arc::new(implementation))
}

fn required(name: &str, ty: ValueType) -> ParameterDescriptor {
    ParameterDescriptor::required(name, ty)
}

fn optional(name: &str, ty: ValueType) -> ParameterDescriptor {
    ParameterDescriptor::optional(name, ty)
}

/// All built-in functions with their implementations
pub fn functions() -> Vec<Builtin> {
    let mut all = message_functions();
    all.extend(conversion_functions());
    all.extend(string_functions());
    all.extend(routing_functions());
    all
}

/// Add the built-in functions to an existing registry
pub fn register_builtins(registry: &mut super::FunctionRegistry) -> Result<(), super::RegistryError> {
    for (descriptor, implementation) in functions() {
        registry.register_function(descriptor, implementation)?;
    }
    Ok(())
}

fn field_name<'a>(args: &'a FunctionArgs<'_>, param: &str) -> Result<&'a str, EvaluationError> {
    let name = args.required_str(param)?;
    if name.is_empty() {
        return Err(EvaluationError::InvalidArgument {
            function: args.function_name().to_string(),
            param: param.to_string(),
            reason: "field name must not be empty".to_string(),
        });
    }
    Ok(name)
}

fn message_functions() -> Vec<Builtin> {
    vec![
        function(
            FunctionDescriptor::new("has_field", ValueType::Boolean)
                .param(required("field", ValueType::String)),
            |args, ctx| {
                let name = args.required_str("field")?;
                Ok(Value::Boolean(ctx.message().has_field(name)))
            },
        ),
        function(
            FunctionDescriptor::new("get_field", ValueType::Object)
                .param(required("field", ValueType::String)),
            |args, ctx| Ok(ctx.field(args.required_str("field")?)),
        ),
        function(
            FunctionDescriptor::new("set_field", ValueType::Void)
                .param(required("field", ValueType::String))
                .param(required("value", ValueType::Object)),
            |args, ctx| {
                let name = field_name(args, "field")?;
                // null values are not stored
                if let Some(value) = args.value("value").filter(|v| !v.is_null()) {
                    ctx.message_mut().set_field(name, value.clone());
                }
                Ok(Value::Null)
            },
        ),
        function(
            FunctionDescriptor::new("remove_field", ValueType::Void)
                .param(required("field", ValueType::String)),
            |args, ctx| {
                let name = args.required_str("field")?;
                ctx.message_mut().remove_field(name);
                Ok(Value::Null)
            },
        ),
        function(
            FunctionDescriptor::new("rename_field", ValueType::Void)
                .param(required("old_field", ValueType::String))
                .param(required("new_field", ValueType::String)),
            |args, ctx| {
                let old = args.required_str("old_field")?;
                let new = field_name(args, "new_field")?;
                if let Some(value) = ctx.message_mut().remove_field(old) {
                    ctx.message_mut().set_field(new, value);
                }
                Ok(Value::Null)
            },
        ),
        function(FunctionDescriptor::new("drop_message", ValueType::Void), |_, ctx| {
            ctx.message_mut().drop_message();
            Ok(Value::Null)
        }),
    ]
}

fn conversion_functions() -> Vec<Builtin> {
    vec![
        function(
            FunctionDescriptor::new("to_string", ValueType::String)
                .param(required("value", ValueType::Object))
                .param(optional("default", ValueType::String)),
            |args, _| {
                let converted = match args.value("value") {
                    Some(Value::Null) | None => args.optional_str("default")?.unwrap_or(""),
                    Some(Value::String(s)) => return Ok(Value::String(s.clone())),
                    Some(other) => return Ok(Value::String(other.to_string())),
                };
                Ok(Value::String(converted.to_string()))
            },
        ),
        function(
            FunctionDescriptor::new("to_long", ValueType::Long)
                .param(required("value", ValueType::Object))
                .param(optional("default", ValueType::Long)),
            |args, _| {
                let converted = match args.value("value") {
                    Some(Value::Long(n)) => Some(*n),
                    Some(Value::Double(f)) if f.is_finite() => Some(f.trunc() as i64),
                    Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                let fallback = args.value("default").and_then(Value::as_long).unwrap_or(0);
                Ok(Value::Long(converted.unwrap_or(fallback)))
            },
        ),
        function(
            FunctionDescriptor::new("to_double", ValueType::Double)
                .param(required("value", ValueType::Object))
                .param(optional("default", ValueType::Double)),
            |args, _| {
                let converted = match args.value("value") {
                    Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                    Some(other) => other.as_double(),
                    None => None,
                };
                let fallback = args.value("default").and_then(Value::as_double).unwrap_or(0.0);
                Ok(Value::Double(converted.unwrap_or(fallback)))
            },
        ),
        function(
            FunctionDescriptor::new("to_bool", ValueType::Boolean)
                .param(required("value", ValueType::Object)),
            |args, _| {
                let converted = match args.value("value") {
                    Some(Value::Boolean(b)) => *b,
                    Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
                    Some(Value::Long(n)) => *n != 0,
                    Some(Value::Double(f)) => *f != 0.0,
                    _ => false,
                };
                Ok(Value::Boolean(converted))
            },
        ),
        function(
            FunctionDescriptor::new("is_null", ValueType::Boolean)
                .param(required("value", ValueType::Object)),
            |args, _| Ok(Value::Boolean(args.value("value").map_or(true, Value::is_null))),
        ),
    ]
}

fn string_functions() -> Vec<Builtin> {
    vec![
        function(
            FunctionDescriptor::new("concat", ValueType::String)
                .param(required("first", ValueType::String))
                .param(required("second", ValueType::String)),
            |args, _| {
                let mut joined = args.required_str("first")?.to_string();
                joined.push_str(args.required_str("second")?);
                Ok(Value::String(joined))
            },
        ),
        function(
            FunctionDescriptor::new("contains", ValueType::Boolean)
                .param(required("value", ValueType::String))
                .param(required("search", ValueType::String))
                .param(optional("ignore_case", ValueType::Boolean)),
            |args, _| {
                let value = args.required_str("value")?;
                let search = args.required_str("search")?;
                let found = if args.optional_bool("ignore_case")?.unwrap_or(false) {
                    value.to_lowercase().contains(&search.to_lowercase())
                } else {
                    value.contains(search)
                };
                Ok(Value::Boolean(found))
            },
        ),
        function(
            FunctionDescriptor::new("lowercase", ValueType::String)
                .param(required("value", ValueType::String)),
            |args, _| Ok(Value::String(args.required_str("value")?.to_lowercase())),
        ),
        function(
            FunctionDescriptor::new("uppercase", ValueType::String)
                .param(required("value", ValueType::String)),
            |args, _| Ok(Value::String(args.required_str("value")?.to_uppercase())),
        ),
        function(
            FunctionDescriptor::new("regex", ValueType::Map)
                .param(
                    required("pattern", ValueType::String).with_transform(|value| {
                        let pattern = value.as_str().ok_or("pattern must be a string")?;
                        Regex::new(pattern).map_err(|e| e.to_string())
                    }),
                )
                .param(required("value", ValueType::String)),
            |args, _| {
                let pattern = args.transformed::<Regex>("pattern")?;
                let value = args.required_str("value")?;
                Ok(Value::Map(regex_groups(pattern, value)))
            },
        ),
    ]
}

/// `matches` flag plus numbered and named capture groups
fn regex_groups(pattern: &Regex, value: &str) -> HashMap<String, Value> {
    let mut result = HashMap::default();
    let Some(captures) = pattern.captures(value) else {
        result.insert("matches".to_string(), Value::Boolean(false));
        return result;
    };

    result.insert("matches".to_string(), Value::Boolean(true));
    for (idx, group) in captures.iter().enumerate().skip(1) {
        if let Some(group) = group {
            result.insert((idx - 1).to_string(), Value::from(group.as_str()));
        }
    }
    for name in pattern.capture_names().flatten() {
        if let Some(group) = captures.name(name) {
            result.insert(name.to_string(), Value::from(group.as_str()));
        }
    }
    result
}

fn routing_functions() -> Vec<Builtin> {
    vec![
        function(
            FunctionDescriptor::new("route_to_stream", ValueType::Void)
                .param(required("id", ValueType::String)),
            |args, ctx| {
                let stream = args.required_str("id")?;
                ctx.message_mut().add_stream(stream);
                Ok(Value::Null)
            },
        ),
        function(
            FunctionDescriptor::new("remove_from_stream", ValueType::Void)
                .param(required("id", ValueType::String)),
            |args, ctx| {
                let stream = args.required_str("id")?;
                ctx.message_mut().remove_stream(stream);
                Ok(Value::Null)
            },
        ),
    ]
}
