// src/functions/mod.rs
//! Function registry and parameter contracts
//!
//! Every function a rule may call is described by a [`FunctionDescriptor`]
//! (name, return type, ordered parameters) and backed by an implementation.
//! The registry is filled once at startup, then frozen behind an `Arc` and
//! shared read-only by the parser and every evaluation.

pub mod builtin;

use crate::parser::types::ValueType;
use crate::runtime::context::EvaluationContext;
use crate::{EvaluationError, Value};
use ahash::HashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while filling the registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("function '{0}' is already registered")]
    DuplicateFunction(String),
}

/// Adapted parameter value produced by a transform
pub type Transformed = Arc<dyn Any + Send + Sync>;

type TransformFn = dyn Fn(&Value) -> Result<Transformed, String> + Send + Sync;

/// Declared parameter of a function
#[derive(Clone)]
pub struct ParameterDescriptor {
    name: String,
    ty: ValueType,
    optional: bool,
    transform: Option<Arc<TransformFn>>,
}

impl ParameterDescriptor {
    pub fn required(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
            transform: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            optional: true,
            ..Self::required(name, ty)
        }
    }

    /// Adapt the raw argument into the implementation's internal type once
    /// per evaluation, e.g. compiling a pattern string.
    pub fn with_transform<T, F>(mut self, transform: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Value) -> Result<T, String> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(move |value| {
            transform(value).map(|t| Arc::new(t) as Transformed)
        }));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn has_transform(&self) -> bool {
        self.transform.is_some()
    }
}

impl fmt::Debug for ParameterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterDescriptor")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("optional", &self.optional)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Typed contract of a callable function
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    name: String,
    return_type: ValueType,
    params: Vec<ParameterDescriptor>,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, return_type: ValueType) -> Self {
        Self {
            name: name.into(),
            return_type,
            params: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParameterDescriptor) -> Self {
        self.params.push(param);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_type(&self) -> ValueType {
        self.return_type
    }

    pub fn params(&self) -> &[ParameterDescriptor] {
        &self.params
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    pub fn required_count(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }

    pub fn has_optional(&self) -> bool {
        self.params.iter().any(|p| p.optional)
    }
}

/// Implementation side of a function
pub trait Function: Send + Sync {
    fn invoke(
        &self,
        args: &FunctionArgs<'_>,
        ctx: &mut EvaluationContext,
    ) -> Result<Value, EvaluationError>;
}

impl<F> Function for F
where
    F: Fn(&FunctionArgs<'_>, &mut EvaluationContext) -> Result<Value, EvaluationError>
        + Send
        + Sync,
{
    fn invoke(
        &self,
        args: &FunctionArgs<'_>,
        ctx: &mut EvaluationContext,
    ) -> Result<Value, EvaluationError> {
        self(args, ctx)
    }
}

/// Descriptor paired with its implementation
pub struct RegisteredFunction {
    descriptor: FunctionDescriptor,
    implementation: Arc<dyn Function>,
}

impl RegisteredFunction {
    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    /// Bind evaluated arguments (one slot per declared parameter) and invoke.
    ///
    /// Shared by the interpreter and the bytecode VM so both paths apply the
    /// same coercions, transforms and missing-argument checks.
    pub fn call(
        &self,
        values: Vec<Option<Value>>,
        ctx: &mut EvaluationContext,
    ) -> Result<Value, EvaluationError> {
        let args = FunctionArgs::bind(&self.descriptor, values)?;
        self.implementation.invoke(&args, ctx)
    }
}

impl fmt::Debug for RegisteredFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFunction")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Arguments of one function invocation, indexed by declared parameter
pub struct FunctionArgs<'a> {
    descriptor: &'a FunctionDescriptor,
    values: Vec<Option<Value>>,
    transformed: Vec<Option<Transformed>>,
}

impl<'a> FunctionArgs<'a> {
    /// Widen `Long` arguments of `Double` parameters, reject missing required
    /// values and run parameter transforms.
    ///
    /// `Null` counts as missing, except for `Object` parameters where it is a
    /// legitimate dynamic value.
    pub fn bind(
        descriptor: &'a FunctionDescriptor,
        mut values: Vec<Option<Value>>,
    ) -> Result<Self, EvaluationError> {
        values.resize(descriptor.params.len(), None);
        let mut transformed = Vec::with_capacity(values.len());

        for (param, slot) in descriptor.params.iter().zip(values.iter_mut()) {
            if param.ty != ValueType::Object && matches!(slot, Some(Value::Null)) {
                *slot = None;
            }
            if param.ty == ValueType::Double {
                if let Some(Value::Long(n)) = slot {
                    *slot = Some(Value::Double(*n as f64));
                }
            }

            if slot.is_none() && !param.optional {
                return Err(EvaluationError::MissingArgument {
                    function: descriptor.name.clone(),
                    param: param.name.clone(),
                });
            }

            let adapted = match (&param.transform, slot.as_ref()) {
                (Some(transform), Some(value)) => Some(transform(value).map_err(|reason| {
                    EvaluationError::TransformFailed {
                        function: descriptor.name.clone(),
                        param: param.name.clone(),
                        reason,
                    }
                })?),
                _ => None,
            };
            transformed.push(adapted);
        }

        Ok(Self {
            descriptor,
            values,
            transformed,
        })
    }

    pub fn function_name(&self) -> &str {
        &self.descriptor.name
    }

    /// Value of a parameter, `None` when it was not supplied
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.descriptor
            .param_index(name)
            .and_then(|idx| self.values[idx].as_ref())
    }

    pub fn required(&self, name: &str) -> Result<&Value, EvaluationError> {
        self.value(name)
            .ok_or_else(|| EvaluationError::MissingArgument {
                function: self.descriptor.name.clone(),
                param: name.to_string(),
            })
    }

    pub fn required_str(&self, name: &str) -> Result<&str, EvaluationError> {
        let value = self.required(name)?;
        value.as_str().ok_or_else(|| self.invalid(name, "String", value))
    }

    pub fn optional_str(&self, name: &str) -> Result<Option<&str>, EvaluationError> {
        match self.value(name) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| self.invalid(name, "String", value)),
        }
    }

    pub fn optional_bool(&self, name: &str) -> Result<Option<bool>, EvaluationError> {
        match self.value(name) {
            None => Ok(None),
            Some(value) => value
                .as_bool()
                .map(Some)
                .ok_or_else(|| self.invalid(name, "Boolean", value)),
        }
    }

    /// Output of the parameter's transform, downcast to the expected type
    pub fn transformed<T: Any + Send + Sync>(&self, name: &str) -> Result<&T, EvaluationError> {
        self.descriptor
            .param_index(name)
            .and_then(|idx| self.transformed[idx].as_ref())
            .and_then(|adapted| adapted.downcast_ref::<T>())
            .ok_or_else(|| EvaluationError::MissingArgument {
                function: self.descriptor.name.clone(),
                param: name.to_string(),
            })
    }

    fn invalid(&self, name: &str, expected: &str, found: &Value) -> EvaluationError {
        EvaluationError::InvalidArgument {
            function: self.descriptor.name.clone(),
            param: name.to_string(),
            reason: format!("expected {}, found {}", expected, found.kind()),
        }
    }
}

/// Name → function lookup shared read-only after startup
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<RegisteredFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-filled with the standard function library
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (descriptor, implementation) in builtin::functions() {
            registry.functions.insert(
                descriptor.name().to_string(),
                Arc::new(RegisteredFunction {
                    descriptor,
                    implementation,
                }),
            );
        }
        registry
    }

    /// Register a closure implementation. Fails if the name is taken.
    pub fn register<F>(
        &mut self,
        descriptor: FunctionDescriptor,
        implementation: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&FunctionArgs<'_>, &mut EvaluationContext) -> Result<Value, EvaluationError>
            + Send
            + Sync
            + 'static,
    {
        self.register_function(descriptor, Arc::new(implementation))
    }

    /// Register a trait-object implementation. Fails if the name is taken.
    pub fn register_function(
        &mut self,
        descriptor: FunctionDescriptor,
        implementation: Arc<dyn Function>,
    ) -> Result<(), RegistryError> {
        if self.functions.contains_key(descriptor.name()) {
            return Err(RegistryError::DuplicateFunction(descriptor.name().to_string()));
        }

        self.functions.insert(
            descriptor.name().to_string(),
            Arc::new(RegisteredFunction {
                descriptor,
                implementation,
            }),
        );
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<RegisteredFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered function names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::message::Message;

    fn echo_descriptor() -> FunctionDescriptor {
        FunctionDescriptor::new("echo", ValueType::Double)
            .param(ParameterDescriptor::required("value", ValueType::Double))
            .param(ParameterDescriptor::optional("label", ValueType::String))
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = FunctionRegistry::new();
        registry
            .register(echo_descriptor(), |args, _| Ok(args.required("value")?.clone()))
            .unwrap();

        let result = registry.register(echo_descriptor(), |_, _| Ok(Value::Null));
        assert_eq!(result, Err(RegistryError::DuplicateFunction("echo".into())));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_long_is_widened_for_double_params() {
        let mut registry = FunctionRegistry::new();
        registry
            .register(echo_descriptor(), |args, _| Ok(args.required("value")?.clone()))
            .unwrap();

        let echo = registry.resolve("echo").unwrap();
        let mut ctx = EvaluationContext::new(Message::new());
        let result = echo.call(vec![Some(Value::Long(3))], &mut ctx).unwrap();
        assert_eq!(result, Value::Double(3.0));
    }

    #[test]
    fn test_null_required_argument_is_missing() {
        let descriptor = echo_descriptor();
        let result = FunctionArgs::bind(&descriptor, vec![Some(Value::Null), None]);

        assert!(matches!(
            result,
            Err(EvaluationError::MissingArgument { ref param, .. }) if param == "value"
        ));
    }

    #[test]
    fn test_transform_runs_and_failures_propagate() {
        let descriptor = FunctionDescriptor::new("size", ValueType::Long).param(
            ParameterDescriptor::required("text", ValueType::String).with_transform(|v| {
                v.as_str()
                    .filter(|s| !s.is_empty())
                    .map(|s| s.len())
                    .ok_or_else(|| "empty text".to_string())
            }),
        );

        let args = FunctionArgs::bind(&descriptor, vec![Some(Value::from("abc"))]).unwrap();
        assert_eq!(*args.transformed::<usize>("text").unwrap(), 3);

        let failed = FunctionArgs::bind(&descriptor, vec![Some(Value::from(""))]);
        assert!(matches!(failed, Err(EvaluationError::TransformFailed { .. })));
    }

    #[test]
    fn test_descriptor_counts() {
        let descriptor = echo_descriptor();
        assert_eq!(descriptor.required_count(), 1);
        assert!(descriptor.has_optional());
        assert_eq!(descriptor.param_index("label"), Some(1));
    }
}
