// src/lib.rs
//! # Pipeline Rule Processor
//!
//! Parses, type-checks and runs the `when`/`then` rules that filter, enrich
//! and route log messages. Rules are grouped into prioritized stages inside
//! pipelines, pipelines are connected to message streams, and every message
//! is run through the pipelines of the streams it belongs to.
//!
//! ## Example
//!
//! ```rust
//! use pipeline_rule_processor::config::{ConfigurationSource, ProcessorConfig};
//! use pipeline_rule_processor::{FunctionRegistry, Message, PipelineProcessor, Value};
//! use std::sync::Arc;
//!
//! let processor = PipelineProcessor::new(
//!     Arc::new(FunctionRegistry::with_builtins()),
//!     ProcessorConfig::default(),
//! )
//! .unwrap();
//!
//! let source = ConfigurationSource::new()
//!     .rule("greet", r#"rule "greet" when has_field("user") then set_field("greeting", "hi"); end"#)
//!     .pipeline("main", r#"pipeline "main" stage 0 match all rule "greet"; end"#)
//!     .connect(pipeline_rule_processor::DEFAULT_STREAM_ID, ["main"]);
//! processor.apply(&source).unwrap();
//!
//! let result = processor.process(Message::new().with_field("user", "bob"));
//! assert_eq!(result.message.field("greeting"), Some(&Value::from("hi")));
//! ```

pub mod builder;
pub mod compiler;
pub mod config;
pub mod functions;
pub mod parser;
pub mod pipeline;
pub mod runtime;

use thiserror::Error;

pub use compiler::{CompiledRule, ExecutionMode, RuleCompiler};
pub use functions::{FunctionDescriptor, FunctionRegistry, ParameterDescriptor};
pub use parser::{parse_pipeline, parse_rule, parse_rules, ParseErrors, Rule, ValueType};
pub use pipeline::{
    InterpreterListener, MatchPolicy, PipelineProcessor, ProcessingResult, SimulationListener,
};
pub use runtime::message::{Message, DEFAULT_STREAM_ID};
pub use runtime::value::Value;

/// Errors raised while evaluating a rule against one message
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("function '{function}' is missing required argument '{param}'")]
    MissingArgument { function: String, param: String },

    #[error("invalid argument '{param}' for function '{function}': {reason}")]
    InvalidArgument {
        function: String,
        param: String,
        reason: String,
    },

    #[error("could not transform argument '{param}' of function '{function}': {reason}")]
    TransformFailed {
        function: String,
        param: String,
        reason: String,
    },

    #[error("function '{function}' failed: {reason}")]
    FunctionFailed { function: String, reason: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("{operation} cannot be applied to {found}")]
    TypeMismatch { operation: String, found: String },

    #[error("variable '{0}' is not bound")]
    UnboundVariable(String),

    #[error("stack underflow")]
    StackUnderflow,
}

/// Errors that reject a configuration before it becomes active
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("rule '{id}' is invalid: {errors}")]
    InvalidRule { id: String, errors: ParseErrors },

    #[error("pipeline '{id}' is invalid: {errors}")]
    InvalidPipeline { id: String, errors: ParseErrors },

    #[error("rule '{0}' is defined more than once")]
    DuplicateRule(String),

    #[error("pipeline '{0}' is defined more than once")]
    DuplicatePipeline(String),

    #[error("pipeline '{pipeline}' references unknown rule '{rule}'")]
    UnknownRule { pipeline: String, rule: String },

    #[error("stream '{stream}' is connected to unknown pipeline '{pipeline}'")]
    UnknownPipeline { stream: String, pipeline: String },

    #[error("invalid setting '{field}': {reason}")]
    InvalidSetting { field: String, reason: String },

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}
