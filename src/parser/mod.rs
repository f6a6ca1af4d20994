// src/parser/mod.rs
//! Parser for the rule and pipeline languages
//!
//! Converts source text into type-checked ASTs, resolving every function call
//! against a [`FunctionRegistry`].

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod types;

use crate::functions::FunctionRegistry;

pub use ast::{MatchPolicy, PipelineDefinition, Rule, StageDefinition};
pub use parser::{ParseError, ParseErrorKind, ParseErrors, Parser};
pub use types::ValueType;

/// Parse source holding exactly one rule
pub fn parse_rule(source: &str, registry: &FunctionRegistry) -> Result<Rule, ParseErrors> {
    Parser::new(source, registry)?.parse_single_rule()
}

/// Parse any number of rules; a single error rejects all of them
pub fn parse_rules(source: &str, registry: &FunctionRegistry) -> Result<Vec<Rule>, ParseErrors> {
    Parser::new(source, registry)?.parse_rules()
}

pub fn parse_pipeline(source: &str) -> Result<PipelineDefinition, ParseErrors> {
    Parser::for_pipelines(source)?.parse_pipeline()
}
