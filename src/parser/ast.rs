// src/parser/ast.rs
//! Abstract Syntax Tree definitions for the rule DSL

use crate::functions::RegisteredFunction;
use crate::parser::types::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A parsed and type-checked rule. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: String,
    pub title: String,
    pub source: String,
    /// Boolean-typed condition
    pub when: Expression,
    pub then: Vec<Statement>,
}

impl Rule {
    /// Replace the id; parsing assigns the title as id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Function invoked for its side effect: `set_field("a", 1);`
    Call(FunctionCall),

    /// `let name = expr;`
    Let { name: String, value: Expression },
}

/// Call of a resolved function.
///
/// `args` has one slot per declared parameter, in declaration order; named
/// arguments are reordered into their slots during parsing.
#[derive(Clone)]
pub struct FunctionCall {
    pub function: Arc<RegisteredFunction>,
    pub args: Vec<Option<Expression>>,
}

impl FunctionCall {
    pub fn name(&self) -> &str {
        self.function.descriptor().name()
    }
}

impl fmt::Debug for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCall")
            .field("function", &self.name())
            .field("args", &self.args)
            .finish()
    }
}

impl PartialEq for FunctionCall {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name() && self.args == other.args
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Long(i64),
    Double(f64),
    String(String),
    Boolean(bool),

    /// `[a, b, c]`
    List(Vec<Expression>),

    /// `{key: value, "other key": value}`
    Map(Vec<(String, Expression)>),

    /// `$message.name`
    MessageField(String),

    /// Reference to a `let` binding
    Variable { name: String, ty: ValueType },

    /// `expr.name` on a map-valued expression
    FieldAccess {
        object: Box<Expression>,
        field: String,
    },

    /// `expr[index]`
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
    },

    Call(FunctionCall),

    /// `a AND b`, `a OR b` (short-circuit)
    Logical {
        op: LogicalOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },

    /// `NOT a`
    Not(Box<Expression>),

    Comparison {
        op: ComparisonOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },

    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expression>,
        right: Box<Expression>,
        ty: ValueType,
    },

    /// Unary minus
    Negate(Box<Expression>),
}

impl Expression {
    /// Static type of the value this expression produces
    pub fn result_type(&self) -> ValueType {
        match self {
            Expression::Long(_) => ValueType::Long,
            Expression::Double(_) => ValueType::Double,
            Expression::String(_) => ValueType::String,
            Expression::Boolean(_) => ValueType::Boolean,
            Expression::List(_) => ValueType::List,
            Expression::Map(_) => ValueType::Map,
            Expression::MessageField(_) => ValueType::Object,
            Expression::Variable { ty, .. } => *ty,
            Expression::FieldAccess { .. } | Expression::Index { .. } => ValueType::Object,
            Expression::Call(call) => call.function.descriptor().return_type(),
            Expression::Logical { .. } | Expression::Not(_) | Expression::Comparison { .. } => {
                ValueType::Boolean
            }
            Expression::Arithmetic { ty, .. } => *ty,
            Expression::Negate(operand) => operand.result_type(),
        }
    }

    /// Whether evaluation is independent of the message and the context
    pub fn is_constant(&self) -> bool {
        match self {
            Expression::Long(_)
            | Expression::Double(_)
            | Expression::String(_)
            | Expression::Boolean(_) => true,
            Expression::List(items) => items.iter().all(Expression::is_constant),
            Expression::Map(entries) => entries.iter().all(|(_, v)| v.is_constant()),
            Expression::MessageField(_) | Expression::Variable { .. } | Expression::Call(_) => {
                false
            }
            Expression::FieldAccess { object, .. } => object.is_constant(),
            Expression::Index { object, index } => object.is_constant() && index.is_constant(),
            Expression::Logical { left, right, .. }
            | Expression::Comparison { left, right, .. }
            | Expression::Arithmetic { left, right, .. } => {
                left.is_constant() && right.is_constant()
            }
            Expression::Not(operand) | Expression::Negate(operand) => operand.is_constant(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl ComparisonOp {
    pub fn is_equality(self) -> bool {
        matches!(self, ComparisonOp::Eq | ComparisonOp::Ne)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "==",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Gte => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithmeticOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
            ArithmeticOp::Rem => "%",
        }
    }
}

/// How a stage's rule matches decide whether its actions run and whether the
/// pipeline continues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Every rule must match; actions run only then
    All,
    /// At least one rule must match; matched rules run
    Either,
    /// Matched rules run and the pipeline always continues
    Pass,
}

impl MatchPolicy {
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "all" => Some(MatchPolicy::All),
            "either" => Some(MatchPolicy::Either),
            "pass" => Some(MatchPolicy::Pass),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            MatchPolicy::All => "all",
            MatchPolicy::Either => "either",
            MatchPolicy::Pass => "pass",
        }
    }
}

/// Parsed `pipeline "..." ... end` source. Rules are referenced by title.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDefinition {
    pub title: String,
    pub source: String,
    pub stages: Vec<StageDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageDefinition {
    pub priority: i64,
    pub match_policy: MatchPolicy,
    pub rule_titles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_policy_keywords() {
        assert_eq!(MatchPolicy::parse("EITHER"), Some(MatchPolicy::Either));
        assert_eq!(MatchPolicy::parse("any"), None);
        assert_eq!(MatchPolicy::Pass.keyword(), "pass");
    }

    #[test]
    fn test_constant_folding_candidates() {
        let expr = Expression::Arithmetic {
            op: ArithmeticOp::Add,
            left: Box::new(Expression::Long(1)),
            right: Box::new(Expression::Double(2.0)),
            ty: ValueType::Double,
        };
        assert!(expr.is_constant());
        assert_eq!(expr.result_type(), ValueType::Double);

        let field = Expression::Comparison {
            op: ComparisonOp::Eq,
            left: Box::new(Expression::MessageField("a".into())),
            right: Box::new(Expression::Long(1)),
        };
        assert!(!field.is_constant());
        assert_eq!(field.result_type(), ValueType::Boolean);
    }
}
