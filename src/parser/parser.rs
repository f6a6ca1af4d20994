// src/parser/parser.rs
//! Recursive-descent parser and semantic checker
//!
//! Syntax errors abort the parse. Semantic errors (unknown functions, bad
//! argument lists, type mismatches) are collected so a caller sees all of
//! them at once. Sub-expressions that failed a semantic check come back as
//! `None` so their parents skip checks that would only repeat the problem.

use super::ast::*;
use super::lexer::{LexError, Lexer, SpannedToken, Token};
use super::types::ValueType;
use crate::functions::{FunctionRegistry, RegisteredFunction};
use ahash::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    #[error("syntax error: {0}")]
    SyntaxError(String),

    #[error("undeclared function '{function}'")]
    UndeclaredFunction { function: String },

    #[error("undeclared variable '{name}'")]
    UndeclaredVariable { name: String },

    #[error("function '{function}' expects {expected} argument(s), {supplied} supplied")]
    WrongNumberOfArgs {
        function: String,
        expected: usize,
        supplied: usize,
    },

    #[error("missing required parameter '{param}' of function '{function}'")]
    MissingRequiredParam { function: String, param: String },

    #[error("parameter '{param}' of function '{function}' expects {expected}, found {actual}")]
    IncompatibleType {
        function: String,
        param: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("function '{function}' has optional parameters, arguments must be named")]
    OptionalParametersMustBeNamed { function: String },

    #[error("function '{function}' has no parameter '{param}'")]
    UnknownParameter { function: String, param: String },

    #[error("parameter '{param}' of function '{function}' is given more than once")]
    DuplicateArgument { function: String, param: String },

    #[error("invalid operation: {reason}")]
    InvalidOperation { reason: String },

    #[error("values of type {ty} cannot be indexed")]
    NonIndexableType { ty: ValueType },

    #[error("variable '{name}' is already defined")]
    DuplicateVariable { name: String },

    #[error("stage {priority} is defined more than once")]
    DuplicateStage { priority: i64 },
}

/// A problem in rule or pipeline source, with its 1-based position
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{line}:{column}: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: usize,
    pub column: usize,
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError {
            kind: ParseErrorKind::SyntaxError(err.message),
            line: err.line,
            column: err.column,
        }
    }
}

/// Every error found in one parse attempt, in source order
#[derive(Debug, Clone, PartialEq)]
pub struct ParseErrors(Vec<ParseError>);

impl ParseErrors {
    pub fn new(errors: Vec<ParseError>) -> Self {
        Self(errors)
    }

    pub fn first(&self) -> Option<&ParseError> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ParseError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn kinds(&self) -> Vec<&ParseErrorKind> {
        self.0.iter().map(|e| &e.kind).collect()
    }
}

impl fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseErrors {}

impl From<ParseError> for ParseErrors {
    fn from(error: ParseError) -> Self {
        Self(vec![error])
    }
}

impl IntoIterator for ParseErrors {
    type Item = ParseError;
    type IntoIter = std::vec::IntoIter<ParseError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Result of parsing a node: `Err` is a syntax error, `Ok(None)` a node whose
/// semantic errors were already recorded.
type Checked<T> = Result<Option<T>, ParseError>;

type Location = (usize, usize);

pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<SpannedToken>,
    position: usize,
    registry: Option<&'a FunctionRegistry>,
    errors: Vec<ParseError>,
    /// `let` bindings of the rule being parsed; `None` marks a binding whose
    /// value failed to check
    scope: HashMap<String, Option<ValueType>>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, registry: &'a FunctionRegistry) -> Result<Self, ParseError> {
        Self::with_registry(source, Some(registry))
    }

    /// Parser for pipeline source, which never resolves functions
    pub fn for_pipelines(source: &'a str) -> Result<Self, ParseError> {
        Self::with_registry(source, None)
    }

    fn with_registry(
        source: &'a str,
        registry: Option<&'a FunctionRegistry>,
    ) -> Result<Self, ParseError> {
        let tokens = Lexer::new(source).tokenize()?;

        Ok(Self {
            source,
            tokens,
            position: 0,
            registry,
            errors: Vec::new(),
            scope: HashMap::default(),
        })
    }

    /// Parse every rule in the source. Any error rejects the whole batch.
    pub fn parse_rules(mut self) -> Result<Vec<Rule>, ParseErrors> {
        let mut rules = Vec::new();

        while !self.check(&Token::Eof) {
            match self.parse_rule_definition() {
                Ok(Some(rule)) => rules.push(rule),
                Ok(None) => {}
                Err(syntax) => return Err(self.fail(syntax)),
            }
        }

        if self.errors.is_empty() {
            Ok(rules)
        } else {
            Err(ParseErrors(self.errors))
        }
    }

    /// Parse a source holding exactly one rule
    pub fn parse_single_rule(mut self) -> Result<Rule, ParseErrors> {
        let parsed = match self.parse_rule_definition() {
            Ok(rule) => rule,
            Err(syntax) => return Err(self.fail(syntax)),
        };

        if !self.check(&Token::Eof) {
            let trailing = self.syntax_error(format!(
                "unexpected {} after the end of the rule",
                self.current().token
            ));
            return Err(self.fail(trailing));
        }

        match parsed {
            Some(rule) if self.errors.is_empty() => Ok(rule),
            _ => Err(ParseErrors(self.errors)),
        }
    }

    pub fn parse_pipeline(mut self) -> Result<PipelineDefinition, ParseErrors> {
        match self.parse_pipeline_definition() {
            Ok(pipeline) if self.errors.is_empty() => Ok(pipeline),
            Ok(_) => Err(ParseErrors(self.errors)),
            Err(syntax) => Err(self.fail(syntax)),
        }
    }

    fn fail(mut self, syntax: ParseError) -> ParseErrors {
        self.errors.push(syntax);
        ParseErrors(self.errors)
    }

    // ----- rules -----

    fn parse_rule_definition(&mut self) -> Checked<Rule> {
        self.scope.clear();
        let errors_before = self.errors.len();
        let start = self.current().offset;

        self.expect(Token::Rule)?;
        let title = self.expect_string()?;

        self.expect(Token::When)?;
        let condition_at = self.location();
        let when = self.parse_expression()?;

        self.expect(Token::Then)?;
        let mut then = Vec::new();
        while !self.check(&Token::End) {
            then.push(self.parse_statement()?);
        }
        let end = self.current().end_offset;
        self.expect(Token::End)?;

        let when = when.and_then(|condition| {
            let ty = condition.result_type();
            if ty == ValueType::Boolean {
                Some(condition)
            } else {
                self.report(
                    ParseErrorKind::InvalidOperation {
                        reason: format!("rule condition must be Boolean, found {}", ty),
                    },
                    condition_at,
                );
                None
            }
        });

        let then: Option<Vec<Statement>> = then.into_iter().collect();
        match (when, then) {
            (Some(when), Some(then)) if self.errors.len() == errors_before => Ok(Some(Rule {
                id: title.clone(),
                title,
                source: Lexer::slice(self.source, start, end),
                when,
                then,
            })),
            _ => Ok(None),
        }
    }

    fn parse_statement(&mut self) -> Checked<Statement> {
        if self.check(&Token::Let) {
            return self.parse_let();
        }

        let at = self.location();
        let is_call = matches!(self.current().token, Token::Identifier(_))
            && self.peek_token(1) == &Token::LeftParen;
        if !is_call {
            return Err(self.syntax_error(format!(
                "expected a function call, 'let' or 'end', found {}",
                self.current().token
            )));
        }

        let name = self.expect_identifier()?;
        let call = self.parse_call(name, at)?;
        self.expect(Token::Semicolon)?;

        Ok(call.map(Statement::Call))
    }

    fn parse_let(&mut self) -> Checked<Statement> {
        self.expect(Token::Let)?;
        let at = self.location();
        let name = self.expect_identifier()?;
        self.expect(Token::Assign)?;
        let value = self.parse_expression()?;
        self.expect(Token::Semicolon)?;

        if self.scope.contains_key(&name) {
            self.report(ParseErrorKind::DuplicateVariable { name }, at);
            return Ok(None);
        }

        let Some(value) = value else {
            self.scope.insert(name, None);
            return Ok(None);
        };

        let ty = value.result_type();
        if ty == ValueType::Void {
            self.report(
                ParseErrorKind::InvalidOperation {
                    reason: format!("'{}' cannot be bound to a Void value", name),
                },
                at,
            );
            self.scope.insert(name, None);
            return Ok(None);
        }

        self.scope.insert(name.clone(), Some(ty));
        Ok(Some(Statement::Let { name, value }))
    }

    // ----- pipelines -----

    fn parse_pipeline_definition(&mut self) -> Result<PipelineDefinition, ParseError> {
        let start = self.current().offset;
        self.expect_keyword("pipeline")?;
        let title = self.expect_string()?;

        let mut stages = Vec::new();
        let mut priorities = HashSet::default();

        while self.check_keyword("stage") {
            let at = self.location();
            self.advance();
            let priority = self.expect_priority()?;

            self.expect_keyword("match")?;
            let match_policy = match &self.current().token {
                Token::Identifier(word) => MatchPolicy::parse(word),
                _ => None,
            }
            .ok_or_else(|| {
                self.syntax_error(format!(
                    "expected 'all', 'either' or 'pass', found {}",
                    self.current().token
                ))
            })?;
            self.advance();

            let mut rule_titles = Vec::new();
            while self.check(&Token::Rule) {
                self.advance();
                rule_titles.push(self.expect_string()?);
                if self.check(&Token::Semicolon) {
                    self.advance();
                }
            }

            if !priorities.insert(priority) {
                self.report(ParseErrorKind::DuplicateStage { priority }, at);
            }
            stages.push(StageDefinition {
                priority,
                match_policy,
                rule_titles,
            });
        }

        if stages.is_empty() {
            return Err(self.syntax_error(format!(
                "expected 'stage', found {}",
                self.current().token
            )));
        }

        let end = self.current().end_offset;
        self.expect(Token::End)?;
        if !self.check(&Token::Eof) {
            return Err(self.syntax_error(format!(
                "unexpected {} after the end of the pipeline",
                self.current().token
            )));
        }

        Ok(PipelineDefinition {
            title,
            source: Lexer::slice(self.source, start, end),
            stages,
        })
    }

    fn expect_priority(&mut self) -> Result<i64, ParseError> {
        let negative = self.check(&Token::Minus);
        if negative {
            self.advance();
        }
        match self.current().token {
            Token::Long(n) => {
                self.advance();
                Ok(if negative { -n } else { n })
            }
            _ => Err(self.syntax_error(format!(
                "expected stage priority, found {}",
                self.current().token
            ))),
        }
    }

    // ----- expressions -----

    pub(crate) fn parse_expression(&mut self) -> Checked<Expression> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Checked<Expression> {
        let mut left = self.parse_and()?;

        while self.check(&Token::Or) {
            let at = self.location();
            self.advance();
            let right = self.parse_and()?;
            left = self.logical(LogicalOp::Or, left, right, at);
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Checked<Expression> {
        let mut left = self.parse_not()?;

        while self.check(&Token::And) {
            let at = self.location();
            self.advance();
            let right = self.parse_not()?;
            left = self.logical(LogicalOp::And, left, right, at);
        }

        Ok(left)
    }

    fn parse_not(&mut self) -> Checked<Expression> {
        if !self.check(&Token::Not) {
            return self.parse_equality();
        }

        let at = self.location();
        self.advance();
        let operand = self.parse_not()?;

        Ok(operand.and_then(|operand| {
            let ty = operand.result_type();
            if ty == ValueType::Boolean {
                Some(Expression::Not(Box::new(operand)))
            } else {
                self.report(
                    ParseErrorKind::InvalidOperation {
                        reason: format!("NOT requires a Boolean operand, found {}", ty),
                    },
                    at,
                );
                None
            }
        }))
    }

    fn parse_equality(&mut self) -> Checked<Expression> {
        let mut left = self.parse_comparison()?;

        loop {
            let op = match self.current().token {
                Token::EqEq => ComparisonOp::Eq,
                Token::NotEq => ComparisonOp::Ne,
                _ => break,
            };

            let at = self.location();
            self.advance();
            let right = self.parse_comparison()?;
            left = self.comparison(op, left, right, at);
        }

        Ok(left)
    }

    fn parse_comparison(&mut self) -> Checked<Expression> {
        let mut left = self.parse_additive()?;

        loop {
            let op = match self.current().token {
                Token::Gt => ComparisonOp::Gt,
                Token::Gte => ComparisonOp::Gte,
                Token::Lt => ComparisonOp::Lt,
                Token::Lte => ComparisonOp::Lte,
                _ => break,
            };

            let at = self.location();
            self.advance();
            let right = self.parse_additive()?;
            left = self.comparison(op, left, right, at);
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Checked<Expression> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current().token {
                Token::Plus => ArithmeticOp::Add,
                Token::Minus => ArithmeticOp::Sub,
                _ => break,
            };

            let at = self.location();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.arithmetic(op, left, right, at);
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Checked<Expression> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.current().token {
                Token::Star => ArithmeticOp::Mul,
                Token::Slash => ArithmeticOp::Div,
                Token::Percent => ArithmeticOp::Rem,
                _ => break,
            };

            let at = self.location();
            self.advance();
            let right = self.parse_unary()?;
            left = self.arithmetic(op, left, right, at);
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Checked<Expression> {
        if !self.check(&Token::Minus) {
            return self.parse_postfix();
        }

        let at = self.location();
        self.advance();
        let operand = self.parse_unary()?;

        Ok(operand.and_then(|operand| {
            let ty = operand.result_type();
            if ty.is_numeric() {
                Some(Expression::Negate(Box::new(operand)))
            } else {
                self.report(
                    ParseErrorKind::InvalidOperation {
                        reason: format!("unary minus requires a numeric operand, found {}", ty),
                    },
                    at,
                );
                None
            }
        }))
    }

    fn parse_postfix(&mut self) -> Checked<Expression> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.current().token {
                Token::Dot => {
                    let at = self.location();
                    self.advance();
                    let field = self.expect_field_name()?;
                    expr = self.field_access(expr, field, at);
                }
                Token::LeftBracket => {
                    let at = self.location();
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(Token::RightBracket)?;
                    expr = self.index(expr, index, at);
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Checked<Expression> {
        let at = self.location();
        let token = self.current().token.clone();

        match token {
            Token::True => {
                self.advance();
                Ok(Some(Expression::Boolean(true)))
            }
            Token::False => {
                self.advance();
                Ok(Some(Expression::Boolean(false)))
            }
            Token::Long(n) => {
                self.advance();
                Ok(Some(Expression::Long(n)))
            }
            Token::Double(n) => {
                self.advance();
                Ok(Some(Expression::Double(n)))
            }
            Token::String(s) => {
                self.advance();
                Ok(Some(Expression::String(s)))
            }
            Token::Message => {
                self.advance();
                self.expect(Token::Dot)?;
                let field = self.expect_field_name()?;
                Ok(Some(Expression::MessageField(field)))
            }
            Token::LeftParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            Token::LeftBracket => self.parse_list(),
            Token::LeftBrace => self.parse_map(),
            Token::Identifier(name) => {
                self.advance();
                if self.check(&Token::LeftParen) {
                    Ok(self.parse_call(name, at)?.map(Expression::Call))
                } else {
                    Ok(self.variable(name, at))
                }
            }
            other => Err(self.syntax_error(format!("unexpected {}", other))),
        }
    }

    fn parse_list(&mut self) -> Checked<Expression> {
        self.expect(Token::LeftBracket)?;

        let mut items = Vec::new();
        if !self.check(&Token::RightBracket) {
            loop {
                items.push(self.parse_expression()?);
                if self.check(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RightBracket)?;

        let items: Option<Vec<Expression>> = items.into_iter().collect();
        Ok(items.map(Expression::List))
    }

    fn parse_map(&mut self) -> Checked<Expression> {
        self.expect(Token::LeftBrace)?;

        let mut entries = Vec::new();
        if !self.check(&Token::RightBrace) {
            loop {
                let key = match self.current().token.clone() {
                    Token::Identifier(key) | Token::String(key) => key,
                    other => {
                        return Err(self.syntax_error(format!("expected map key, found {}", other)))
                    }
                };
                self.advance();
                self.expect(Token::Colon)?;
                let value = self.parse_expression()?;
                entries.push(value.map(|value| (key, value)));

                if self.check(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RightBrace)?;

        let entries: Option<Vec<(String, Expression)>> = entries.into_iter().collect();
        Ok(entries.map(Expression::Map))
    }

    // ----- function calls -----

    fn parse_call(&mut self, name: String, at: Location) -> Checked<FunctionCall> {
        self.expect(Token::LeftParen)?;

        let mut positional: Vec<(Option<Expression>, Location)> = Vec::new();
        let mut named: Vec<(String, Option<Expression>, Location)> = Vec::new();

        if !self.check(&Token::RightParen) {
            loop {
                let arg_at = self.location();
                let is_named = matches!(self.current().token, Token::Identifier(_))
                    && self.peek_token(1) == &Token::Colon;

                if is_named {
                    if !positional.is_empty() {
                        return Err(self.mixed_arguments());
                    }
                    let param = self.expect_identifier()?;
                    self.expect(Token::Colon)?;
                    let value = self.parse_expression()?;
                    named.push((param, value, arg_at));
                } else {
                    if !named.is_empty() {
                        return Err(self.mixed_arguments());
                    }
                    let value = self.parse_expression()?;
                    positional.push((value, arg_at));
                }

                if self.check(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RightParen)?;

        let Some(function) = self.registry.and_then(|registry| registry.resolve(&name)) else {
            self.report(ParseErrorKind::UndeclaredFunction { function: name }, at);
            return Ok(None);
        };

        let args = if named.is_empty() {
            self.bind_positional(&function, positional, at)
        } else {
            self.bind_named(&function, named, at)
        };

        Ok(args.map(|args| FunctionCall { function, args }))
    }

    fn mixed_arguments(&self) -> ParseError {
        self.syntax_error("positional and named arguments cannot be mixed".to_string())
    }

    /// Positional arguments fill the required parameters in declaration order
    fn bind_positional(
        &mut self,
        function: &Arc<RegisteredFunction>,
        args: Vec<(Option<Expression>, Location)>,
        at: Location,
    ) -> Option<Vec<Option<Expression>>> {
        let descriptor = function.descriptor();
        let supplied = args.len();
        let total = descriptor.params().len();
        let required = descriptor.required_count();

        if supplied > total || supplied < required {
            self.report(
                ParseErrorKind::WrongNumberOfArgs {
                    function: descriptor.name().to_string(),
                    expected: if supplied > total { total } else { required },
                    supplied,
                },
                at,
            );
            return None;
        }

        if supplied > required {
            self.report(
                ParseErrorKind::OptionalParametersMustBeNamed {
                    function: descriptor.name().to_string(),
                },
                at,
            );
            return None;
        }

        let required_slots: Vec<usize> = descriptor
            .params()
            .iter()
            .enumerate()
            .filter(|(_, param)| !param.is_optional())
            .map(|(idx, _)| idx)
            .collect();

        let mut slots: Vec<Option<Expression>> = vec![None; total];
        let mut valid = true;
        for (idx, (arg, arg_at)) in required_slots.into_iter().zip(args) {
            match self.check_argument(function, idx, arg, arg_at) {
                Some(arg) => slots[idx] = Some(arg),
                None => valid = false,
            }
        }

        valid.then_some(slots)
    }

    fn bind_named(
        &mut self,
        function: &Arc<RegisteredFunction>,
        args: Vec<(String, Option<Expression>, Location)>,
        at: Location,
    ) -> Option<Vec<Option<Expression>>> {
        let descriptor = function.descriptor();
        let mut slots: Vec<Option<Expression>> = vec![None; descriptor.params().len()];
        let mut seen = vec![false; descriptor.params().len()];
        let mut valid = true;

        for (param, arg, arg_at) in args {
            let Some(idx) = descriptor.param_index(&param) else {
                self.report(
                    ParseErrorKind::UnknownParameter {
                        function: descriptor.name().to_string(),
                        param,
                    },
                    arg_at,
                );
                valid = false;
                continue;
            };

            if seen[idx] {
                self.report(
                    ParseErrorKind::DuplicateArgument {
                        function: descriptor.name().to_string(),
                        param,
                    },
                    arg_at,
                );
                valid = false;
                continue;
            }
            seen[idx] = true;

            match self.check_argument(function, idx, arg, arg_at) {
                Some(arg) => slots[idx] = Some(arg),
                None => valid = false,
            }
        }

        for (param, supplied) in descriptor.params().iter().zip(&seen) {
            if !param.is_optional() && !supplied {
                self.report(
                    ParseErrorKind::MissingRequiredParam {
                        function: descriptor.name().to_string(),
                        param: param.name().to_string(),
                    },
                    at,
                );
                valid = false;
            }
        }

        valid.then_some(slots)
    }

    fn check_argument(
        &mut self,
        function: &RegisteredFunction,
        idx: usize,
        arg: Option<Expression>,
        at: Location,
    ) -> Option<Expression> {
        let arg = arg?;
        let descriptor = function.descriptor();
        let param = &descriptor.params()[idx];
        let actual = arg.result_type();

        if actual.is_assignable_to(param.value_type()) {
            Some(arg)
        } else {
            self.report(
                ParseErrorKind::IncompatibleType {
                    function: descriptor.name().to_string(),
                    param: param.name().to_string(),
                    expected: param.value_type(),
                    actual,
                },
                at,
            );
            None
        }
    }

    // ----- semantic checks -----

    fn variable(&mut self, name: String, at: Location) -> Option<Expression> {
        match self.scope.get(&name) {
            Some(Some(ty)) => Some(Expression::Variable { ty: *ty, name }),
            Some(None) => None,
            None => {
                self.report(ParseErrorKind::UndeclaredVariable { name }, at);
                None
            }
        }
    }

    fn logical(
        &mut self,
        op: LogicalOp,
        left: Option<Expression>,
        right: Option<Expression>,
        at: Location,
    ) -> Option<Expression> {
        let (left, right) = (left?, right?);

        for operand in [&left, &right] {
            let ty = operand.result_type();
            if ty != ValueType::Boolean {
                let name = match op {
                    LogicalOp::And => "AND",
                    LogicalOp::Or => "OR",
                };
                self.report(
                    ParseErrorKind::InvalidOperation {
                        reason: format!("{} requires Boolean operands, found {}", name, ty),
                    },
                    at,
                );
                return None;
            }
        }

        Some(Expression::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn comparison(
        &mut self,
        op: ComparisonOp,
        left: Option<Expression>,
        right: Option<Expression>,
        at: Location,
    ) -> Option<Expression> {
        let (left, right) = (left?, right?);
        let (lt, rt) = (left.result_type(), right.result_type());

        let comparable = |ty: ValueType| {
            ty.is_numeric() || ty == ValueType::String || ty == ValueType::Object
        };
        let valid = if lt == ValueType::Void || rt == ValueType::Void {
            false
        } else if op.is_equality() {
            true
        } else {
            comparable(lt)
                && comparable(rt)
                && (lt == ValueType::Object
                    || rt == ValueType::Object
                    || lt == rt
                    || (lt.is_numeric() && rt.is_numeric()))
        };

        if !valid {
            self.report(
                ParseErrorKind::InvalidOperation {
                    reason: format!("cannot compare {} {} {}", lt, op.symbol(), rt),
                },
                at,
            );
            return None;
        }

        Some(Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn arithmetic(
        &mut self,
        op: ArithmeticOp,
        left: Option<Expression>,
        right: Option<Expression>,
        at: Location,
    ) -> Option<Expression> {
        let (left, right) = (left?, right?);
        let (lt, rt) = (left.result_type(), right.result_type());

        if !lt.is_numeric() || !rt.is_numeric() {
            self.report(
                ParseErrorKind::InvalidOperation {
                    reason: format!(
                        "operator {} requires numeric operands, found {} and {}",
                        op.symbol(),
                        lt,
                        rt
                    ),
                },
                at,
            );
            return None;
        }

        let ty = if lt == ValueType::Long && rt == ValueType::Long {
            ValueType::Long
        } else {
            ValueType::Double
        };

        Some(Expression::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
        })
    }

    fn field_access(
        &mut self,
        object: Option<Expression>,
        field: String,
        at: Location,
    ) -> Option<Expression> {
        let object = object?;
        let ty = object.result_type();

        if matches!(ty, ValueType::Map | ValueType::Object) {
            Some(Expression::FieldAccess {
                object: Box::new(object),
                field,
            })
        } else {
            self.report(ParseErrorKind::NonIndexableType { ty }, at);
            None
        }
    }

    fn index(
        &mut self,
        object: Option<Expression>,
        index: Option<Expression>,
        at: Location,
    ) -> Option<Expression> {
        let (object, index) = (object?, index?);
        let (ot, it) = (object.result_type(), index.result_type());

        let valid = match (ot, it) {
            (ValueType::List | ValueType::Map | ValueType::Object, ValueType::Object)
            | (ValueType::List | ValueType::Object, ValueType::Long)
            | (ValueType::Map | ValueType::Object, ValueType::String) => true,
            (ValueType::List | ValueType::Map | ValueType::Object, _) => {
                self.report(
                    ParseErrorKind::InvalidOperation {
                        reason: format!("cannot index {} with {}", ot, it),
                    },
                    at,
                );
                false
            }
            _ => {
                self.report(ParseErrorKind::NonIndexableType { ty: ot }, at);
                false
            }
        };

        valid.then(|| Expression::Index {
            object: Box::new(object),
            index: Box::new(index),
        })
    }

    // ----- token helpers -----

    fn current(&self) -> &SpannedToken {
        // tokenize() always ends with Eof and advance() never moves past it
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn peek_token(&self, distance: usize) -> &Token {
        let idx = (self.position + distance).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn location(&self) -> Location {
        let current = self.current();
        (current.line, current.column)
    }

    fn advance(&mut self) {
        if self.position + 1 < self.tokens.len() {
            self.position += 1;
        }
    }

    fn check(&self, token: &Token) -> bool {
        &self.current().token == token
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        matches!(&self.current().token, Token::Identifier(word) if word == keyword)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if self.check(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.syntax_error(format!(
                "expected {}, found {}",
                expected,
                self.current().token
            )))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.check_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.syntax_error(format!(
                "expected '{}', found {}",
                keyword,
                self.current().token
            )))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match self.current().token.clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.syntax_error(format!("expected identifier, found {}", other))),
        }
    }

    /// Field names after `.` may collide with keywords such as `end`
    fn expect_field_name(&mut self) -> Result<String, ParseError> {
        let name = match &self.current().token {
            Token::Identifier(name) => name.clone(),
            Token::Rule => "rule".to_string(),
            Token::When => "when".to_string(),
            Token::Then => "then".to_string(),
            Token::End => "end".to_string(),
            Token::Let => "let".to_string(),
            other => {
                return Err(self.syntax_error(format!("expected field name, found {}", other)))
            }
        };
        self.advance();
        Ok(name)
    }

    fn expect_string(&mut self) -> Result<String, ParseError> {
        match self.current().token.clone() {
            Token::String(s) => {
                self.advance();
                Ok(s)
            }
            other => Err(self.syntax_error(format!("expected string, found {}", other))),
        }
    }

    fn syntax_error(&self, message: String) -> ParseError {
        let (line, column) = self.location();
        ParseError {
            kind: ParseErrorKind::SyntaxError(message),
            line,
            column,
        }
    }

    fn report(&mut self, kind: ParseErrorKind, (line, column): Location) {
        self.errors.push(ParseError { kind, line, column });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{FunctionDescriptor, ParameterDescriptor};
    use crate::Value;

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::with_builtins();
        registry
            .register(
                FunctionDescriptor::new("pair", ValueType::String)
                    .param(ParameterDescriptor::required("first", ValueType::String))
                    .param(ParameterDescriptor::required("second", ValueType::Long)),
                |_, _| Ok(Value::Null),
            )
            .unwrap();
        registry
    }

    fn parse(source: &str) -> Result<Rule, ParseErrors> {
        let registry = registry();
        Parser::new(source, &registry)
            .map_err(ParseErrors::from)?
            .parse_single_rule()
    }

    fn kinds(source: &str) -> Vec<ParseErrorKind> {
        parse(source)
            .unwrap_err()
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    #[test]
    fn test_simple_rule() {
        let source = r#"rule "r1" when has_field("user") then set_field("greeting", "hi"); end"#;
        let rule = parse(source).unwrap();

        assert_eq!(rule.id, "r1");
        assert_eq!(rule.title, "r1");
        assert_eq!(rule.source, source);
        assert_eq!(rule.then.len(), 1);
        assert_eq!(rule.when.result_type(), ValueType::Boolean);
    }

    #[test]
    fn test_precedence() {
        let rule = parse(r#"rule "p" when 1 + 2 * 3 == 7 AND NOT false then end"#).unwrap();

        let Expression::Logical { op, left, .. } = &rule.when else {
            panic!("expected logical expression, got {:?}", rule.when);
        };
        assert_eq!(*op, LogicalOp::And);
        let Expression::Comparison { left, .. } = left.as_ref() else {
            panic!("expected comparison");
        };
        assert!(matches!(
            left.as_ref(),
            Expression::Arithmetic { op: ArithmeticOp::Add, ty: ValueType::Long, .. }
        ));
    }

    #[test]
    fn test_wrong_number_of_args() {
        let errors = kinds(r#"rule "w" when true then pair("a"); end"#);
        assert_eq!(
            errors,
            vec![ParseErrorKind::WrongNumberOfArgs {
                function: "pair".into(),
                expected: 2,
                supplied: 1,
            }]
        );
    }

    #[test]
    fn test_optional_parameters_must_be_named() {
        let errors = kinds(r#"rule "o" when to_long("5", 1) > 0 then end"#);
        assert_eq!(
            errors,
            vec![ParseErrorKind::OptionalParametersMustBeNamed {
                function: "to_long".into()
            }]
        );

        assert!(parse(r#"rule "o" when to_long(value: "5", default: 1) > 0 then end"#).is_ok());
        assert!(parse(r#"rule "o" when to_long("5") > 0 then end"#).is_ok());
    }

    #[test]
    fn test_named_argument_errors() {
        let errors = kinds(r#"rule "n" when true then pair(first: "a", third: 1); end"#);
        assert_eq!(
            errors,
            vec![
                ParseErrorKind::UnknownParameter {
                    function: "pair".into(),
                    param: "third".into()
                },
                ParseErrorKind::MissingRequiredParam {
                    function: "pair".into(),
                    param: "second".into()
                },
            ]
        );
    }

    #[test]
    fn test_mixed_arguments_are_a_syntax_error() {
        let errors = kinds(r#"rule "m" when true then pair("a", second: 1); end"#);
        assert!(matches!(errors.as_slice(), [ParseErrorKind::SyntaxError(_)]));
    }

    #[test]
    fn test_errors_are_collected() {
        let source = r#"rule "c"
when nope() AND has_field(1)
then
  set_field("a", missing);
end"#;
        let errors = parse(source).unwrap_err();
        let kinds: Vec<_> = errors.iter().map(|e| (&e.kind, e.line)).collect();

        assert_eq!(errors.len(), 3);
        assert!(matches!(kinds[0], (ParseErrorKind::UndeclaredFunction { .. }, 2)));
        assert!(matches!(
            kinds[1],
            (
                ParseErrorKind::IncompatibleType {
                    expected: ValueType::String,
                    actual: ValueType::Long,
                    ..
                },
                2
            )
        ));
        assert!(matches!(kinds[2], (ParseErrorKind::UndeclaredVariable { .. }, 4)));
    }

    #[test]
    fn test_error_positions() {
        let errors = parse("rule \"x\"\nwhen true\nthen\n  unknown();\nend").unwrap_err();
        let first = errors.first().unwrap();
        assert_eq!((first.line, first.column), (4, 3));
    }

    #[test]
    fn test_object_values_need_conversion() {
        let errors = kinds(r#"rule "t" when has_field($message.name) then end"#);
        assert!(matches!(
            errors.as_slice(),
            [ParseErrorKind::IncompatibleType { actual: ValueType::Object, .. }]
        ));

        assert!(parse(r#"rule "t" when has_field(to_string($message.name)) then end"#).is_ok());
    }

    #[test]
    fn test_condition_must_be_boolean() {
        let errors = kinds(r#"rule "b" when 1 + 1 then end"#);
        assert!(matches!(errors.as_slice(), [ParseErrorKind::InvalidOperation { .. }]));

        let errors = kinds(r#"rule "b" when NOT "x" then end"#);
        assert!(matches!(errors.as_slice(), [ParseErrorKind::InvalidOperation { .. }]));
    }

    #[test]
    fn test_let_bindings() {
        let rule = parse(
            r#"rule "l"
when true
then
  let greeting = concat("hello ", to_string($message.user));
  set_field("greeting", greeting);
end"#,
        )
        .unwrap();
        assert!(matches!(&rule.then[0], Statement::Let { name, .. } if name == "greeting"));

        let errors = kinds(
            r#"rule "l" when true then let a = 1; let a = 2; let v = drop_message(); end"#,
        );
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], ParseErrorKind::DuplicateVariable { .. }));
        assert!(matches!(errors[1], ParseErrorKind::InvalidOperation { .. }));
    }

    #[test]
    fn test_indexing() {
        assert!(parse(r#"rule "i" when [1, 2][0] == 1 AND {a: 1}["a"] == 1 then end"#).is_ok());
        assert!(parse(r#"rule "i" when regex("(a)", "a").matches == true then end"#).is_ok());

        let errors = kinds(r#"rule "i" when 5[0] == 1 then end"#);
        assert_eq!(errors, vec![ParseErrorKind::NonIndexableType { ty: ValueType::Long }]);
    }

    #[test]
    fn test_failed_operand_does_not_cascade() {
        let errors = kinds(r#"rule "f" when unknown() + 1 > 2 then end"#);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_parse_rules_is_all_or_nothing() {
        let registry = registry();
        let source = r#"
            rule "good" when true then end
            rule "bad" when true then nope(); end
        "#;
        let result = Parser::new(source, &registry).unwrap().parse_rules();
        assert_eq!(result.unwrap_err().len(), 1);

        let source = r#"rule "a" when true then end rule "b" when false then end"#;
        let rules = Parser::new(source, &registry).unwrap().parse_rules().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].source, r#"rule "b" when false then end"#);
    }

    #[test]
    fn test_trailing_input_is_rejected() {
        let errors = kinds(r#"rule "t" when true then end extra"#);
        assert!(matches!(errors.as_slice(), [ParseErrorKind::SyntaxError(_)]));
    }

    #[test]
    fn test_pipeline() {
        let source = r#"pipeline "main"
stage 0 match all
  rule "a";
  rule "b";
stage -5 match either
  rule "c"
end"#;
        let pipeline = Parser::for_pipelines(source).unwrap().parse_pipeline().unwrap();

        assert_eq!(pipeline.title, "main");
        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(pipeline.stages[0].rule_titles, vec!["a", "b"]);
        assert_eq!(pipeline.stages[1].priority, -5);
        assert_eq!(pipeline.stages[1].match_policy, MatchPolicy::Either);
    }

    #[test]
    fn test_duplicate_stage() {
        let source = r#"pipeline "p" stage 1 match all stage 1 match pass end"#;
        let errors = Parser::for_pipelines(source).unwrap().parse_pipeline().unwrap_err();
        assert_eq!(
            errors.kinds(),
            vec![&ParseErrorKind::DuplicateStage { priority: 1 }]
        );
    }
}
