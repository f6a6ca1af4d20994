// src/parser/lexer.rs
//! Lexical analyzer (tokenizer) for rule and pipeline source

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    Rule,
    When,
    Then,
    End,
    Let,
    True,
    False,

    // Identifiers and literals
    Identifier(String),
    /// `$message`
    Message,
    Double(f64),
    Long(i64),
    String(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    EqEq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,

    And,
    Or,
    Not,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,

    Comma,
    Semicolon,
    Colon,
    Dot,
    Assign,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "identifier '{}'", s),
            Token::Double(n) => write!(f, "number {}", n),
            Token::Long(n) => write!(f, "number {}", n),
            Token::String(s) => write!(f, "string \"{}\"", s),
            Token::Message => write!(f, "'$message'"),
            Token::Eof => write!(f, "end of input"),
            Token::Rule => write!(f, "'rule'"),
            Token::When => write!(f, "'when'"),
            Token::Then => write!(f, "'then'"),
            Token::End => write!(f, "'end'"),
            Token::Let => write!(f, "'let'"),
            Token::True => write!(f, "'true'"),
            Token::False => write!(f, "'false'"),
            Token::And => write!(f, "'AND'"),
            Token::Or => write!(f, "'OR'"),
            Token::Not => write!(f, "'NOT'"),
            other => write!(f, "'{}'", other.symbol()),
        }
    }
}

impl Token {
    fn symbol(&self) -> &'static str {
        match self {
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Gt => ">",
            Token::Gte => ">=",
            Token::Lt => "<",
            Token::Lte => "<=",
            Token::LeftParen => "(",
            Token::RightParen => ")",
            Token::LeftBrace => "{",
            Token::RightBrace => "}",
            Token::LeftBracket => "[",
            Token::RightBracket => "]",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::Colon => ":",
            Token::Dot => ".",
            Token::Assign => "=",
            _ => "?",
        }
    }
}

/// Token with its source position. Offsets are char indices into the input.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub line: usize,
    pub column: usize,
    pub offset: usize,
    pub end_offset: usize,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("lexer error at {line}:{column}: {message}")]
pub struct LexError {
    pub message: String,
    /// First character of the offending input
    pub character: char,
    pub line: usize,
    pub column: usize,
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the whole input. The last token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<SpannedToken>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let (line, column, offset) = (self.line, self.column, self.position);
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(SpannedToken {
                token,
                line,
                column,
                offset,
                end_offset: self.position,
            });
            if done {
                return Ok(tokens);
            }
        }
    }

    /// Characters of the input between two offsets
    pub fn slice(input: &str, start: usize, end: usize) -> String {
        input.chars().skip(start).take(end.saturating_sub(start)).collect()
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        if self.is_at_end() {
            return Ok(Token::Eof);
        }

        let ch = self.current_char();
        let at = (self.line, self.column);

        let single = match ch {
            '(' => Some(Token::LeftParen),
            ')' => Some(Token::RightParen),
            '{' => Some(Token::LeftBrace),
            '}' => Some(Token::RightBrace),
            '[' => Some(Token::LeftBracket),
            ']' => Some(Token::RightBracket),
            ',' => Some(Token::Comma),
            ';' => Some(Token::Semicolon),
            ':' => Some(Token::Colon),
            '.' => Some(Token::Dot),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return Ok(token);
        }

        match ch {
            '=' => return Ok(self.either('=', Token::EqEq, Token::Assign)),
            '!' => return Ok(self.either('=', Token::NotEq, Token::Not)),
            '>' => return Ok(self.either('=', Token::Gte, Token::Gt)),
            '<' => return Ok(self.either('=', Token::Lte, Token::Lt)),
            '&' => {
                self.advance();
                if self.peek_is('&') {
                    self.advance();
                    return Ok(Token::And);
                }
                return Err(self.error(at, '&', "expected '&&'".to_string()));
            }
            '|' => {
                self.advance();
                if self.peek_is('|') {
                    self.advance();
                    return Ok(Token::Or);
                }
                return Err(self.error(at, '|', "expected '||'".to_string()));
            }
            '"' | '\'' => return self.read_string(ch),
            '$' => return self.read_message_ref(at),
            _ => {}
        }

        if ch.is_ascii_digit() {
            return self.read_number();
        }

        if ch.is_alphabetic() || ch == '_' {
            return Ok(self.read_identifier());
        }

        Err(self.error(at, ch, format!("unexpected character '{}'", ch)))
    }

    /// Two-char operator when the next char is `second`, else the one-char form
    fn either(&mut self, second: char, double: Token, single: Token) -> Token {
        self.advance();
        if self.peek_is(second) {
            self.advance();
            double
        } else {
            single
        }
    }

    fn read_message_ref(&mut self, at: (usize, usize)) -> Result<Token, LexError> {
        self.advance(); // $
        let word = self.read_word();
        if word == "message" {
            Ok(Token::Message)
        } else {
            Err(self.error(at, '$', format!("unexpected character '$' before '{}'", word)))
        }
    }

    fn read_word(&mut self) -> String {
        let start = self.position;
        while !self.is_at_end() {
            let ch = self.current_char();
            if ch.is_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        self.input[start..self.position].iter().collect()
    }

    fn read_identifier(&mut self) -> Token {
        let identifier = self.read_word();

        match identifier.as_str() {
            "rule" => Token::Rule,
            "when" => Token::When,
            "then" => Token::Then,
            "end" => Token::End,
            "let" => Token::Let,
            "true" => Token::True,
            "false" => Token::False,
            "and" | "AND" => Token::And,
            "or" | "OR" => Token::Or,
            "not" | "NOT" => Token::Not,
            _ => Token::Identifier(identifier),
        }
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let start = self.position;
        let at = (self.line, self.column);
        let first = self.current_char();
        let mut is_double = false;

        self.skip_digits();

        if self.peek_is('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            is_double = true;
            self.advance();
            self.skip_digits();
        }

        if self.peek_is('e') || self.peek_is('E') {
            let sign = self.peek_next();
            let digits_follow = match sign {
                Some('+') | Some('-') => self
                    .input
                    .get(self.position + 2)
                    .is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if digits_follow {
                is_double = true;
                self.advance();
                if matches!(sign, Some('+') | Some('-')) {
                    self.advance();
                }
                self.skip_digits();
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        if is_double {
            text.parse::<f64>()
                .map(Token::Double)
                .map_err(|_| self.error(at, first, format!("invalid number '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(Token::Long)
                .map_err(|_| self.error(at, first, format!("integer '{}' is out of range", text)))
        }
    }

    fn skip_digits(&mut self) {
        while !self.is_at_end() && self.current_char().is_ascii_digit() {
            self.advance();
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, LexError> {
        let at = (self.line, self.column);
        self.advance(); // opening quote

        let mut result = String::new();

        while !self.is_at_end() && self.current_char() != quote {
            let ch = self.current_char();

            if ch == '\\' {
                self.advance();
                if self.is_at_end() {
                    break;
                }

                let escaped = match self.current_char() {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    c => c,
                };

                result.push(escaped);
            } else {
                result.push(ch);
            }
            self.advance();
        }

        if self.is_at_end() {
            return Err(self.error(at, quote, "unterminated string".to_string()));
        }

        self.advance(); // closing quote

        Ok(Token::String(result))
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        while !self.is_at_end() {
            let ch = self.current_char();

            if ch.is_whitespace() {
                self.advance();
            } else if ch == '/' && self.peek_next() == Some('/') {
                while !self.is_at_end() && self.current_char() != '\n' {
                    self.advance();
                }
            } else if ch == '/' && self.peek_next() == Some('*') {
                let at = (self.line, self.column);
                self.advance();
                self.advance();

                loop {
                    if self.is_at_end() {
                        return Err(self.error(at, '/', "unterminated comment".to_string()));
                    }
                    if self.current_char() == '*' && self.peek_next() == Some('/') {
                        self.advance();
                        self.advance();
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn current_char(&self) -> char {
        self.input[self.position]
    }

    fn peek_is(&self, expected: char) -> bool {
        self.input.get(self.position) == Some(&expected)
    }

    fn peek_next(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            if self.current_char() == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    /// Error for the token that started at `at`
    fn error(&self, at: (usize, usize), character: char, message: String) -> LexError {
        LexError {
            message,
            character,
            line: at.0,
            column: at.1,
        }
    }
}
