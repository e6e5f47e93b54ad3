//! Boolean note queries.
//!
//! Raw arguments are tokenized, implicit `OR`s are inserted between
//! adjacent operands, and the tokens are parsed by recursive descent with
//! `NOT` > `AND` > `OR` precedence:
//!
//! ```text
//! or      := and (("OR" | "||") and)*
//! and     := unary (("AND" | "&&") unary)*
//! unary   := ("NOT" | "!") unary | primary
//! primary := "(" or ")" | leaf
//! leaf    := tag:NAME | find:PATTERN | KEY:VALUE | PATH
//! ```

use std::fmt;

use serde::Serialize;

use crate::error::ParseError;
use crate::store::normalize_path;

/// A leaf predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListInput {
    /// Exact document or directory prefix; `*` matches everything.
    PathPrefix { value: String },
    Tag { value: String },
    FuzzyFind { pattern: String },
    Property { key: String, value: String },
}

impl fmt::Display for ListInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListInput::PathPrefix { value } => write!(f, "{value}"),
            ListInput::Tag { value } => write!(f, "tag:{value}"),
            ListInput::FuzzyFind { pattern } => write!(f, "find:{pattern}"),
            ListInput::Property { key, value } => write!(f, "{key}:{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputExpression {
    Leaf(ListInput),
    And(Box<InputExpression>, Box<InputExpression>),
    Or(Box<InputExpression>, Box<InputExpression>),
    Not(Box<InputExpression>),
}

impl InputExpression {
    pub fn and(left: InputExpression, right: InputExpression) -> Self {
        InputExpression::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: InputExpression, right: InputExpression) -> Self {
        InputExpression::Or(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: InputExpression) -> Self {
        InputExpression::Not(Box::new(child))
    }

    /// Left-nested `OR` of the given leaves, or `None` when empty.
    pub fn any_of(inputs: impl IntoIterator<Item = ListInput>) -> Option<Self> {
        inputs
            .into_iter()
            .map(InputExpression::Leaf)
            .reduce(InputExpression::or)
    }
}

impl fmt::Display for InputExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputExpression::Leaf(input) => write!(f, "{input}"),
            InputExpression::And(l, r) => write!(f, "({l} AND {r})"),
            InputExpression::Or(l, r) => write!(f, "({l} OR {r})"),
            InputExpression::Not(c) => write!(f, "NOT {c}"),
        }
    }
}

/// Output of [`parse_expression`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedQuery {
    /// Every leaf in the order the parser met it.
    pub inputs: Vec<ListInput>,
    /// `None` when no arguments were given.
    pub expression: Option<InputExpression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Operator,
    LParen,
    RParen,
    Operand,
}

fn classify_token(token: &str) -> TokenKind {
    match token.to_lowercase().as_str() {
        "and" | "or" | "not" | "&&" | "||" | "!" => TokenKind::Operator,
        "(" => TokenKind::LParen,
        ")" => TokenKind::RParen,
        _ => TokenKind::Operand,
    }
}

/// Cheap pre-check, then a scan for a whole-field operator word.
fn contains_operator_word(arg: &str) -> bool {
    let colons = arg.matches(':').count();
    let has_parens = arg.contains(['(', ')']);
    if colons < 2 && !has_parens && !arg.contains("&&") && !arg.contains("||") {
        return false;
    }
    arg.split_whitespace()
        .any(|field| classify_token(field) == TokenKind::Operator)
}

/// Move leading and trailing parentheses into their own tokens.
fn peel_parens(field: &str, out: &mut Vec<String>) {
    let is_paren = |c: char| c == '(' || c == ')';
    let core = field.trim_start_matches(is_paren);
    for c in field[..field.len() - core.len()].chars() {
        out.push(c.to_string());
    }
    let inner = core.trim_end_matches(is_paren);
    if !inner.trim().is_empty() {
        out.push(inner.to_string());
    }
    for c in core[inner.len()..].chars() {
        out.push(c.to_string());
    }
}

/// Split raw arguments into tokens. An argument is only split on
/// whitespace when it looks like it carries operators, so a quoted
/// multi-word value such as `find:meeting notes` stays whole.
pub fn tokenize_args<S: AsRef<str>>(args: &[S]) -> Vec<String> {
    let mut tokens = Vec::new();
    for arg in args {
        let arg = arg.as_ref().trim();
        if arg.is_empty() {
            continue;
        }
        if !contains_operator_word(arg) {
            if arg.contains(char::is_whitespace) {
                tokens.push(arg.to_string());
            } else {
                peel_parens(arg, &mut tokens);
            }
            continue;
        }
        for field in arg.split_whitespace() {
            peel_parens(field, &mut tokens);
        }
    }
    tokens
}

/// Insert `OR` between adjacent operands (and around parenthesized groups)
/// so that space-separated terms keep meaning "any of".
pub fn insert_implicit_ors(tokens: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len() * 2);
    let mut prev: Option<TokenKind> = None;
    for token in tokens {
        let kind = classify_token(&token);
        if matches!(prev, Some(TokenKind::Operand | TokenKind::RParen))
            && matches!(kind, TokenKind::Operand | TokenKind::LParen)
        {
            out.push("OR".to_string());
        }
        prev = Some(kind);
        out.push(token);
    }
    out
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Classify one operand token.
pub fn parse_single_input(token: &str) -> Result<ListInput, ParseError> {
    if let Some(raw) = token.strip_prefix("tag:") {
        let tag = unquote(raw).trim().trim_start_matches('#').to_lowercase();
        if tag.is_empty() || tag == "*" || tag.contains(char::is_whitespace) {
            return Err(ParseError::InvalidTag(token.to_string()));
        }
        return Ok(ListInput::Tag { value: tag });
    }

    if let Some(raw) = token.strip_prefix("find:") {
        let pattern = unquote(raw).trim();
        if pattern.is_empty() || pattern == "*" {
            return Err(ParseError::InvalidFind(token.to_string()));
        }
        return Ok(ListInput::FuzzyFind {
            pattern: pattern.to_string(),
        });
    }

    if let Some((key, value)) = token.split_once(':') {
        let key = unquote(key.trim()).trim();
        let value = unquote(value.trim()).trim();
        if key.is_empty() || value.is_empty() || value == "*" {
            return Err(ParseError::InvalidProperty(token.to_string()));
        }
        return Ok(ListInput::Property {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    let path = unquote(token);
    let value = if path == "*" {
        path.to_string()
    } else {
        normalize_path(path)
    };
    Ok(ListInput::PathPrefix { value })
}

struct Parser {
    tokens: Vec<String>,
    pos: usize,
    inputs: Vec<ListInput>,
}

impl Parser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_operator(&mut self, words: [&str; 2]) -> bool {
        let hit = self
            .peek()
            .is_some_and(|t| words.iter().any(|w| t.eq_ignore_ascii_case(w)));
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn parse_or(&mut self) -> Result<InputExpression, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat_operator(["or", "||"]) {
            let right = self.parse_and()?;
            left = InputExpression::or(left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<InputExpression, ParseError> {
        let mut left = self.parse_unary()?;
        while self.eat_operator(["and", "&&"]) {
            let right = self.parse_unary()?;
            left = InputExpression::and(left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<InputExpression, ParseError> {
        if self.eat_operator(["not", "!"]) {
            return Ok(InputExpression::not(self.parse_unary()?));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<InputExpression, ParseError> {
        if self.eat("(") {
            let inner = self.parse_or()?;
            if !self.eat(")") {
                return Err(ParseError::UnclosedParen {
                    found: self.peek().unwrap_or("end of input").to_string(),
                });
            }
            return Ok(inner);
        }

        let token = self.peek().ok_or(ParseError::UnexpectedEnd)?.to_string();
        match classify_token(&token) {
            TokenKind::Operator => return Err(ParseError::UnexpectedOperator(token)),
            TokenKind::RParen => return Err(ParseError::UnexpectedToken(token)),
            TokenKind::LParen | TokenKind::Operand => {}
        }
        self.pos += 1;
        let input = parse_single_input(&token)?;
        self.inputs.push(input.clone());
        Ok(InputExpression::Leaf(input))
    }
}

/// Parse raw arguments into the flat leaf list and the expression tree.
pub fn parse_expression<S: AsRef<str>>(args: &[S]) -> Result<ParsedQuery, ParseError> {
    let tokens = insert_implicit_ors(tokenize_args(args));
    if tokens.is_empty() {
        return Ok(ParsedQuery::default());
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        inputs: Vec::new(),
    };
    let expression = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(ParseError::UnexpectedToken(extra.to_string()));
    }

    Ok(ParsedQuery {
        inputs: parser.inputs,
        expression: Some(expression),
    })
}
