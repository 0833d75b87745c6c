//! # Filter Grammar
//!
//! Turns an OData `$filter` expression into a native predicate tree.
//!
//! The grammar is a collaborator: callers may inject any [`FilterGrammar`].
//! [`ODataFilterGrammar`] covers comparisons, `in`, `and`/`or`/`not`,
//! parentheses, and the `contains`/`startswith`/`endswith` string
//! predicates, which compile to `$regex`.

use std::fmt;

use serde_json::{json, Map, Value};

use crate::errors::ODataError;

/// Grammar failure with the byte offset where parsing stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarError {
    pub position: usize,
    pub message: String,
}

impl GrammarError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for GrammarError {}

/// Deepest allowed nesting of parentheses and `not`
pub const MAX_NESTING_DEPTH: usize = 64;

impl From<GrammarError> for ODataError {
    fn from(e: GrammarError) -> Self {
        ODataError::BadRequest(e.to_string())
    }
}

/// String → predicate tree
pub trait FilterGrammar: Send + Sync {
    fn parse(&self, input: &str) -> Result<Value, GrammarError>;
}

/// Default `$filter` grammar
#[derive(Debug, Clone, Copy, Default)]
pub struct ODataFilterGrammar;

impl FilterGrammar for ODataFilterGrammar {
    fn parse(&self, input: &str) -> Result<Value, GrammarError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: input.len(),
            depth: 0,
        };
        let tree = parser.or_expr()?;
        match parser.peek() {
            None => Ok(tree),
            Some(t) => Err(GrammarError::new(t.offset, "unexpected trailing input")),
        }
    }
}

// ==================
// Tokenizer
// ==================

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    Ident(String),
    Literal(Value),
    Open,
    Close,
    Comma,
}

#[derive(Debug, Clone)]
struct Token {
    kind: Kind,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, GrammarError> {
    let bytes: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let (offset, c) = bytes[i];
        let kind = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '(' => {
                i += 1;
                Kind::Open
            }
            ')' => {
                i += 1;
                Kind::Close
            }
            ',' => {
                i += 1;
                Kind::Comma
            }
            '\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err(GrammarError::new(offset, "unterminated string literal")),
                        Some((_, '\'')) if matches!(bytes.get(i + 1), Some((_, '\''))) => {
                            text.push('\'');
                            i += 2;
                        }
                        Some((_, '\'')) => {
                            i += 1;
                            break;
                        }
                        Some((_, ch)) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                Kind::Literal(Value::String(text))
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < bytes.len() && (bytes[i].1.is_ascii_digit() || matches!(bytes[i].1, '.' | 'e' | 'E')) {
                    i += 1;
                }
                let raw: String = bytes[start..i].iter().map(|(_, ch)| ch).collect();
                Kind::Literal(parse_number(&raw).ok_or_else(|| GrammarError::new(offset, "invalid number"))?)
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < bytes.len() && (bytes[i].1.is_alphanumeric() || matches!(bytes[i].1, '_' | '/' | '.' | '$')) {
                    i += 1;
                }
                Kind::Ident(bytes[start..i].iter().map(|(_, ch)| ch).collect())
            }
            other => return Err(GrammarError::new(offset, format!("unexpected character '{}'", other))),
        };
        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}

fn parse_number(raw: &str) -> Option<Value> {
    if let Ok(n) = raw.parse::<i64>() {
        return Some(Value::from(n));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

// ==================
// Parser
// ==================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.offset).unwrap_or(self.end)
    }

    fn next(&mut self) -> Result<Token, GrammarError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| GrammarError::new(self.end, "unexpected end of filter"))?;
        self.pos += 1;
        Ok(token)
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: Kind::Ident(w), .. }) if w.eq_ignore_ascii_case(word))
    }

    fn expect(&mut self, kind: Kind, what: &str) -> Result<(), GrammarError> {
        let token = self.next()?;
        if token.kind == kind {
            Ok(())
        } else {
            Err(GrammarError::new(token.offset, format!("expected {}", what)))
        }
    }

    /// Enter one nesting level; fails past [`MAX_NESTING_DEPTH`]
    fn descend(&mut self) -> Result<(), GrammarError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(GrammarError::new(self.offset(), "filter nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn or_expr(&mut self) -> Result<Value, GrammarError> {
        let mut terms = vec![self.and_expr()?];
        while self.at_keyword("or") {
            self.pos += 1;
            terms.push(self.and_expr()?);
        }
        Ok(combine("$or", terms))
    }

    fn and_expr(&mut self) -> Result<Value, GrammarError> {
        let mut terms = vec![self.unary()?];
        while self.at_keyword("and") {
            self.pos += 1;
            terms.push(self.unary()?);
        }
        Ok(combine("$and", terms))
    }

    fn unary(&mut self) -> Result<Value, GrammarError> {
        if self.at_keyword("not") {
            self.descend()?;
            self.pos += 1;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(json!({ "$nor": [inner] }));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Value, GrammarError> {
        if matches!(self.peek(), Some(Token { kind: Kind::Open, .. })) {
            self.descend()?;
            self.pos += 1;
            let inner = self.or_expr()?;
            self.expect(Kind::Close, "')'")?;
            self.depth -= 1;
            return Ok(inner);
        }

        let start = self.offset();
        let name = match self.next()?.kind {
            Kind::Ident(name) => name,
            _ => return Err(GrammarError::new(start, "expected a property or function")),
        };

        if matches!(self.peek(), Some(Token { kind: Kind::Open, .. })) {
            return self.string_predicate(&name, start);
        }

        let field = member_path(&name);
        let op_offset = self.offset();
        let op = match self.next()?.kind {
            Kind::Ident(op) => op.to_ascii_lowercase(),
            _ => return Err(GrammarError::new(op_offset, "expected an operator")),
        };

        if op == "in" {
            let values = self.literal_list()?;
            return Ok(single(field, json!({ "$in": values })));
        }

        let value = self.literal()?;
        let predicate = match op.as_str() {
            "eq" => value,
            "ne" => json!({ "$ne": value }),
            "gt" => json!({ "$gt": value }),
            "ge" => json!({ "$gte": value }),
            "lt" => json!({ "$lt": value }),
            "le" => json!({ "$lte": value }),
            other => {
                return Err(GrammarError::new(op_offset, format!("unsupported operator '{}'", other)))
            }
        };
        Ok(single(field, predicate))
    }

    /// `contains(field,'x')`, `startswith(...)`, `endswith(...)`
    fn string_predicate(&mut self, name: &str, start: usize) -> Result<Value, GrammarError> {
        let function = name.to_ascii_lowercase();
        if !matches!(function.as_str(), "contains" | "startswith" | "endswith") {
            return Err(GrammarError::new(start, format!("unsupported function '{}'", name)));
        }

        self.expect(Kind::Open, "'('")?;
        let field_offset = self.offset();
        let field = match self.next()?.kind {
            Kind::Ident(f) => member_path(&f),
            _ => return Err(GrammarError::new(field_offset, "expected a property")),
        };
        self.expect(Kind::Comma, "','")?;
        let needle_offset = self.offset();
        let needle = match self.literal()? {
            Value::String(s) => regex::escape(&s),
            _ => return Err(GrammarError::new(needle_offset, "expected a string literal")),
        };
        self.expect(Kind::Close, "')'")?;

        let pattern = match function.as_str() {
            "startswith" => format!("^{}", needle),
            "endswith" => format!("{}$", needle),
            _ => needle,
        };

        let predicate = json!({ "$regex": pattern });
        if self.at_keyword("eq") {
            // `contains(f,'x') eq true|false`
            self.pos += 1;
            let offset = self.offset();
            return match self.literal()? {
                Value::Bool(true) => Ok(single(field, predicate)),
                Value::Bool(false) => Ok(single(field, json!({ "$not": predicate }))),
                _ => Err(GrammarError::new(offset, "expected a boolean")),
            };
        }
        Ok(single(field, predicate))
    }

    fn literal(&mut self) -> Result<Value, GrammarError> {
        let token = self.next()?;
        match token.kind {
            Kind::Literal(v) => Ok(v),
            Kind::Ident(word) => match word.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => Err(GrammarError::new(token.offset, "expected a literal")),
            },
            _ => Err(GrammarError::new(token.offset, "expected a literal")),
        }
    }

    fn literal_list(&mut self) -> Result<Vec<Value>, GrammarError> {
        self.expect(Kind::Open, "'('")?;
        let mut values = vec![self.literal()?];
        loop {
            let token = self.next()?;
            match token.kind {
                Kind::Comma => values.push(self.literal()?),
                Kind::Close => return Ok(values),
                _ => return Err(GrammarError::new(token.offset, "expected ',' or ')'")),
            }
        }
    }
}

fn member_path(name: &str) -> String {
    name.replace('/', ".")
}

fn single(field: String, predicate: Value) -> Value {
    let mut map = Map::new();
    map.insert(field, predicate);
    Value::Object(map)
}

fn combine(op: &str, mut terms: Vec<Value>) -> Value {
    if terms.len() == 1 {
        return terms.remove(0);
    }
    json!({ op: terms })
}
