//! # Compute Grammar
//!
//! `$compute` clauses are parsed into a small tagged-variant tree
//! ([`ComputeExpr`]) by a dedicated tokenizer and recursive-descent parser.
//! Which functions exist, and what arguments they take, is data: see
//! [`CATALOGUE`]. Anything outside the catalogue is dropped.
//!
//! ```text
//! clause  := expr 'as' ident
//! expr    := operand [ ('add'|'sub'|'mul'|'div') number ]
//! operand := ident '(' [arg {',' arg}] ')' | ident | literal
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Functions and operators recognized in `$compute`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeFunction {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
    ToLower,
    ToUpper,
    Substring,
    Trim,
    Length,
    IndexOf,
    Replace,
    ReplaceAll,
    StartsWith,
    EndsWith,
    Year,
    Month,
    Day,
    Round,
    Floor,
    Ceiling,
}

/// Accepted shape of one argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Field reference or nested call
    Expr,
    /// Quoted string literal
    Text,
    /// Non-negative integer literal
    Int,
    /// Any numeric literal
    Number,
    /// Expression or literal
    Any,
}

impl ArgKind {
    fn accepts(&self, expr: &ComputeExpr) -> bool {
        match (self, expr) {
            (ArgKind::Any, _) => true,
            (ArgKind::Expr, ComputeExpr::Field(_) | ComputeExpr::Call { .. }) => true,
            (ArgKind::Text, ComputeExpr::Literal(Value::String(_))) => true,
            (ArgKind::Int, ComputeExpr::Literal(Value::Number(n))) => n.as_u64().is_some(),
            (ArgKind::Number, ComputeExpr::Literal(Value::Number(_))) => true,
            _ => false,
        }
    }
}

/// One catalogue row
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    /// Name as written in the query (matched case-insensitively)
    pub name: &'static str,
    pub function: ComputeFunction,
    /// Written infix (`price mul 2`) rather than as a call
    pub infix: bool,
    /// Argument shapes; trailing entries past `min_args` are optional
    pub params: &'static [ArgKind],
    pub min_args: usize,
}

impl FunctionSpec {
    fn accepts(&self, args: &[ComputeExpr]) -> bool {
        args.len() >= self.min_args
            && args.len() <= self.params.len()
            && args.iter().zip(self.params).all(|(a, k)| k.accepts(a))
    }
}

const UNARY: &[ArgKind] = &[ArgKind::Expr];
const BINARY_NUMERIC: &[ArgKind] = &[ArgKind::Expr, ArgKind::Number];
const WITH_TEXT: &[ArgKind] = &[ArgKind::Expr, ArgKind::Text];

/// Every recognized compute function
pub const CATALOGUE: &[FunctionSpec] = &[
    FunctionSpec { name: "add", function: ComputeFunction::Add, infix: true, params: BINARY_NUMERIC, min_args: 2 },
    FunctionSpec { name: "sub", function: ComputeFunction::Sub, infix: true, params: BINARY_NUMERIC, min_args: 2 },
    FunctionSpec { name: "mul", function: ComputeFunction::Mul, infix: true, params: BINARY_NUMERIC, min_args: 2 },
    FunctionSpec { name: "div", function: ComputeFunction::Div, infix: true, params: BINARY_NUMERIC, min_args: 2 },
    FunctionSpec { name: "concat", function: ComputeFunction::Concat, infix: false, params: &[ArgKind::Any, ArgKind::Any], min_args: 2 },
    FunctionSpec { name: "tolower", function: ComputeFunction::ToLower, infix: false, params: UNARY, min_args: 1 },
    FunctionSpec { name: "toupper", function: ComputeFunction::ToUpper, infix: false, params: UNARY, min_args: 1 },
    FunctionSpec { name: "substring", function: ComputeFunction::Substring, infix: false, params: &[ArgKind::Expr, ArgKind::Int, ArgKind::Int], min_args: 2 },
    FunctionSpec { name: "trim", function: ComputeFunction::Trim, infix: false, params: UNARY, min_args: 1 },
    FunctionSpec { name: "length", function: ComputeFunction::Length, infix: false, params: UNARY, min_args: 1 },
    FunctionSpec { name: "indexof", function: ComputeFunction::IndexOf, infix: false, params: WITH_TEXT, min_args: 2 },
    FunctionSpec { name: "replace", function: ComputeFunction::Replace, infix: false, params: &[ArgKind::Expr, ArgKind::Text, ArgKind::Text], min_args: 3 },
    FunctionSpec { name: "replaceall", function: ComputeFunction::ReplaceAll, infix: false, params: &[ArgKind::Expr, ArgKind::Text, ArgKind::Text], min_args: 3 },
    FunctionSpec { name: "startswith", function: ComputeFunction::StartsWith, infix: false, params: WITH_TEXT, min_args: 2 },
    FunctionSpec { name: "endswith", function: ComputeFunction::EndsWith, infix: false, params: WITH_TEXT, min_args: 2 },
    FunctionSpec { name: "year", function: ComputeFunction::Year, infix: false, params: UNARY, min_args: 1 },
    FunctionSpec { name: "month", function: ComputeFunction::Month, infix: false, params: UNARY, min_args: 1 },
    FunctionSpec { name: "day", function: ComputeFunction::Day, infix: false, params: UNARY, min_args: 1 },
    FunctionSpec { name: "round", function: ComputeFunction::Round, infix: false, params: UNARY, min_args: 1 },
    FunctionSpec { name: "floor", function: ComputeFunction::Floor, infix: false, params: UNARY, min_args: 1 },
    FunctionSpec { name: "ceiling", function: ComputeFunction::Ceiling, infix: false, params: UNARY, min_args: 1 },
];

fn lookup(name: &str, infix: bool) -> Option<&'static FunctionSpec> {
    CATALOGUE
        .iter()
        .find(|spec| spec.infix == infix && spec.name.eq_ignore_ascii_case(name))
}

/// Parsed compute expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ComputeExpr {
    /// Dotted field path
    Field(String),
    Literal(Value),
    Call {
        function: ComputeFunction,
        args: Vec<ComputeExpr>,
    },
}

/// `<expr> as <alias>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeClause {
    pub expression: ComputeExpr,
    pub alias: String,
}

impl ComputeClause {
    /// Parse a single clause; `None` when it is outside the grammar
    pub fn parse(input: &str) -> Option<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expression = parser.expr()?;
        parser.keyword("as")?;
        let alias = match parser.next()? {
            Token::Ident(name) if is_plain_identifier(&name) => name,
            _ => return None,
        };
        if parser.pos != parser.tokens.len() {
            return None;
        }
        Some(Self { expression, alias })
    }

    /// Parse a whole `$compute` value, dropping clauses that do not parse
    pub fn parse_list(input: &str) -> Vec<Self> {
        split_top_level(input)
            .into_iter()
            .filter_map(Self::parse)
            .collect()
    }
}

/// Split on commas that are outside parentheses and quotes
pub fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            ',' if !in_quote && depth == 0 => {
                parts.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ==================
// Tokenizer
// ==================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(Value),
    Text(String),
    Open,
    Close,
    Comma,
}

fn tokenize(input: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return None,
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Text(text));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(parse_number(&raw)?));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '/' | '.'))
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return None,
        }
    }

    Some(tokens)
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

/// Deepest allowed nesting of function calls in one clause
pub const MAX_CALL_DEPTH: usize = 16;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn keyword(&mut self, word: &str) -> Option<()> {
        match self.next()? {
            Token::Ident(w) if w.eq_ignore_ascii_case(word) => Some(()),
            _ => None,
        }
    }

    fn expr(&mut self) -> Option<ComputeExpr> {
        let left = self.operand()?;

        let infix = match self.peek() {
            Some(Token::Ident(w)) => lookup(w, true),
            _ => None,
        };
        let Some(spec) = infix else {
            return Some(left);
        };
        self.pos += 1;

        let right = match self.next()? {
            Token::Number(n) => ComputeExpr::Literal(n),
            _ => return None,
        };
        let args = vec![left, right];
        spec.accepts(&args).then(|| ComputeExpr::Call {
            function: spec.function,
            args,
        })
    }

    fn operand(&mut self) -> Option<ComputeExpr> {
        match self.next()? {
            Token::Number(n) => Some(ComputeExpr::Literal(n)),
            Token::Text(s) => Some(ComputeExpr::Literal(Value::String(s))),
            Token::Ident(name) => {
                if self.peek() == Some(&Token::Open) {
                    if self.depth >= MAX_CALL_DEPTH {
                        return None;
                    }
                    self.pos += 1;
                    self.depth += 1;
                    let call = self.call(&name);
                    self.depth -= 1;
                    call
                } else {
                    Some(ComputeExpr::Field(name.replace('/', ".")))
                }
            }
            _ => None,
        }
    }

    fn call(&mut self, name: &str) -> Option<ComputeExpr> {
        let spec = lookup(name, false)?;
        let mut args = Vec::new();

        if self.peek() == Some(&Token::Close) {
            self.pos += 1;
        } else {
            loop {
                args.push(self.expr()?);
                match self.next()? {
                    Token::Comma => continue,
                    Token::Close => break,
                    _ => return None,
                }
            }
        }

        spec.accepts(&args).then(|| ComputeExpr::Call {
            function: spec.function,
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(function: ComputeFunction, args: Vec<ComputeExpr>) -> ComputeExpr {
        ComputeExpr::Call { function, args }
    }

    fn field(name: &str) -> ComputeExpr {
        ComputeExpr::Field(name.to_string())
    }

    #[test]
    fn test_infix_multiplication() {
        let clause = ComputeClause::parse("price mul 2 as doublePrice").unwrap();
        assert_eq!(clause.alias, "doublePrice");
        assert_eq!(
            clause.expression,
            call(ComputeFunction::Mul, vec![field("price"), ComputeExpr::Literal(json!(2))])
        );
    }

    #[test]
    fn test_concat_with_literal() {
        let clause = ComputeClause::parse("concat(name,'!') as shout").unwrap();
        assert_eq!(
            clause.expression,
            call(ComputeFunction::Concat, vec![field("name"), ComputeExpr::Literal(json!("!"))])
        );
    }

    #[test]
    fn test_nested_lower_of_substring() {
        let clause = ComputeClause::parse("tolower(substring(name,0,3)) as lowpre").unwrap();
        let inner = call(
            ComputeFunction::Substring,
            vec![field("name"), ComputeExpr::Literal(json!(0)), ComputeExpr::Literal(json!(3))],
        );
        assert_eq!(clause.expression, call(ComputeFunction::ToLower, vec![inner]));
    }

    #[test]
    fn test_function_names_are_case_insensitive() {
        assert!(ComputeClause::parse("ToUpper(name) as up").is_some());
        assert!(ComputeClause::parse("price MUL 2 AS p").is_some());
    }

    #[test]
    fn test_quote_escapes_in_literals() {
        let clause = ComputeClause::parse("replace(name,'''','x') as r").unwrap();
        match clause.expression {
            ComputeExpr::Call { args, .. } => assert_eq!(args[1], ComputeExpr::Literal(json!("'"))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_forms_are_dropped() {
        assert!(ComputeClause::parse("frobnicate(name) as x").is_none());
        assert!(ComputeClause::parse("tolower(name)").is_none());
        assert!(ComputeClause::parse("substring(name,'a',2) as x").is_none());
        assert!(ComputeClause::parse("tolower(name,name) as x").is_none());
        assert!(ComputeClause::parse("price mul 'x' as x").is_none());
        assert!(ComputeClause::parse("tolower(name) as x extra").is_none());
    }

    #[test]
    fn test_parse_list_splits_at_top_level() {
        let clauses = ComputeClause::parse_list("concat(name,', ') as a, price mul 2 as b, bogus");
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].alias, "a");
        assert_eq!(clauses[1].alias, "b");
    }

    #[test]
    fn test_call_nesting_is_capped() {
        let nested = |depth: usize| {
            format!("{}name{} as x", "tolower(".repeat(depth), ")".repeat(depth))
        };
        assert!(ComputeClause::parse(&nested(MAX_CALL_DEPTH)).is_some());
        assert!(ComputeClause::parse(&nested(MAX_CALL_DEPTH + 1)).is_none());
        assert!(ComputeClause::parse(&nested(10_000)).is_none());
    }

    #[test]
    fn test_member_paths_become_dotted() {
        let clause = ComputeClause::parse("length(customer/name) as n").unwrap();
        assert_eq!(clause.expression, call(ComputeFunction::Length, vec![field("customer.name")]));
    }
}
