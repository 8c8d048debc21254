//! SQL-like boolean filter expressions used as push-down predicates.
//!
//! Supported grammar (keywords are case-insensitive):
//!
//! ```text
//! expr    := and ("or" and)*
//! and     := not ("and" not)*
//! not     := "not" not | primary
//! primary := "(" expr ")" | "true" | "false"
//!          | column cmp literal
//!          | column ["not"] "in" "(" literal ("," literal)* ")"
//!          | column "is" ["not"] "null"
//! cmp     := "=" | "!=" | "<>" | "<" | "<=" | ">" | ">="
//! literal := 'single quoted' | number | "true" | "false"
//! ```
//!
//! Comparisons against a null or missing column are false, `not in` included.
//!
//! ```
//! use trending_etl::predicate::Predicate;
//! use trending_etl::Record;
//!
//! let p = Predicate::parse("region in ('ca','gb','us')").unwrap();
//! assert!(p.matches(&Record::new().with("region", "ca")));
//! assert!(!p.matches(&Record::new().with("region", "de")));
//! ```

use crate::record::Record;
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at offset {offset})")]
pub struct PredicateError {
    pub message: String,
    pub offset: usize,
}

impl PredicateError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(bool),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        column: String,
        op: CmpOp,
        literal: Value,
    },
    InList {
        column: String,
        list: Vec<Value>,
        negated: bool,
    },
    IsNull {
        column: String,
        negated: bool,
    },
}

/// A parsed predicate together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    text: String,
    expr: Expr,
}

impl Predicate {
    /// Parse a predicate expression.
    ///
    /// # Errors
    /// Returns a [`PredicateError`] pointing at the offending offset.
    pub fn parse(text: &str) -> Result<Self, PredicateError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: text.len(),
        };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(PredicateError::new(
                format!("unexpected trailing token {:?}", tok.kind),
                tok.offset,
            ));
        }
        Ok(Self {
            text: text.to_string(),
            expr,
        })
    }

    /// Always-true predicate (no filtering).
    #[must_use]
    pub fn always() -> Self {
        Self {
            text: "true".to_string(),
            expr: Expr::Const(true),
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Columns referenced anywhere in the expression.
    #[must_use]
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_columns(&self.expr, &mut out);
        out
    }

    /// Evaluate against a record.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        eval(&self.expr, &|name| record.get(name).clone())
    }

    /// Evaluate against Hive-style partition values (`region=ca` → `{"region": "ca"}`).
    #[must_use]
    pub fn matches_partition(&self, values: &BTreeMap<String, String>) -> bool {
        eval(&self.expr, &|name| {
            values
                .get(name)
                .map_or(Value::Null, |v| Value::String(v.clone()))
        })
    }
}

fn collect_columns(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Const(_) => {}
        Expr::And(a, b) | Expr::Or(a, b) => {
            collect_columns(a, out);
            collect_columns(b, out);
        }
        Expr::Not(e) => collect_columns(e, out),
        Expr::Compare { column, .. }
        | Expr::InList { column, .. }
        | Expr::IsNull { column, .. } => {
            out.insert(column.clone());
        }
    }
}

fn eval(expr: &Expr, lookup: &dyn Fn(&str) -> Value) -> bool {
    match expr {
        Expr::Const(b) => *b,
        Expr::And(a, b) => eval(a, lookup) && eval(b, lookup),
        Expr::Or(a, b) => eval(a, lookup) || eval(b, lookup),
        Expr::Not(e) => !eval(e, lookup),
        Expr::Compare {
            column,
            op,
            literal,
        } => {
            let value = lookup(column);
            compare(&value, literal).is_some_and(|ord| match op {
                CmpOp::Eq => ord == Ordering::Equal,
                CmpOp::NotEq => ord != Ordering::Equal,
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::LtEq => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::GtEq => ord != Ordering::Less,
            })
        }
        Expr::InList {
            column,
            list,
            negated,
        } => {
            let value = lookup(column);
            if value.is_null() {
                return false;
            }
            let found = list
                .iter()
                .any(|lit| compare(&value, lit) == Some(Ordering::Equal));
            found != *negated
        }
        Expr::IsNull { column, negated } => lookup(column).is_null() != *negated,
    }
}

/// Order a column value against a literal. `None` when either side is null
/// or the two cannot be compared.
fn compare(value: &Value, literal: &Value) -> Option<Ordering> {
    if value.is_null() || literal.is_null() {
        return None;
    }
    if let Value::Boolean(lit) = literal {
        return value.cast(&crate::DataType::Boolean).and_then(|v| match v {
            Value::Boolean(b) => Some(b.cmp(lit)),
            _ => None,
        });
    }
    let as_number = |v: &Value| match v {
        Value::Long(_) | Value::Double(_) | Value::String(_) => match v
            .cast(&crate::DataType::Double)
        {
            Some(Value::Double(d)) => Some(d),
            _ => None,
        },
        _ => None,
    };
    if let (Some(a), Some(b)) = (as_number(value), as_number(literal)) {
        return a.partial_cmp(&b);
    }
    Some(value.to_text().cmp(&literal.to_text()))
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Number(String),
    Op(CmpOp),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(text: &str) -> Result<Vec<Token>, PredicateError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (offset, c) = chars[i];
        let kind = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '(' => {
                i += 1;
                TokenKind::LParen
            }
            ')' => {
                i += 1;
                TokenKind::RParen
            }
            ',' => {
                i += 1;
                TokenKind::Comma
            }
            '=' => {
                i += 1;
                TokenKind::Op(CmpOp::Eq)
            }
            '!' => {
                if chars.get(i + 1).map(|&(_, c)| c) == Some('=') {
                    i += 2;
                    TokenKind::Op(CmpOp::NotEq)
                } else {
                    return Err(PredicateError::new("expected `!=`", offset));
                }
            }
            '<' => match chars.get(i + 1).map(|&(_, c)| c) {
                Some('=') => {
                    i += 2;
                    TokenKind::Op(CmpOp::LtEq)
                }
                Some('>') => {
                    i += 2;
                    TokenKind::Op(CmpOp::NotEq)
                }
                _ => {
                    i += 1;
                    TokenKind::Op(CmpOp::Lt)
                }
            },
            '>' => {
                if chars.get(i + 1).map(|&(_, c)| c) == Some('=') {
                    i += 2;
                    TokenKind::Op(CmpOp::GtEq)
                } else {
                    i += 1;
                    TokenKind::Op(CmpOp::Gt)
                }
            }
            '\'' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(PredicateError::new("unterminated string literal", offset));
                        }
                        Some(&(_, '\'')) => {
                            if chars.get(i + 1).map(|&(_, c)| c) == Some('\'') {
                                s.push('\'');
                                i += 2;
                            } else {
                                i += 1;
                                break;
                            }
                        }
                        Some(&(_, c)) => {
                            s.push(c);
                            i += 1;
                        }
                    }
                }
                TokenKind::Str(s)
            }
            '`' => {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j].1 != '`' {
                    j += 1;
                }
                if j == chars.len() {
                    return Err(PredicateError::new("unterminated quoted identifier", offset));
                }
                let name: String = chars[start..j].iter().map(|&(_, c)| c).collect();
                i = j + 1;
                TokenKind::Ident(name)
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                let lit: String = chars[start..i].iter().map(|&(_, c)| c).collect();
                if lit.parse::<f64>().is_err() {
                    return Err(PredicateError::new(format!("invalid number `{lit}`"), offset));
                }
                TokenKind::Number(lit)
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '.')
                {
                    i += 1;
                }
                TokenKind::Ident(chars[start..i].iter().map(|&(_, c)| c).collect())
            }
            other => {
                return Err(PredicateError::new(
                    format!("unexpected character `{other}`"),
                    offset,
                ));
            }
        };
        tokens.push(Token { kind, offset });
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |t| t.offset)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(
            self.peek(),
            Some(Token { kind: TokenKind::Ident(s), .. }) if s.eq_ignore_ascii_case(kw)
        )
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), PredicateError> {
        let offset = self.offset();
        match self.next() {
            Some(tok) if &tok.kind == kind => Ok(()),
            _ => Err(PredicateError::new(format!("expected {what}"), offset)),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, PredicateError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, PredicateError> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, PredicateError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, PredicateError> {
        let offset = self.offset();
        match self.next() {
            Some(Token {
                kind: TokenKind::LParen,
                ..
            }) => {
                let inner = self.parse_or()?;
                self.expect(&TokenKind::RParen, "`)`")?;
                Ok(inner)
            }
            Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) => {
                if name.eq_ignore_ascii_case("true") {
                    return Ok(Expr::Const(true));
                }
                if name.eq_ignore_ascii_case("false") {
                    return Ok(Expr::Const(false));
                }
                if is_reserved(&name) {
                    return Err(PredicateError::new(
                        format!("expected column name, found keyword `{name}`"),
                        offset,
                    ));
                }
                self.parse_condition(name)
            }
            Some(tok) => Err(PredicateError::new(
                format!("unexpected token {:?}", tok.kind),
                tok.offset,
            )),
            None => Err(PredicateError::new("unexpected end of expression", offset)),
        }
    }

    fn parse_condition(&mut self, column: String) -> Result<Expr, PredicateError> {
        if self.eat_keyword("is") {
            let negated = self.eat_keyword("not");
            if !self.eat_keyword("null") {
                return Err(PredicateError::new("expected `null`", self.offset()));
            }
            return Ok(Expr::IsNull { column, negated });
        }
        let negated = self.eat_keyword("not");
        if self.eat_keyword("in") {
            self.expect(&TokenKind::LParen, "`(` after `in`")?;
            let mut list = vec![self.parse_literal()?];
            while matches!(
                self.peek(),
                Some(Token {
                    kind: TokenKind::Comma,
                    ..
                })
            ) {
                self.pos += 1;
                list.push(self.parse_literal()?);
            }
            self.expect(&TokenKind::RParen, "`)` closing the `in` list")?;
            return Ok(Expr::InList {
                column,
                list,
                negated,
            });
        }
        if negated {
            return Err(PredicateError::new("expected `in` after `not`", self.offset()));
        }
        let offset = self.offset();
        match self.next() {
            Some(Token {
                kind: TokenKind::Op(op),
                ..
            }) => {
                let literal = self.parse_literal()?;
                Ok(Expr::Compare {
                    column,
                    op,
                    literal,
                })
            }
            _ => Err(PredicateError::new(
                format!("expected comparison, `in` or `is` after column `{column}`"),
                offset,
            )),
        }
    }

    fn parse_literal(&mut self) -> Result<Value, PredicateError> {
        let offset = self.offset();
        match self.next() {
            Some(Token {
                kind: TokenKind::Str(s),
                ..
            }) => Ok(Value::String(s)),
            Some(Token {
                kind: TokenKind::Number(n),
                ..
            }) => Ok(n
                .parse::<i64>()
                .map(Value::Long)
                .or_else(|_| n.parse::<f64>().map(Value::Double))
                .unwrap_or(Value::Null)),
            Some(Token {
                kind: TokenKind::Ident(s),
                ..
            }) if s.eq_ignore_ascii_case("true") => Ok(Value::Boolean(true)),
            Some(Token {
                kind: TokenKind::Ident(s),
                ..
            }) if s.eq_ignore_ascii_case("false") => Ok(Value::Boolean(false)),
            _ => Err(PredicateError::new("expected a literal", offset)),
        }
    }
}

fn is_reserved(word: &str) -> bool {
    ["and", "or", "not", "in", "is", "null"]
        .iter()
        .any(|kw| word.eq_ignore_ascii_case(kw))
}
