//! A small reference [`ExpressionEngine`] implementation.
//!
//! This is deliberately not a general JSON-processor language — it covers
//! only the fragment of syntax this crate's own mapping/selector tests
//! exercise: dotted path access (with `.item` resolved against bindings
//! before falling back to the root record), string/bool/number/null
//! literals, list (`[...]`) and object (`{"key": ...}`) literals whose
//! elements/values may themselves be arbitrary expressions, equality/
//! inequality, and boolean `&&`/`||`/`!`. Production deployments are
//! expected to supply a fuller implementation (e.g. a JQ-compatible crate)
//! behind the same [`ExpressionEngine`] trait.

use crate::domain::errors::ExpressionError;
use crate::domain::ports::expression::{Bindings, CompiledExpr, ExpressionEngine};
use serde_json::Value;

#[derive(Debug, Clone)]
enum Ast {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Ast>),
    Eq(Box<Ast>, Box<Ast>),
    NotEq(Box<Ast>, Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    List(Vec<Ast>),
    Object(Vec<(String, Ast)>),
}

struct MiniCompiled {
    ast: Ast,
}

impl CompiledExpr for MiniCompiled {
    fn eval(&self, root: &Value, bindings: &Bindings) -> Result<Value, ExpressionError> {
        eval_ast(&self.ast, root, bindings)
    }
}

/// The reference [`ExpressionEngine`] implementation used by this crate's
/// test suite.
#[derive(Debug, Default, Clone, Copy)]
pub struct MiniExpressionEngine;

impl ExpressionEngine for MiniExpressionEngine {
    fn compile(&self, expr: &str) -> Result<Box<dyn CompiledExpr>, ExpressionError> {
        let ast = parse(expr)?;
        Ok(Box::new(MiniCompiled { ast }))
    }
}

fn eval_ast(ast: &Ast, root: &Value, bindings: &Bindings) -> Result<Value, ExpressionError> {
    match ast {
        Ast::Literal(v) => Ok(v.clone()),
        Ast::Path(segments) => Ok(eval_path(segments, root, bindings)),
        Ast::Not(inner) => {
            let v = eval_ast(inner, root, bindings)?;
            Ok(Value::Bool(!truthy(&v)))
        }
        Ast::Eq(a, b) => {
            let (a, b) = (eval_ast(a, root, bindings)?, eval_ast(b, root, bindings)?);
            Ok(Value::Bool(a == b))
        }
        Ast::NotEq(a, b) => {
            let (a, b) = (eval_ast(a, root, bindings)?, eval_ast(b, root, bindings)?);
            Ok(Value::Bool(a != b))
        }
        Ast::And(a, b) => {
            let a = eval_ast(a, root, bindings)?;
            if !truthy(&a) {
                return Ok(Value::Bool(false));
            }
            let b = eval_ast(b, root, bindings)?;
            Ok(Value::Bool(truthy(&b)))
        }
        Ast::Or(a, b) => {
            let a = eval_ast(a, root, bindings)?;
            if truthy(&a) {
                return Ok(Value::Bool(true));
            }
            let b = eval_ast(b, root, bindings)?;
            Ok(Value::Bool(truthy(&b)))
        }
        Ast::List(items) => {
            let values = items
                .iter()
                .map(|item| eval_ast(item, root, bindings))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(values))
        }
        Ast::Object(entries) => {
            let mut map = serde_json::Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), eval_ast(value, root, bindings)?);
            }
            Ok(Value::Object(map))
        }
    }
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Bool(false) | Value::Null)
}

fn eval_path(segments: &[String], root: &Value, bindings: &Bindings) -> Value {
    if segments.is_empty() {
        return root.clone();
    }
    let (first, rest) = segments.split_first().expect("checked non-empty above");
    let mut current = match bindings.get(first) {
        Some(bound) => bound.clone(),
        None => index(root, first),
    };
    for segment in rest {
        current = index(&current, segment);
    }
    current
}

fn index(value: &Value, key: &str) -> Value {
    value.get(key).cloned().unwrap_or(Value::Null)
}

// --- Parser -----------------------------------------------------------

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    src: &'a str,
}

fn parse(expr: &str) -> Result<Ast, ExpressionError> {
    let trimmed = expr.trim();
    let mut parser = Parser {
        chars: trimmed.chars().peekable(),
        src: trimmed,
    };
    let ast = parser.parse_or()?;
    parser.skip_ws();
    if parser.chars.peek().is_some() {
        return Err(ExpressionError::Compile {
            expr: expr.to_string(),
            reason: "unexpected trailing input".to_string(),
        });
    }
    Ok(ast)
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn starts_with(&mut self, tok: &str) -> bool {
        self.skip_ws();
        let rest: String = self.chars.clone().collect();
        rest.starts_with(tok)
    }

    fn consume(&mut self, tok: &str) {
        for _ in 0..tok.chars().count() {
            self.chars.next();
        }
    }

    fn parse_or(&mut self) -> Result<Ast, ExpressionError> {
        let mut lhs = self.parse_and()?;
        loop {
            if self.starts_with("||") {
                self.consume("||");
                let rhs = self.parse_and()?;
                lhs = Ast::Or(Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Ast, ExpressionError> {
        let mut lhs = self.parse_equality()?;
        loop {
            if self.starts_with("&&") {
                self.consume("&&");
                let rhs = self.parse_equality()?;
                lhs = Ast::And(Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Ast, ExpressionError> {
        let lhs = self.parse_unary()?;
        if self.starts_with("==") {
            self.consume("==");
            let rhs = self.parse_unary()?;
            return Ok(Ast::Eq(Box::new(lhs), Box::new(rhs)));
        }
        if self.starts_with("!=") {
            self.consume("!=");
            let rhs = self.parse_unary()?;
            return Ok(Ast::NotEq(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Ast, ExpressionError> {
        self.skip_ws();
        if self.starts_with("!") && !self.starts_with("!=") {
            self.consume("!");
            let inner = self.parse_unary()?;
            return Ok(Ast::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Ast, ExpressionError> {
        self.skip_ws();
        match self.chars.peek() {
            Some('(') => {
                self.chars.next();
                let inner = self.parse_or()?;
                self.skip_ws();
                match self.chars.next() {
                    Some(')') => Ok(inner),
                    _ => Err(self.err("expected closing parenthesis")),
                }
            }
            Some('"') => self.parse_string(),
            Some('.') => self.parse_path(),
            Some('[') => self.parse_list(),
            Some('{') => self.parse_object(),
            Some(c) if c.is_ascii_digit() || *c == '-' => self.parse_number(),
            _ => self.parse_keyword(),
        }
    }

    fn parse_list(&mut self) -> Result<Ast, ExpressionError> {
        self.chars.next(); // opening bracket
        let mut items = Vec::new();
        self.skip_ws();
        if self.chars.peek() == Some(&']') {
            self.chars.next();
            return Ok(Ast::List(items));
        }
        loop {
            items.push(self.parse_or()?);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => continue,
                Some(']') => break,
                _ => return Err(self.err("expected `,` or `]` in list literal")),
            }
        }
        Ok(Ast::List(items))
    }

    fn parse_object(&mut self) -> Result<Ast, ExpressionError> {
        self.chars.next(); // opening brace
        let mut entries = Vec::new();
        self.skip_ws();
        if self.chars.peek() == Some(&'}') {
            self.chars.next();
            return Ok(Ast::Object(entries));
        }
        loop {
            self.skip_ws();
            let key = match self.chars.peek() {
                Some('"') => match self.parse_string()? {
                    Ast::Literal(Value::String(s)) => s,
                    _ => unreachable!("parse_string always returns a string literal"),
                },
                _ => return Err(self.err("expected a quoted key in object literal")),
            };
            self.skip_ws();
            match self.chars.next() {
                Some(':') => {}
                _ => return Err(self.err("expected `:` after object key")),
            }
            let value = self.parse_or()?;
            entries.push((key, value));
            self.skip_ws();
            match self.chars.next() {
                Some(',') => continue,
                Some('}') => break,
                _ => return Err(self.err("expected `,` or `}` in object literal")),
            }
        }
        Ok(Ast::Object(entries))
    }

    fn parse_string(&mut self) -> Result<Ast, ExpressionError> {
        self.chars.next(); // opening quote
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some('"') => break,
                Some(c) => s.push(c),
                None => return Err(self.err("unterminated string literal")),
            }
        }
        Ok(Ast::Literal(Value::String(s)))
    }

    fn parse_path(&mut self) -> Result<Ast, ExpressionError> {
        let mut segments = Vec::new();
        while self.chars.peek() == Some(&'.') {
            self.chars.next();
            let mut seg = String::new();
            while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_') {
                seg.push(self.chars.next().expect("peeked"));
            }
            if seg.is_empty() {
                return Err(self.err("expected field name after `.`"));
            }
            segments.push(seg);
        }
        Ok(Ast::Path(segments))
    }

    fn parse_number(&mut self) -> Result<Ast, ExpressionError> {
        let mut s = String::new();
        if self.chars.peek() == Some(&'-') {
            s.push(self.chars.next().expect("peeked"));
        }
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
            s.push(self.chars.next().expect("peeked"));
        }
        let n: f64 = s
            .parse()
            .map_err(|_| self.err(&format!("invalid number literal `{s}`")))?;
        Ok(Ast::Literal(
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        ))
    }

    fn parse_keyword(&mut self) -> Result<Ast, ExpressionError> {
        let rest: String = self.chars.clone().collect();
        if rest.starts_with("true") {
            self.consume("true");
            return Ok(Ast::Literal(Value::Bool(true)));
        }
        if rest.starts_with("false") {
            self.consume("false");
            return Ok(Ast::Literal(Value::Bool(false)));
        }
        if rest.starts_with("null") {
            self.consume("null");
            return Ok(Ast::Literal(Value::Null));
        }
        Err(self.err("expected a literal, path, or parenthesized expression"))
    }

    fn err(&self, reason: &str) -> ExpressionError {
        ExpressionError::Compile {
            expr: self.src.to_string(),
            reason: reason.to_string(),
        }
    }
}
