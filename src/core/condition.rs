//! Conditions gating conditional and iterative tasks.
//!
//! Conditions are closed values: a small expression language over context
//! fields, a named predicate registered by the host, an external event, or a
//! constant. Expressions are parsed into an [`Expr`] tree and interpreted;
//! nothing is ever compiled or executed from text.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! or      := and ( ("||" | "or") and )*
//! and     := unary ( ("&&" | "and") unary )*
//! unary   := ("!" | "not") unary | compare
//! compare := primary ( ("==" | "!=" | "<" | "<=" | ">" | ">=") primary )?
//! primary := number | string | true | false | null | field | "(" or ")"
//! field   := ident ( "." ident )*
//! ```

use crate::core::task::Context;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Gate evaluated against a workflow before a task runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Condition {
    /// Always true.
    Always,
    /// Always false.
    Never,
    /// Expression over context fields.
    Expression { expr: Expr },
    /// Host-registered predicate, looked up by name.
    Predicate { name: String },
    /// True once the named event was raised on the workflow.
    Event { name: String },
}

impl Condition {
    /// Parse an expression condition.
    pub fn expression(source: &str) -> Result<Self> {
        Ok(Self::Expression {
            expr: Expr::parse(source)?,
        })
    }

    pub fn predicate(name: &str) -> Self {
        Self::Predicate {
            name: name.to_string(),
        }
    }

    pub fn event(name: &str) -> Self {
        Self::Event {
            name: name.to_string(),
        }
    }

    /// Evaluate the condition.
    ///
    /// # Errors
    /// Returns `Error::Configuration` for a predicate name that was never
    /// registered.
    pub fn evaluate(&self, env: &ConditionEnv<'_>) -> Result<bool> {
        match self {
            Condition::Always => Ok(true),
            Condition::Never => Ok(false),
            Condition::Expression { expr } => Ok(truthy(&expr.eval(env.context))),
            Condition::Predicate { name } => env
                .predicates
                .get(name)
                .map(|p| p(env.context))
                .ok_or_else(|| Error::Configuration(format!("unknown predicate: {}", name))),
            Condition::Event { name } => Ok(env.events.contains(name)),
        }
    }
}

/// Everything a condition can observe.
pub struct ConditionEnv<'a> {
    pub context: &'a Context,
    pub events: &'a HashSet<String>,
    pub predicates: &'a PredicateRegistry,
}

/// Typed predicate over the workflow context.
pub type PredicateFn = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Named predicates available to `Condition::Predicate`.
#[derive(Clone, Default)]
pub struct PredicateRegistry {
    predicates: HashMap<String, PredicateFn>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, predicate: F)
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.to_string(), Arc::new(predicate));
    }

    pub fn get(&self, name: &str) -> Option<&PredicateFn> {
        self.predicates.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }
}

impl std::fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.predicates.keys().collect();
        names.sort();
        f.debug_struct("PredicateRegistry")
            .field("predicates", &names)
            .finish()
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Expression tree.
///
/// Serialized as its source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Expr {
    Literal(Value),
    /// Dotted path into the context.
    Field(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Parse expression source text.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::Condition(format!(
                "unexpected trailing input in '{}'",
                source
            )));
        }
        Ok(expr)
    }

    /// Evaluate against a context. Unknown fields evaluate to null.
    pub fn eval(&self, context: &Context) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Field(path) => lookup(context, path).cloned().unwrap_or(Value::Null),
            Expr::Not(inner) => Value::Bool(!truthy(&inner.eval(context))),
            Expr::And(l, r) => Value::Bool(truthy(&l.eval(context)) && truthy(&r.eval(context))),
            Expr::Or(l, r) => Value::Bool(truthy(&l.eval(context)) || truthy(&r.eval(context))),
            Expr::Compare { op, left, right } => {
                Value::Bool(compare(*op, &left.eval(context), &right.eval(context)))
            }
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Literal(Value::String(s)) => {
                write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
            }
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Field(path) => write!(f, "{}", path.join(".")),
            Expr::Not(inner) => write!(f, "(!({}))", inner),
            Expr::And(l, r) => write!(f, "({} && {})", l, r),
            Expr::Or(l, r) => write!(f, "({} || {})", l, r),
            Expr::Compare { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
        }
    }
}

impl TryFrom<String> for Expr {
    type Error = Error;

    fn try_from(source: String) -> Result<Self> {
        Expr::parse(&source)
    }
}

impl From<Expr> for String {
    fn from(expr: Expr) -> Self {
        expr.to_string()
    }
}

/// JSON truthiness: null, false, 0, "" and empty collections are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn lookup<'a>(context: &'a Context, path: &[String]) -> Option<&'a Value> {
    let (head, rest) = path.split_first()?;
    let mut current = context.get(head)?;
    for segment in rest {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    use std::cmp::Ordering;

    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    };

    match op {
        CompareOp::Eq => ordering == Some(Ordering::Equal) || (ordering.is_none() && left == right),
        CompareOp::Ne => !(ordering == Some(Ordering::Equal) || (ordering.is_none() && left == right)),
        CompareOp::Lt => ordering == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ordering == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    }
}

// ========== Lexer ==========

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Op(CompareOp),
    LParen,
    RParen,
    Dot,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(Error::Condition(format!("expected '{}{}' at {}", c, c, i)));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '!' | '=' | '<' | '>' => {
                let next_eq = chars.get(i + 1) == Some(&'=');
                let token = match (c, next_eq) {
                    ('!', true) => Token::Op(CompareOp::Ne),
                    ('!', false) => Token::Not,
                    ('=', true) => Token::Op(CompareOp::Eq),
                    ('<', true) => Token::Op(CompareOp::Le),
                    ('<', false) => Token::Op(CompareOp::Lt),
                    ('>', true) => Token::Op(CompareOp::Ge),
                    ('>', false) => Token::Op(CompareOp::Gt),
                    _ => return Err(Error::Condition(format!("unexpected '=' at {}", i))),
                };
                tokens.push(token);
                i += if next_eq { 2 } else { 1 };
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(Error::Condition("unterminated string".to_string())),
                        Some('\\') => {
                            if let Some(escaped) = chars.get(i + 1) {
                                value.push(*escaped);
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| Error::Condition(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(Error::Condition(format!(
                    "unexpected character '{}' at {}",
                    other, i
                )))
            }
        }
    }

    Ok(tokens)
}

// ========== Parser ==========

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
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

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr> {
        let left = self.parse_primary()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_primary()?;
            return Ok(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(first)) => {
                let mut path = vec![first];
                while self.peek() == Some(&Token::Dot) {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(segment)) => path.push(segment),
                        Some(Token::Number(n)) if n.fract() == 0.0 && n >= 0.0 => {
                            path.push(format!("{}", n as u64))
                        }
                        other => {
                            return Err(Error::Condition(format!(
                                "expected field name after '.', found {:?}",
                                other
                            )))
                        }
                    }
                }
                Ok(Expr::Field(path))
            }
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::Condition("expected ')'".to_string())),
                }
            }
            Some(other) => Err(Error::Condition(format!("unexpected token {:?}", other))),
            None => Err(Error::Condition("unexpected end of expression".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(pairs: &[(&str, Value)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn eval(source: &str, ctx: &Context) -> bool {
        truthy(&Expr::parse(source).unwrap().eval(ctx))
    }

    #[test]
    fn test_numeric_comparison() {
        let ctx = context(&[("count", json!(7))]);
        assert!(eval("count > 5", &ctx));
        assert!(eval("count >= 7", &ctx));
        assert!(!eval("count < 7", &ctx));
        assert!(eval("count == 7.0", &ctx));
    }

    #[test]
    fn test_string_equality() {
        let ctx = context(&[("status", json!("ready"))]);
        assert!(eval("status == 'ready'", &ctx));
        assert!(eval("status != \"done\"", &ctx));
    }

    #[test]
    fn test_boolean_operators_and_precedence() {
        let ctx = context(&[("a", json!(true)), ("b", json!(false)), ("n", json!(3))]);
        assert!(eval("a && !b", &ctx));
        assert!(eval("b || n == 3 && a", &ctx));
        assert!(!eval("(b || n == 3) && b", &ctx));
        assert!(eval("not b and a", &ctx));
    }

    #[test]
    fn test_nested_field_path() {
        let ctx = context(&[("report", json!({"rows": [1, 2], "meta": {"ok": true}}))]);
        assert!(eval("report.meta.ok", &ctx));
        assert!(eval("report.rows.1 == 2", &ctx));
    }

    #[test]
    fn test_missing_field_is_null() {
        let ctx = Context::new();
        assert!(!eval("missing", &ctx));
        assert!(eval("missing == null", &ctx));
        assert!(!eval("missing > 1", &ctx));
    }

    #[test]
    fn test_mismatched_types_never_order() {
        let ctx = context(&[("x", json!("10"))]);
        assert!(!eval("x > 5", &ctx));
        assert!(!eval("x == 10", &ctx));
    }

    #[test]
    fn test_negative_numbers() {
        let ctx = context(&[("delta", json!(-2))]);
        assert!(eval("delta < -1", &ctx));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Expr::parse("a &"), Err(Error::Condition(_))));
        assert!(matches!(Expr::parse("(a"), Err(Error::Condition(_))));
        assert!(matches!(Expr::parse("'open"), Err(Error::Condition(_))));
        assert!(matches!(Expr::parse("a b"), Err(Error::Condition(_))));
        assert!(matches!(Expr::parse(""), Err(Error::Condition(_))));
        assert!(matches!(Expr::parse("a = 1"), Err(Error::Condition(_))));
    }

    #[test]
    fn test_expr_serializes_as_source() {
        let condition = Condition::expression("count > 5 && flag").unwrap();
        let json = serde_json::to_string(&condition).unwrap();
        assert!(json.contains("\"kind\":\"expression\""));

        let parsed: Condition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, condition);
    }

    #[test]
    fn test_condition_predicate_and_event() {
        let mut predicates = PredicateRegistry::new();
        predicates.register("has_rows", |ctx| ctx.contains_key("rows"));
        let ctx = context(&[("rows", json!([1]))]);
        let mut events = HashSet::new();
        events.insert("approved".to_string());
        let env = ConditionEnv {
            context: &ctx,
            events: &events,
            predicates: &predicates,
        };

        assert!(Condition::predicate("has_rows").evaluate(&env).unwrap());
        assert!(Condition::event("approved").evaluate(&env).unwrap());
        assert!(!Condition::event("rejected").evaluate(&env).unwrap());
        assert!(Condition::Always.evaluate(&env).unwrap());
        assert!(!Condition::Never.evaluate(&env).unwrap());
        assert!(matches!(
            Condition::predicate("unknown").evaluate(&env),
            Err(Error::Configuration(_))
        ));
    }
}
