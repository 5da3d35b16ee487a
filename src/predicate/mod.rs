//! Predicates: an immutable expression tree, its evaluator, and a text
//! parser.
//!
//! Expressions are evaluated against a [`Subject`], anything that can look
//! up a property value by name: a managed object (through its context), a
//! store cache node, or a plain map.

mod lexer;
mod parser;

pub use lexer::{Token, TokenKind};
pub use parser::parse;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ContextError, GraphError, GraphResult, PredicateError};
use crate::value::Value;

/// Something a predicate can be evaluated against.
pub trait Subject {
    /// Returns the value of the named property.
    ///
    /// Unknown names fail with [`ContextError::NoSuchProperty`].
    fn value_for_key(&mut self, key: &str) -> GraphResult<Value>;
}

fn no_such_property(owner: &str, key: &str) -> GraphError {
    ContextError::NoSuchProperty {
        entity: owner.to_string(),
        property: key.to_string(),
    }
    .into()
}

impl Subject for BTreeMap<String, Value> {
    fn value_for_key(&mut self, key: &str) -> GraphResult<Value> {
        self.get(key).cloned().ok_or_else(|| no_such_property("map", key))
    }
}

impl Subject for HashMap<String, Value> {
    fn value_for_key(&mut self, key: &str) -> GraphResult<Value> {
        self.get(key).cloned().ok_or_else(|| no_such_property("map", key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

impl ComparisonOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Less => "<",
            Self::LessEqual => "<=",
        }
    }

    fn apply(self, lhs: &Value, rhs: &Value) -> Result<bool, PredicateError> {
        use std::cmp::Ordering;

        Ok(match self {
            Self::Equal => lhs.equivalent(rhs),
            Self::NotEqual => !lhs.equivalent(rhs),
            Self::Greater => lhs.compare_numeric(rhs)? == Ordering::Greater,
            Self::GreaterEqual => lhs.compare_numeric(rhs)? != Ordering::Less,
            Self::Less => lhs.compare_numeric(rhs)? == Ordering::Less,
            Self::LessEqual => lhs.compare_numeric(rhs)? != Ordering::Greater,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// An expression or predicate node.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use objgraph::{Expression, Value};
///
/// let built = Expression::field("pages").eq(Expression::constant(362));
/// let parsed: Expression = "pages == 362".parse().unwrap();
/// assert_eq!(built, parsed);
///
/// let mut book = BTreeMap::from([("pages".to_string(), Value::Int(362))]);
/// assert!(parsed.matches(&mut book).unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    Constant {
        value: Value,
    },
    FieldPath {
        name: String,
    },
    Comparison {
        lhs: Box<Expression>,
        op: ComparisonOp,
        rhs: Box<Expression>,
    },
    Compound {
        lhs: Box<Expression>,
        op: LogicalOp,
        rhs: Box<Expression>,
    },
    Not {
        inner: Box<Expression>,
    },
}

impl Expression {
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant {
            value: value.into(),
        }
    }

    pub fn field(name: impl Into<String>) -> Self {
        Self::FieldPath { name: name.into() }
    }

    #[must_use]
    pub fn compare(self, op: ComparisonOp, rhs: Self) -> Self {
        Self::Comparison {
            lhs: Box::new(self),
            op,
            rhs: Box::new(rhs),
        }
    }

    #[must_use]
    pub fn eq(self, rhs: Self) -> Self {
        self.compare(ComparisonOp::Equal, rhs)
    }

    #[must_use]
    pub fn ne(self, rhs: Self) -> Self {
        self.compare(ComparisonOp::NotEqual, rhs)
    }

    #[must_use]
    pub fn gt(self, rhs: Self) -> Self {
        self.compare(ComparisonOp::Greater, rhs)
    }

    #[must_use]
    pub fn ge(self, rhs: Self) -> Self {
        self.compare(ComparisonOp::GreaterEqual, rhs)
    }

    #[must_use]
    pub fn lt(self, rhs: Self) -> Self {
        self.compare(ComparisonOp::Less, rhs)
    }

    #[must_use]
    pub fn le(self, rhs: Self) -> Self {
        self.compare(ComparisonOp::LessEqual, rhs)
    }

    #[must_use]
    pub fn and(self, rhs: Self) -> Self {
        Self::Compound {
            lhs: Box::new(self),
            op: LogicalOp::And,
            rhs: Box::new(rhs),
        }
    }

    #[must_use]
    pub fn or(self, rhs: Self) -> Self {
        Self::Compound {
            lhs: Box::new(self),
            op: LogicalOp::Or,
            rhs: Box::new(rhs),
        }
    }

    /// Evaluates this node to a value.
    ///
    /// Both sides of a compound are always evaluated, left first.
    pub fn evaluate<S: Subject + ?Sized>(&self, subject: &mut S) -> GraphResult<Value> {
        match self {
            Self::Constant { value } => Ok(value.clone()),
            Self::FieldPath { name } => subject.value_for_key(name),
            Self::Comparison { lhs, op, rhs } => {
                let l = lhs.evaluate(subject)?;
                let r = rhs.evaluate(subject)?;
                Ok(Value::Bool(op.apply(&l, &r)?))
            }
            Self::Compound { lhs, op, rhs } => {
                let l = expect_bool(lhs.evaluate(subject)?, op.symbol())?;
                let r = expect_bool(rhs.evaluate(subject)?, op.symbol())?;
                Ok(Value::Bool(match op {
                    LogicalOp::And => l && r,
                    LogicalOp::Or => l || r,
                }))
            }
            Self::Not { inner } => {
                let v = expect_bool(inner.evaluate(subject)?, "NOT")?;
                Ok(Value::Bool(!v))
            }
        }
    }

    /// Evaluates this node as a predicate.
    pub fn matches<S: Subject + ?Sized>(&self, subject: &mut S) -> GraphResult<bool> {
        Ok(expect_bool(self.evaluate(subject)?, "predicate")?)
    }
}

fn expect_bool(value: Value, context: &str) -> Result<bool, PredicateError> {
    value.as_bool().ok_or_else(|| {
        PredicateError::type_error(format!(
            "{context} requires a boolean operand, got {}",
            value.type_name()
        ))
    })
}

impl std::ops::Not for Expression {
    type Output = Self;

    fn not(self) -> Self {
        Self::Not {
            inner: Box::new(self),
        }
    }
}

impl FromStr for Expression {
    type Err = PredicateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expression) -> fmt::Result {
    match expr {
        Expression::Comparison { .. } | Expression::Compound { .. } => write!(f, "({expr})"),
        _ => write!(f, "{expr}"),
    }
}

/// Renders the text form. Everything but `Not` re-parses to an equal tree.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant { value } => match value {
                Value::Timestamp(t) => write!(f, "{:?}", t.to_rfc3339()),
                Value::Object(id) => write!(f, "{:?}", id.to_uri()),
                other => write!(f, "{other}"),
            },
            Self::FieldPath { name } => write!(f, "{name}"),
            Self::Comparison { lhs, op, rhs } => {
                write_operand(f, lhs)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, rhs)
            }
            Self::Compound { lhs, op, rhs } => {
                write_operand(f, lhs)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, rhs)
            }
            Self::Not { inner } => write!(f, "NOT({inner})"),
        }
    }
}
