//! Values held by managed-object properties.
//!
//! Attributes hold scalar values. Relationship values only appear as
//! [`Value::Object`] / [`Value::Objects`] in store cache nodes and predicate
//! evaluation; inside a context relationships are held as object handles.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PredicateError;
use crate::id::ObjectId;

/// Possible values of a property.
///
/// # Examples
///
/// ```
/// use objgraph::Value;
///
/// assert!(Value::Int(5).equivalent(&Value::Float(5.0)));
/// assert!(Value::Null.equivalent(&Value::Null));
/// assert!(!Value::Null.equivalent(&Value::Int(0)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    String(String),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
    Object(ObjectId),
    Objects(BTreeSet<ObjectId>),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_) | Self::Decimal(_))
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_object(&self) -> Option<&ObjectId> {
        match self {
            Self::Object(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_objects(&self) -> Option<&BTreeSet<ObjectId>> {
        match self {
            Self::Objects(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value as an arbitrary-precision decimal.
    ///
    /// Floats go through their shortest round-trip decimal text, so `0.1`
    /// becomes exactly `0.1` rather than its binary approximation. NaN and
    /// infinities have no decimal form.
    #[must_use]
    pub fn to_decimal(&self) -> Option<BigDecimal> {
        match self {
            Self::Int(v) => Some(BigDecimal::from(*v)),
            Self::Float(v) if v.is_finite() => BigDecimal::from_str(&v.to_string()).ok(),
            Self::Decimal(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Value equality used by predicates and change detection.
    ///
    /// Null only equals null, and numbers compare by magnitude across
    /// `Int`, `Float` and `Decimal`.
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        if self.is_numeric() && other.is_numeric() {
            return match (self.to_decimal(), other.to_decimal()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
        }
        self == other
    }

    /// Orders two numeric values, failing for anything else.
    pub fn compare_numeric(&self, other: &Self) -> Result<Ordering, PredicateError> {
        match (self.to_decimal(), other.to_decimal()) {
            (Some(a), Some(b)) => Ok(a.cmp(&b)),
            _ => Err(PredicateError::type_error(format!(
                "ordering comparison requires numeric operands, got {} and {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Orders values for sort descriptors.
    ///
    /// This is a total order. Null sorts first, then values group by type
    /// (bool, number, string, timestamp, binary, object, objects). Numbers
    /// compare by magnitude across `Int`, `Float` and `Decimal`, with
    /// negative infinity first and NaN after positive infinity.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        let by_rank = self.sort_rank().cmp(&other.sort_rank());
        if by_rank != Ordering::Equal {
            return by_rank;
        }
        match (self, other) {
            (a, b) if a.is_numeric() => match (a.to_decimal(), b.to_decimal()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => a.number_class().cmp(&b.number_class()),
            },
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),
            (Self::Object(a), Self::Object(b)) => a.cmp(b),
            (Self::Objects(a), Self::Objects(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    const fn sort_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) | Self::Decimal(_) => 2,
            Self::String(_) => 3,
            Self::Timestamp(_) => 4,
            Self::Binary(_) => 5,
            Self::Object(_) => 6,
            Self::Objects(_) => 7,
        }
    }

    /// Bucket of a number that has no decimal form.
    fn number_class(&self) -> u8 {
        match self {
            Self::Float(v) if v.is_nan() => 3,
            Self::Float(v) if v.is_infinite() && v.is_sign_positive() => 2,
            Self::Float(v) if v.is_infinite() => 0,
            _ => 1,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Binary(_) => "binary",
            Self::Object(_) => "object",
            Self::Objects(_) => "objects",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Binary(v) => write!(f, "binary[{}]", v.len()),
            Self::Object(v) => write!(f, "{v}"),
            Self::Objects(v) => write!(f, "objects[{}]", v.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<BigDecimal> for Value {
    fn from(v: BigDecimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Self::Object(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
