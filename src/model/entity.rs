//! Entity and property descriptions.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Bool,
    Integer,
    Float,
    Decimal,
    String,
    Timestamp,
    Binary,
}

impl AttributeType {
    /// Converts `value` into this type, widening numbers where lossless.
    ///
    /// Null is accepted for every type; required-ness is checked at save.
    /// NaN and the infinities are rejected, since no store can persist them.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (_, Value::Float(v)) if !v.is_finite() => None,
            (Self::Bool, Value::Bool(_))
            | (Self::Integer, Value::Int(_))
            | (Self::Float, Value::Float(_))
            | (Self::Decimal, Value::Decimal(_))
            | (Self::String, Value::String(_))
            | (Self::Timestamp, Value::Timestamp(_))
            | (Self::Binary, Value::Binary(_)) => Some(value.clone()),
            (Self::Float, Value::Int(v)) => Some(Value::Float(*v as f64)),
            (Self::Decimal, Value::Int(_) | Value::Float(_)) => value.to_decimal().map(Value::Decimal),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Timestamp => "timestamp",
            Self::Binary => "binary",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    ToOne,
    ToMany,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescription {
    pub(crate) name: String,
    pub(crate) entity: String,
    pub(crate) attribute_type: AttributeType,
    pub(crate) required: bool,
    pub(crate) default: Option<Value>,
}

impl AttributeDescription {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entity that declares this attribute (an ancestor for inherited ones).
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    #[must_use]
    pub const fn attribute_type(&self) -> AttributeType {
        self.attribute_type
    }

    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub const fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipDescription {
    pub(crate) name: String,
    pub(crate) entity: String,
    pub(crate) destination: String,
    pub(crate) cardinality: Cardinality,
    pub(crate) inverse: Option<String>,
    pub(crate) required: bool,
}

impl RelationshipDescription {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    #[must_use]
    pub const fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    #[must_use]
    pub const fn is_to_many(&self) -> bool {
        matches!(self.cardinality, Cardinality::ToMany)
    }

    #[must_use]
    pub fn inverse(&self) -> Option<&str> {
        self.inverse.as_deref()
    }

    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }
}

/// Either kind of property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyDescription {
    Attribute(AttributeDescription),
    Relationship(RelationshipDescription),
}

impl PropertyDescription {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Attribute(a) => &a.name,
            Self::Relationship(r) => &r.name,
        }
    }

    #[must_use]
    pub fn entity(&self) -> &str {
        match self {
            Self::Attribute(a) => &a.entity,
            Self::Relationship(r) => &r.entity,
        }
    }

    #[must_use]
    pub const fn is_required(&self) -> bool {
        match self {
            Self::Attribute(a) => a.required,
            Self::Relationship(r) => r.required,
        }
    }

    #[must_use]
    pub const fn as_attribute(&self) -> Option<&AttributeDescription> {
        match self {
            Self::Attribute(a) => Some(a),
            Self::Relationship(_) => None,
        }
    }

    #[must_use]
    pub const fn as_relationship(&self) -> Option<&RelationshipDescription> {
        match self {
            Self::Relationship(r) => Some(r),
            Self::Attribute(_) => None,
        }
    }
}

/// A validated entity: its own and all inherited properties in declaration
/// order (ancestors first), plus a name → slot index table.
#[derive(Debug, Clone)]
pub struct EntityDescription {
    pub(crate) name: String,
    pub(crate) super_entity: Option<String>,
    pub(crate) ancestors: Vec<String>,
    pub(crate) sub_entities: Vec<String>,
    pub(crate) properties: Vec<PropertyDescription>,
    pub(crate) index: HashMap<String, usize>,
}

impl EntityDescription {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn super_entity(&self) -> Option<&str> {
        self.super_entity.as_deref()
    }

    /// All descendants, in no particular order.
    #[must_use]
    pub fn sub_entities(&self) -> &[String] {
        &self.sub_entities
    }

    /// True if this entity is `name` or inherits from it.
    #[must_use]
    pub fn is_kind_of(&self, name: &str) -> bool {
        self.name == name || self.ancestors.iter().any(|a| a == name)
    }

    /// This entity's name followed by every sub-entity name.
    pub fn names_in_hierarchy(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.sub_entities.iter().map(String::as_str))
    }

    #[must_use]
    pub fn properties(&self) -> &[PropertyDescription] {
        &self.properties
    }

    /// Slot index of a property, the typed accessor used by managed objects.
    #[must_use]
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDescription> {
        self.property_index(name).map(|i| &self.properties[i])
    }

    #[must_use]
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescription> {
        self.property(name).and_then(PropertyDescription::as_relationship)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeDescription> {
        self.properties.iter().filter_map(PropertyDescription::as_attribute)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipDescription> {
        self.properties.iter().filter_map(PropertyDescription::as_relationship)
    }
}
