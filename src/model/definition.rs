//! Model source shape.
//!
//! These are the plain definitions an external loader (a JSON model file, a
//! code generator, a test) hands to [`crate::Model::new`]. They carry no
//! validation of their own.

use serde::{Deserialize, Serialize};

use crate::value::Value;

use super::entity::{AttributeType, Cardinality};

/// A complete model source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    #[serde(default)]
    pub entities: Vec<EntityDefinition>,
}

/// One entity in a model source.
///
/// # Example
/// ```rust,ignore
/// let company = EntityDefinition::new("Company")
///     .attribute("name", AttributeType::String)
///     .to_many("employees", "Employee", Some("company"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDefinition>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Set the super-entity.
    #[must_use]
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Add an optional attribute without a default.
    #[must_use]
    pub fn attribute(self, name: impl Into<String>, attribute_type: AttributeType) -> Self {
        self.with_attribute(AttributeDefinition::new(name, attribute_type))
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: AttributeDefinition) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Add an optional to-one relationship.
    #[must_use]
    pub fn to_one(
        self,
        name: impl Into<String>,
        destination: impl Into<String>,
        inverse: Option<&str>,
    ) -> Self {
        self.with_relationship(RelationshipDefinition::new(
            name,
            destination,
            Cardinality::ToOne,
            inverse,
        ))
    }

    /// Add a to-many relationship.
    #[must_use]
    pub fn to_many(
        self,
        name: impl Into<String>,
        destination: impl Into<String>,
        inverse: Option<&str>,
    ) -> Self {
        self.with_relationship(RelationshipDefinition::new(
            name,
            destination,
            Cardinality::ToMany,
            inverse,
        ))
    }

    #[must_use]
    pub fn with_relationship(mut self, relationship: RelationshipDefinition) -> Self {
        self.relationships.push(relationship);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            required: false,
            default: None,
        }
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDefinition {
    pub name: String,
    pub destination: String,
    pub cardinality: Cardinality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl RelationshipDefinition {
    pub fn new(
        name: impl Into<String>,
        destination: impl Into<String>,
        cardinality: Cardinality,
        inverse: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            destination: destination.into(),
            cardinality,
            inverse: inverse.map(str::to_string),
            required: false,
        }
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}
