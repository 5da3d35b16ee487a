//! Store cache nodes: the flat record format exchanged with stores.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ContextError, GraphResult};
use crate::id::ObjectId;
use crate::model::EntityDescription;
use crate::predicate::Subject;
use crate::value::Value;

/// One record: an object ID plus a property name → value map.
///
/// Relationship values are [`Value::Object`] (or `Null`) for to-one and
/// [`Value::Objects`] for to-many. A missing key means the store did not
/// supply that property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreCacheNode {
    pub id: ObjectId,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl StoreCacheNode {
    #[must_use]
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// The to-one target stored under `name`, if any.
    #[must_use]
    pub fn to_one(&self, name: &str) -> Option<&ObjectId> {
        self.get(name).and_then(Value::as_object)
    }

    /// The to-many members stored under `name`, if supplied.
    #[must_use]
    pub fn to_many(&self, name: &str) -> Option<&BTreeSet<ObjectId>> {
        self.get(name).and_then(Value::as_objects)
    }

    /// Copies every property of `other` over this node's properties.
    pub fn merge_from(&mut self, other: &Self) {
        for (name, value) in &other.properties {
            self.properties.insert(name.clone(), value.clone());
        }
    }

    /// Drops every reference to `id`.
    pub fn remove_reference(&mut self, id: &ObjectId) {
        for value in self.properties.values_mut() {
            if matches!(*value, Value::Object(ref target) if target == id) {
                *value = Value::Null;
            } else if let Value::Objects(ids) = value {
                ids.remove(id);
            }
        }
    }
}

/// A node evaluates predicates over exactly the properties it holds.
impl Subject for StoreCacheNode {
    fn value_for_key(&mut self, key: &str) -> GraphResult<Value> {
        self.properties.get(key).cloned().ok_or_else(|| {
            ContextError::NoSuchProperty {
                entity: self.id.entity().to_string(),
                property: key.to_string(),
            }
            .into()
        })
    }
}

/// Evaluates predicates over a node, reading unsupplied but declared
/// properties as empty.
pub(crate) struct NodeSubject<'a> {
    pub node: &'a StoreCacheNode,
    pub entity: &'a EntityDescription,
}

impl Subject for NodeSubject<'_> {
    fn value_for_key(&mut self, key: &str) -> GraphResult<Value> {
        if let Some(v) = self.node.properties.get(key) {
            return Ok(v.clone());
        }
        match self.entity.relationship(key) {
            Some(rel) if rel.is_to_many() => Ok(Value::Objects(BTreeSet::new())),
            Some(_) => Ok(Value::Null),
            None if self.entity.property(key).is_some() => Ok(Value::Null),
            None => Err(ContextError::NoSuchProperty {
                entity: self.entity.name().to_string(),
                property: key.to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::StoreId;

    fn id(key: i64) -> ObjectId {
        ObjectId::new_permanent(StoreId::new(), "Employee", key)
    }

    #[test]
    fn test_node_as_predicate_subject() {
        let mut node = StoreCacheNode::new(id(1)).with("name", "John");
        assert_eq!(node.value_for_key("name").unwrap(), Value::from("John"));
        assert!(node.value_for_key("salary").is_err());
    }

    #[test]
    fn test_remove_reference_nulls_to_one() {
        let gone = id(9);
        let mut node = StoreCacheNode::new(id(1))
            .with("manager", Value::Object(gone.clone()))
            .with("reports", Value::Objects(BTreeSet::from([gone.clone()])));
        node.remove_reference(&gone);
        assert_eq!(node.get("manager"), Some(&Value::Null));
        assert!(node.to_many("reports").unwrap().is_empty());
    }
}
