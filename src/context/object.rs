//! Managed objects and their property slots.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::ObjectId;
use crate::model::{EntityDescription, PropertyDescription};
use crate::value::Value;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an [`super::ObjectContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Handle to a managed object registered with one context.
///
/// Handles are cheap to copy and compare. They stay valid until the object
/// is unregistered (saved deletion, merge of a foreign deletion, `reset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    pub(crate) context: ContextId,
    pub(crate) key: u64,
}

impl ObjectRef {
    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.context
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.context, self.key)
    }
}

/// Load state of a managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultState {
    Unloaded,
    /// Values are being copied in from the store.
    Loading,
    Loaded,
}

/// Backing collection of a to-many relationship.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FaultingSet {
    pub members: BTreeSet<ObjectRef>,
    pub faulted: bool,
}

impl FaultingSet {
    pub fn loaded(members: BTreeSet<ObjectRef>) -> Self {
        Self {
            members,
            faulted: false,
        }
    }

    pub fn faulted() -> Self {
        Self {
            members: BTreeSet::new(),
            faulted: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Unset,
    Attribute(Value),
    ToOne(Option<ObjectRef>),
    ToMany(FaultingSet),
}

impl Slot {
    /// Initial value for a newly inserted object.
    pub fn initial(property: &PropertyDescription) -> Self {
        match property {
            PropertyDescription::Attribute(a) => {
                Self::Attribute(a.default_value().cloned().unwrap_or(Value::Null))
            }
            PropertyDescription::Relationship(r) if r.is_to_many() => {
                Self::ToMany(FaultingSet::default())
            }
            PropertyDescription::Relationship(_) => Self::ToOne(None),
        }
    }
}

/// A live instance of an entity.
///
/// Objects are owned by their context; callers hold [`ObjectRef`]s and read
/// through the context.
#[derive(Debug, Clone)]
pub struct ManagedObject {
    pub(crate) id: ObjectId,
    pub(crate) entity: Arc<EntityDescription>,
    pub(crate) state: FaultState,
    pub(crate) slots: Vec<Slot>,
}

impl ManagedObject {
    pub(crate) fn new_inserted(id: ObjectId, entity: Arc<EntityDescription>) -> Self {
        let slots = entity.properties().iter().map(Slot::initial).collect();
        Self {
            id,
            entity,
            state: FaultState::Loaded,
            slots,
        }
    }

    pub(crate) fn new_fault(id: ObjectId, entity: Arc<EntityDescription>) -> Self {
        let slots = vec![Slot::Unset; entity.properties().len()];
        Self {
            id,
            entity,
            state: FaultState::Unloaded,
            slots,
        }
    }

    /// Returns to the unloaded state, dropping every value.
    pub(crate) fn turn_into_fault(&mut self) {
        self.state = FaultState::Unloaded;
        for (slot, property) in self.slots.iter_mut().zip(self.entity.properties()) {
            *slot = match property {
                PropertyDescription::Relationship(r) if r.is_to_many() => {
                    Slot::ToMany(FaultingSet::faulted())
                }
                _ => Slot::Unset,
            };
        }
    }

    #[must_use]
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    #[must_use]
    pub fn entity(&self) -> &EntityDescription {
        &self.entity
    }

    #[must_use]
    pub const fn fault_state(&self) -> FaultState {
        self.state
    }

    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.state != FaultState::Loaded
    }
}

/// A property value as seen through a context.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Attribute(Value),
    ToOne(Option<ObjectRef>),
    ToMany(Vec<ObjectRef>),
}

impl PropertyValue {
    #[must_use]
    pub const fn as_attribute(&self) -> Option<&Value> {
        match self {
            Self::Attribute(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_to_one(&self) -> Option<Option<ObjectRef>> {
        match self {
            Self::ToOne(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_to_many(&self) -> Option<&[ObjectRef]> {
        match self {
            Self::ToMany(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) const fn kind_name(&self) -> &'static str {
        match self {
            Self::Attribute(_) => "attribute value",
            Self::ToOne(_) => "object",
            Self::ToMany(_) => "object collection",
        }
    }
}

macro_rules! attribute_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for PropertyValue {
                fn from(v: $t) -> Self {
                    Self::Attribute(Value::from(v))
                }
            }
        )*
    };
}

attribute_from!(Value, bool, i32, i64, f64, BigDecimal, String, &str, DateTime<Utc>);

impl From<ObjectRef> for PropertyValue {
    fn from(v: ObjectRef) -> Self {
        Self::ToOne(Some(v))
    }
}

impl From<Option<ObjectRef>> for PropertyValue {
    fn from(v: Option<ObjectRef>) -> Self {
        Self::ToOne(v)
    }
}

impl From<Vec<ObjectRef>> for PropertyValue {
    fn from(v: Vec<ObjectRef>) -> Self {
        Self::ToMany(v)
    }
}

impl<const N: usize> From<[ObjectRef; N]> for PropertyValue {
    fn from(v: [ObjectRef; N]) -> Self {
        Self::ToMany(v.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDefinition, AttributeType, EntityDefinition, Model};

    fn book() -> Arc<EntityDescription> {
        let model = Model::from_entities([
            EntityDefinition::new("Book")
                .with_attribute(AttributeDefinition::new("pages", AttributeType::Integer).default_value(100))
                .to_many("chapters", "Chapter", Some("book")),
            EntityDefinition::new("Chapter").to_one("book", "Book", Some("chapters")),
        ])
        .unwrap();
        Arc::clone(model.entity("Book").unwrap())
    }

    #[test]
    fn test_new_object_gets_defaults() {
        let obj = ManagedObject::new_inserted(ObjectId::new_temporary("Book"), book());
        assert!(!obj.is_fault());
        assert_eq!(obj.slots[0], Slot::Attribute(Value::Int(100)));
        assert_eq!(obj.slots[1], Slot::ToMany(FaultingSet::default()));
    }

    #[test]
    fn test_turn_into_fault_clears_values() {
        let mut obj = ManagedObject::new_inserted(ObjectId::new_temporary("Book"), book());
        obj.turn_into_fault();
        assert_eq!(obj.fault_state(), FaultState::Unloaded);
        assert_eq!(obj.slots[0], Slot::Unset);
        assert_eq!(obj.slots[1], Slot::ToMany(FaultingSet::faulted()));
    }

    #[test]
    fn test_context_ids_are_unique() {
        assert_ne!(ContextId::next(), ContextId::next());
    }

    #[test]
    fn test_property_value_conversions() {
        assert_eq!(PropertyValue::from("x"), PropertyValue::Attribute(Value::from("x")));
        assert_eq!(PropertyValue::from(None::<ObjectRef>), PropertyValue::ToOne(None));
        assert!(PropertyValue::from(Vec::<ObjectRef>::new()).as_to_many().unwrap().is_empty());
    }
}
