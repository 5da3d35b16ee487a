//! Object contexts: the unit of work.
//!
//! A context owns every managed object it has touched (an arena keyed by a
//! per-context handle) plus an identity map from [`ObjectId`] to handle, so
//! one ID always resolves to one object. Objects refer to each other through
//! [`ObjectRef`] handles, never through owning pointers.
//!
//! A context is confined to one thread at a time (`&mut self` everywhere).
//! Several contexts may share one [`StoreCoordinator`] across threads.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use objgraph::{
//!     AtomicStore, AttributeType, EntityDefinition, FetchRequest, Model, ObjectContext,
//!     StoreCoordinator, Value,
//! };
//!
//! let model = Model::from_entities([
//!     EntityDefinition::new("Company")
//!         .attribute("name", AttributeType::String)
//!         .to_many("employees", "Employee", Some("company")),
//!     EntityDefinition::new("Employee")
//!         .attribute("name", AttributeType::String)
//!         .to_one("company", "Company", Some("employees")),
//! ])
//! .unwrap();
//! let coordinator = Arc::new(StoreCoordinator::new(Arc::new(model)));
//! coordinator.add_store(Arc::new(AtomicStore::in_memory())).unwrap();
//!
//! let mut ctx = ObjectContext::new(Arc::clone(&coordinator));
//! let google = ctx.new_object("Company").unwrap();
//! ctx.set_value(google, "name", "Google").unwrap();
//! let john = ctx.new_object("Employee").unwrap();
//! ctx.set_value(john, "company", google).unwrap();
//! assert_eq!(ctx.to_many(google, "employees").unwrap(), vec![john]);
//! ctx.save().unwrap();
//!
//! let mut other = ObjectContext::new(coordinator);
//! let employees = other.execute_fetch(&FetchRequest::new("Employee")).unwrap();
//! let company = other.to_one(employees[0], "company").unwrap().unwrap();
//! assert_eq!(other.attribute(company, "name").unwrap(), Value::from("Google"));
//! ```

mod changes;
mod fetch;
mod merge;
mod notify;
mod object;
mod relationship;
mod save;

pub use notify::{
    ContextEvent, EventFilter, ObjectsChanged, PropertyChange, SaveNotification, Subscription,
};
pub use object::{ContextId, FaultState, ManagedObject, ObjectRef, PropertyValue};
pub use relationship::RelatedSet;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::coordinator::StoreCoordinator;
use crate::error::{ContextError, GraphError, GraphResult, IdError};
use crate::id::ObjectId;
use crate::model::{EntityDescription, EntityKind, PropertyDescription};
use crate::storage::{PersistentStore, StoreCacheNode};
use crate::value::Value;

use changes::{ChangeSet, PendingChanges};
use notify::NotificationCenter;
use object::{FaultingSet, Slot};

/// Context behavior settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Buffered events per subscription before events are dropped.
    pub notification_capacity: usize,
    /// Check required properties of inserted and updated objects on save.
    pub validate_on_save: bool,
    /// Removing a never-saved object from a to-many relationship deletes it
    /// instead of only detaching it.
    pub delete_new_on_remove: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            notification_capacity: 1024,
            validate_on_save: true,
            delete_new_on_remove: true,
        }
    }
}

impl ContextConfig {
    pub fn validate(self) -> GraphResult<Self> {
        if self.notification_capacity == 0 {
            return Err(GraphError::Config {
                reason: "notification_capacity must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}

/// A unit-of-work scratchpad over a coordinator's stores.
#[derive(Debug)]
pub struct ObjectContext {
    id: ContextId,
    coordinator: Arc<StoreCoordinator>,
    config: ContextConfig,
    objects: HashMap<u64, ManagedObject>,
    registry: HashMap<ObjectId, u64>,
    next_key: u64,
    changes: ChangeSet,
    pending: PendingChanges,
    notifications: NotificationCenter,
    merging: bool,
}

impl ObjectContext {
    #[must_use]
    pub fn new(coordinator: Arc<StoreCoordinator>) -> Self {
        let config = ContextConfig::default();
        Self {
            id: ContextId::next(),
            coordinator,
            notifications: NotificationCenter::new(config.notification_capacity),
            config,
            objects: HashMap::new(),
            registry: HashMap::new(),
            next_key: 0,
            changes: ChangeSet::default(),
            pending: PendingChanges::default(),
            merging: false,
        }
    }

    pub fn with_config(coordinator: Arc<StoreCoordinator>, config: ContextConfig) -> GraphResult<Self> {
        let config = config.validate()?;
        let mut ctx = Self::new(coordinator);
        ctx.notifications = NotificationCenter::new(config.notification_capacity);
        ctx.config = config;
        Ok(ctx)
    }

    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    #[must_use]
    pub const fn coordinator(&self) -> &Arc<StoreCoordinator> {
        &self.coordinator
    }

    #[must_use]
    pub const fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Subscribes to this context's events.
    pub fn subscribe(&mut self, filter: EventFilter) -> Subscription {
        self.notifications.subscribe(filter)
    }

    /// Events dropped so far because a subscriber fell behind.
    #[must_use]
    pub const fn dropped_notifications(&self) -> u64 {
        self.notifications.dropped()
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Creates and inserts a new object of `entity`, with attribute defaults
    /// applied and a temporary ID.
    pub fn new_object(&mut self, entity: &str) -> GraphResult<ObjectRef> {
        let description = Arc::clone(self.coordinator.model().entity(entity)?);
        let id = ObjectId::new_temporary(entity);
        let object = self.register(ManagedObject::new_inserted(id, description));
        self.changes.inserted.insert(object);
        self.pending.inserted(object);
        trace!(context = %self.id, %object, entity, "inserted new object");
        Ok(object)
    }

    /// Creates a new object of the entity a type tag stands for.
    pub fn new_object_of<T: EntityKind>(&mut self) -> GraphResult<ObjectRef> {
        self.new_object(T::ENTITY_NAME)
    }

    /// Returns the registered object for `id`, registering a fault if there
    /// is none. Never touches the store.
    pub fn object_with_id(&mut self, id: &ObjectId) -> GraphResult<ObjectRef> {
        if let Some(key) = self.registry.get(id) {
            return Ok(ObjectRef {
                context: self.id,
                key: *key,
            });
        }
        if id.is_temporary() {
            return Err(IdError::TemporaryId { uri: id.to_string() }.into());
        }
        let description = Arc::clone(self.coordinator.model().entity(id.entity())?);
        Ok(self.register(ManagedObject::new_fault(id.clone(), description)))
    }

    /// Like [`Self::object_with_id`] but loads the object, failing with
    /// [`ContextError::NotFound`] if the store has no record.
    pub fn existing_object(&mut self, id: &ObjectId) -> GraphResult<ObjectRef> {
        let was_registered = self.registry.contains_key(id);
        let object = self.object_with_id(id)?;
        if let Err(e) = self.fault_in_object(object) {
            if !was_registered {
                self.unregister(object);
            }
            return Err(e);
        }
        Ok(object)
    }

    /// Loads an unloaded object from its store. Loaded objects are left as
    /// they are.
    pub fn fault_in_object(&mut self, object: ObjectRef) -> GraphResult<()> {
        let obj = self.obj_mut(object)?;
        match obj.state {
            FaultState::Loaded => return Ok(()),
            FaultState::Loading => {
                return Err(ContextError::ReentrantFault { id: obj.id.clone() }.into())
            }
            FaultState::Unloaded => obj.state = FaultState::Loading,
        }
        let id = obj.id.clone();

        let loaded = self.load_from_store(object, &id);
        let obj = self.obj_mut(object)?;
        match loaded {
            Ok(()) => {
                obj.state = FaultState::Loaded;
                trace!(context = %self.id, %id, "fault resolved");
                Ok(())
            }
            Err(e) => {
                obj.turn_into_fault();
                Err(e)
            }
        }
    }

    fn load_from_store(&mut self, object: ObjectRef, id: &ObjectId) -> GraphResult<()> {
        let store = self.coordinator.route(id)?;
        let node = store
            .get_object_values(id)?
            .ok_or_else(|| ContextError::NotFound { id: id.clone() })?;
        self.fill_from_node(object, &node, store.as_ref(), false)
    }

    /// Copies a cache node into an object's slots.
    ///
    /// With `partial`, only properties present in the node are written;
    /// otherwise every property is written and to-one relationships the node
    /// omits are asked of the store. Omitted to-many relationships become
    /// faulted sets.
    pub(crate) fn fill_from_node(
        &mut self,
        object: ObjectRef,
        node: &StoreCacheNode,
        store: &dyn PersistentStore,
        partial: bool,
    ) -> GraphResult<()> {
        let entity = self.entity_of(object)?;
        let mut slots = Vec::new();

        for (index, property) in entity.properties().iter().enumerate() {
            let supplied = node.get(property.name());
            if partial && supplied.is_none() {
                continue;
            }
            let slot = match property {
                PropertyDescription::Attribute(_) => {
                    Slot::Attribute(supplied.cloned().unwrap_or(Value::Null))
                }
                PropertyDescription::Relationship(rel) if rel.is_to_many() => match supplied {
                    Some(Value::Objects(ids)) => {
                        let members = ids
                            .iter()
                            .map(|id| self.object_with_id(id))
                            .collect::<GraphResult<BTreeSet<_>>>()?;
                        Slot::ToMany(FaultingSet::loaded(members))
                    }
                    _ => Slot::ToMany(FaultingSet::faulted()),
                },
                PropertyDescription::Relationship(rel) => {
                    let target = match supplied {
                        Some(Value::Object(target)) => Some(target.clone()),
                        Some(_) => None,
                        None => store.get_to_one_relationship_value(&node.id, rel.name())?,
                    };
                    Slot::ToOne(target.map(|t| self.object_with_id(&t)).transpose()?)
                }
            };
            slots.push((index, slot));
        }

        let obj = self.obj_mut(object)?;
        for (index, slot) in slots {
            obj.slots[index] = slot;
        }
        Ok(())
    }

    /// The object behind a handle.
    pub fn object(&self, object: ObjectRef) -> GraphResult<&ManagedObject> {
        self.obj(object)
    }

    pub fn object_id(&self, object: ObjectRef) -> GraphResult<ObjectId> {
        Ok(self.obj(object)?.id.clone())
    }

    /// Every registered object, in registration order.
    #[must_use]
    pub fn registered_objects(&self) -> Vec<ObjectRef> {
        let mut keys: Vec<u64> = self.objects.keys().copied().collect();
        keys.sort_unstable();
        keys.into_iter()
            .map(|key| ObjectRef {
                context: self.id,
                key,
            })
            .collect()
    }

    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.objects.len()
    }

    // ------------------------------------------------------------------
    // Property access
    // ------------------------------------------------------------------

    /// Reads a property, resolving faults as needed.
    pub fn value(&mut self, object: ObjectRef, name: &str) -> GraphResult<PropertyValue> {
        let index = self.property_index(object, name)?;
        self.fault_in_object(object)?;
        self.property_at(object, index)
    }

    /// Reads an attribute.
    pub fn attribute(&mut self, object: ObjectRef, name: &str) -> GraphResult<Value> {
        match self.value(object, name)? {
            PropertyValue::Attribute(v) => Ok(v),
            other => Err(self.invalid(name, "attribute", other.kind_name())),
        }
    }

    /// Reads a to-one relationship.
    pub fn to_one(&mut self, object: ObjectRef, name: &str) -> GraphResult<Option<ObjectRef>> {
        match self.value(object, name)? {
            PropertyValue::ToOne(v) => Ok(v),
            other => Err(self.invalid(name, "to-one relationship", other.kind_name())),
        }
    }

    /// Reads the members of a to-many relationship.
    pub fn to_many(&mut self, object: ObjectRef, name: &str) -> GraphResult<Vec<ObjectRef>> {
        match self.value(object, name)? {
            PropertyValue::ToMany(v) => Ok(v),
            other => Err(self.invalid(name, "to-many relationship", other.kind_name())),
        }
    }

    /// Writes a property.
    ///
    /// Writing a value equal to the current one changes nothing. A changed
    /// relationship also updates the inverse side of every affected object.
    pub fn set_value(
        &mut self,
        object: ObjectRef,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> GraphResult<()> {
        let value = value.into();
        let entity = self.entity_of(object)?;
        let index = entity.property_index(name).ok_or_else(|| ContextError::NoSuchProperty {
            entity: entity.name().to_string(),
            property: name.to_string(),
        })?;
        self.fault_in_object(object)?;

        match &entity.properties()[index] {
            PropertyDescription::Attribute(attr) => {
                let expected = attr.attribute_type().to_string();
                let raw = match value {
                    PropertyValue::Attribute(v) => v,
                    other => return Err(self.invalid(name, &expected, other.kind_name())),
                };
                let coerced = attr.attribute_type().coerce(&raw).ok_or_else(|| {
                    let found = match raw {
                        Value::Float(v) if !v.is_finite() => "non-finite float",
                        _ => raw.type_name(),
                    };
                    self.invalid(name, &expected, found)
                })?;

                let obj = self.obj_mut(object)?;
                if let Slot::Attribute(old) = &obj.slots[index] {
                    if old.equivalent(&coerced) {
                        return Ok(());
                    }
                }
                obj.slots[index] = Slot::Attribute(coerced);
                self.did_change(object, index);
                Ok(())
            }
            PropertyDescription::Relationship(rel) if rel.is_to_many() => {
                let members = match value {
                    PropertyValue::ToMany(v) => v,
                    PropertyValue::Attribute(Value::Null) => Vec::new(),
                    other => {
                        return Err(self.invalid(name, "object collection", other.kind_name()))
                    }
                };
                for member in &members {
                    self.check_destination(rel, *member)?;
                }
                self.replace_to_many(object, index, rel, members)
            }
            PropertyDescription::Relationship(rel) => {
                let target = match value {
                    PropertyValue::ToOne(v) => v,
                    PropertyValue::Attribute(Value::Null) => None,
                    other => return Err(self.invalid(name, "object", other.kind_name())),
                };
                if let Some(target) = target {
                    self.check_destination(rel, target)?;
                }
                self.set_to_one(object, index, target)
            }
        }
    }

    /// Turns an object back into a fault, discarding unsaved changes to it.
    /// New objects are left alone.
    pub fn refresh(&mut self, object: ObjectRef) -> GraphResult<()> {
        self.check(object)?;
        if self.changes.inserted.contains(&object) || self.obj(object)?.id.is_temporary() {
            return Ok(());
        }
        self.obj_mut(object)?.turn_into_fault();
        self.changes.updated.remove(&object);
        trace!(context = %self.id, %object, "refreshed object");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Change set
    // ------------------------------------------------------------------

    /// True if the object has a temporary ID.
    #[must_use]
    pub fn is_new(&self, object: ObjectRef) -> bool {
        self.obj(object).map_or(false, |o| o.id.is_temporary())
    }

    #[must_use]
    pub fn is_inserted(&self, object: ObjectRef) -> bool {
        self.changes.inserted.contains(&object)
    }

    #[must_use]
    pub fn is_updated(&self, object: ObjectRef) -> bool {
        self.changes.updated.contains(&object) && !self.changes.deleted.contains(&object)
    }

    #[must_use]
    pub fn is_deleted(&self, object: ObjectRef) -> bool {
        self.changes.deleted.contains(&object)
    }

    #[must_use]
    pub fn is_fault(&self, object: ObjectRef) -> bool {
        self.obj(object).map_or(false, ManagedObject::is_fault)
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changes.has_changes()
    }

    #[must_use]
    pub fn inserted_objects(&self) -> Vec<ObjectRef> {
        self.changes.inserted.iter().copied().collect()
    }

    #[must_use]
    pub fn updated_objects(&self) -> Vec<ObjectRef> {
        self.changes.effective_updated().collect()
    }

    #[must_use]
    pub fn deleted_objects(&self) -> Vec<ObjectRef> {
        self.changes.deleted.iter().copied().collect()
    }

    /// Inserts an object: cancels a pending delete, or re-inserts a new
    /// object that was deleted before it was ever saved.
    pub fn insert_object(&mut self, object: ObjectRef) -> GraphResult<()> {
        self.check(object)?;
        if self.changes.deleted.remove(&object) {
            self.pending.cancel_delete(object);
            return Ok(());
        }
        if self.obj(object)?.id.is_temporary() && self.changes.inserted.insert(object) {
            self.changes.updated.remove(&object);
            self.pending.inserted(object);
        }
        Ok(())
    }

    /// Deletes an object.
    ///
    /// A new object is dropped from the change set and detached from its
    /// relationships at once. A saved object is marked for deletion; its
    /// relationships are nullified when the context saves.
    pub fn delete_object(&mut self, object: ObjectRef) -> GraphResult<()> {
        self.check(object)?;
        if self.changes.deleted.contains(&object) {
            return Ok(());
        }

        if self.changes.inserted.contains(&object) {
            self.detach_relationships(object)?;
            self.changes.inserted.remove(&object);
            self.changes.updated.remove(&object);
            self.pending.deleted(object);
            trace!(context = %self.id, %object, "discarded new object");
            return Ok(());
        }

        if self.obj(object)?.id.is_temporary() {
            return Ok(());
        }
        self.changes.deleted.insert(object);
        self.pending.deleted(object);
        Ok(())
    }

    /// Posts one `ObjectsDidChange` event for everything changed since the
    /// last call, if anything was.
    pub fn process_pending_changes(&mut self) {
        let changed = self.pending.take();
        if changed.is_empty() {
            return;
        }
        trace!(
            context = %self.id,
            inserted = changed.inserted.len(),
            updated = changed.updated.len(),
            deleted = changed.deleted.len(),
            "processing pending changes"
        );
        self.notifications
            .post(&ContextEvent::ObjectsDidChange(Arc::new(changed)));
    }

    /// Drops every registered object and all pending changes.
    pub fn reset(&mut self) {
        debug!(context = %self.id, objects = self.objects.len(), "resetting context");
        self.objects.clear();
        self.registry.clear();
        self.changes.clear();
        self.pending.clear();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn register(&mut self, object: ManagedObject) -> ObjectRef {
        self.next_key += 1;
        let key = self.next_key;
        self.registry.insert(object.id.clone(), key);
        self.objects.insert(key, object);
        ObjectRef {
            context: self.id,
            key,
        }
    }

    pub(crate) fn unregister(&mut self, object: ObjectRef) {
        if let Some(obj) = self.objects.remove(&object.key) {
            self.registry.remove(&obj.id);
        }
        self.changes.forget(object);
    }

    /// Gives a registered object a new ID.
    pub(crate) fn rekey(&mut self, object: ObjectRef, id: ObjectId) -> GraphResult<()> {
        let obj = self.obj_mut(object)?;
        let old = std::mem::replace(&mut obj.id, id.clone());
        self.registry.remove(&old);
        self.registry.insert(id, object.key);
        Ok(())
    }

    pub(crate) fn check(&self, object: ObjectRef) -> GraphResult<()> {
        self.obj(object).map(|_| ())
    }

    pub(crate) fn obj(&self, object: ObjectRef) -> GraphResult<&ManagedObject> {
        if object.context != self.id {
            return Err(ContextError::CrossContext.into());
        }
        self.objects
            .get(&object.key)
            .ok_or_else(|| ContextError::Unregistered.into())
    }

    pub(crate) fn obj_mut(&mut self, object: ObjectRef) -> GraphResult<&mut ManagedObject> {
        if object.context != self.id {
            return Err(ContextError::CrossContext.into());
        }
        self.objects
            .get_mut(&object.key)
            .ok_or_else(|| ContextError::Unregistered.into())
    }

    pub(crate) fn entity_of(&self, object: ObjectRef) -> GraphResult<Arc<EntityDescription>> {
        Ok(Arc::clone(&self.obj(object)?.entity))
    }

    pub(crate) fn property_index(&self, object: ObjectRef, name: &str) -> GraphResult<usize> {
        let entity = &self.obj(object)?.entity;
        entity.property_index(name).ok_or_else(|| {
            ContextError::NoSuchProperty {
                entity: entity.name().to_string(),
                property: name.to_string(),
            }
            .into()
        })
    }

    /// Reads a slot of a loaded object.
    pub(crate) fn property_at(&mut self, object: ObjectRef, index: usize) -> GraphResult<PropertyValue> {
        self.resolve_to_many(object, index)?;
        let obj = self.obj_mut(object)?;
        let property = &obj.entity.properties()[index];
        let is_attribute = property.as_attribute().is_some();
        if matches!(obj.slots[index], Slot::Unset)
            && property.as_relationship().map_or(false, |r| r.is_to_many())
        {
            obj.slots[index] = Slot::ToMany(FaultingSet::default());
        }
        Ok(match &obj.slots[index] {
            Slot::Attribute(v) => PropertyValue::Attribute(v.clone()),
            Slot::ToOne(target) => PropertyValue::ToOne(*target),
            Slot::ToMany(set) => PropertyValue::ToMany(set.members.iter().copied().collect()),
            Slot::Unset if is_attribute => PropertyValue::Attribute(Value::Null),
            Slot::Unset => PropertyValue::ToOne(None),
        })
    }

    /// Records that a property of `object` changed.
    pub(crate) fn did_change(&mut self, object: ObjectRef, index: usize) {
        self.mark_updated(object);
        if self.notifications.has_subscribers() {
            let property = self
                .objects
                .get(&object.key)
                .and_then(|o| o.entity.properties().get(index))
                .map(|p| p.name().to_string())
                .unwrap_or_default();
            self.notifications
                .post(&ContextEvent::PropertyDidChange(PropertyChange { object, property }));
        }
    }

    fn mark_updated(&mut self, object: ObjectRef) {
        let unsaved = self
            .objects
            .get(&object.key)
            .map_or(true, |o| o.id.is_temporary());
        if self.merging
            || unsaved
            || self.changes.inserted.contains(&object)
            || self.changes.deleted.contains(&object)
        {
            return;
        }
        self.changes.updated.insert(object);
        self.pending.updated(object);
    }

    /// Removes every reference to `gone` from loaded objects, without change
    /// tracking.
    pub(crate) fn scrub_references(&mut self, gone: &BTreeSet<ObjectRef>) {
        if gone.is_empty() {
            return;
        }
        for obj in self.objects.values_mut() {
            for slot in &mut obj.slots {
                if matches!(slot, Slot::ToOne(Some(target)) if gone.contains(target)) {
                    *slot = Slot::ToOne(None);
                } else if let Slot::ToMany(set) = slot {
                    set.members.retain(|m| !gone.contains(m));
                }
            }
        }
    }

    fn invalid(&self, property: &str, expected: &str, actual: &str) -> GraphError {
        ContextError::InvalidValue {
            property: property.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::error::PredicateError;
    use crate::model::{AttributeDefinition, AttributeType, EntityDefinition, Model};
    use crate::storage::{
        AtomicBackend, AtomicSnapshot, AtomicStore, FetchRequest, MemoryBackend, SortDescriptor,
        StorageError,
    };

    fn model() -> Arc<Model> {
        Arc::new(
            Model::from_entities([
                EntityDefinition::new("Company")
                    .attribute("name", AttributeType::String)
                    .to_many("employees", "Employee", Some("company")),
                EntityDefinition::new("Employee")
                    .attribute("name", AttributeType::String)
                    .with_attribute(AttributeDefinition::new("salary", AttributeType::Integer).default_value(0))
                    .to_one("company", "Company", Some("employees"))
                    .to_one("spouse", "Employee", Some("spouse")),
                EntityDefinition::new("Manager")
                    .parent("Employee")
                    .attribute("reports", AttributeType::Integer),
                EntityDefinition::new("Badge")
                    .with_attribute(AttributeDefinition::new("code", AttributeType::String).required()),
            ])
            .unwrap(),
        )
    }

    fn coordinator() -> Arc<StoreCoordinator> {
        let coordinator = Arc::new(StoreCoordinator::new(model()));
        coordinator.add_store(Arc::new(AtomicStore::in_memory())).unwrap();
        coordinator
    }

    fn employee(ctx: &mut ObjectContext, name: &str, salary: i64) -> ObjectRef {
        let e = ctx.new_object("Employee").unwrap();
        ctx.set_value(e, "name", name).unwrap();
        ctx.set_value(e, "salary", salary).unwrap();
        e
    }

    fn names(ctx: &mut ObjectContext, objects: &[ObjectRef]) -> Vec<String> {
        objects
            .iter()
            .map(|o| ctx.attribute(*o, "name").unwrap().as_str().unwrap().to_string())
            .collect()
    }

    #[derive(Debug, Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail: AtomicBool,
    }

    impl AtomicBackend for FlakyBackend {
        fn store_type(&self) -> &'static str {
            "flaky"
        }

        fn load(&self) -> GraphResult<Option<AtomicSnapshot>> {
            self.inner.load()
        }

        fn persist(&self, snapshot: &AtomicSnapshot) -> GraphResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Io("disk unplugged".to_string()).into());
            }
            self.inner.persist(snapshot)
        }
    }

    #[test]
    fn test_new_object_is_inserted_with_defaults() {
        let mut ctx = ObjectContext::new(coordinator());
        let e = ctx.new_object("Employee").unwrap();

        assert!(ctx.is_new(e));
        assert!(ctx.is_inserted(e));
        assert!(!ctx.is_fault(e));
        assert_eq!(ctx.attribute(e, "salary").unwrap(), Value::Int(0));
        assert_eq!(ctx.attribute(e, "name").unwrap(), Value::Null);
        assert_eq!(ctx.to_one(e, "company").unwrap(), None);
        assert!(ctx.has_changes());
    }

    #[test]
    fn test_unknown_entity_and_property() {
        let mut ctx = ObjectContext::new(coordinator());
        assert!(ctx.new_object("Robot").unwrap_err().is_model());

        let e = ctx.new_object("Employee").unwrap();
        let err = ctx.set_value(e, "age", 3).unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::NoSuchProperty { .. })));
        let err = ctx.value(e, "age").unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::NoSuchProperty { .. })));
    }

    #[test]
    fn test_set_value_type_checks() {
        let mut ctx = ObjectContext::new(coordinator());
        let e = ctx.new_object("Employee").unwrap();
        let c = ctx.new_object("Company").unwrap();

        let err = ctx.set_value(e, "salary", "lots").unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::InvalidValue { .. })));

        let err = ctx.set_value(e, "spouse", c).unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::InvalidValue { .. })));

        let err = ctx.set_value(e, "name", c).unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::InvalidValue { .. })));

        // Sub-entity instances are accepted where the parent is expected.
        let m = ctx.new_object("Manager").unwrap();
        ctx.set_value(e, "spouse", m).unwrap();
        assert_eq!(ctx.to_one(m, "spouse").unwrap(), Some(e));
    }

    #[test]
    fn test_save_assigns_permanent_ids_and_keeps_handles() {
        let mut ctx = ObjectContext::new(coordinator());
        let e = employee(&mut ctx, "John", 10);
        let temporary = ctx.object_id(e).unwrap();

        ctx.save().unwrap();

        let permanent = ctx.object_id(e).unwrap();
        assert!(temporary.is_temporary());
        assert!(!permanent.is_temporary());
        assert!(!ctx.is_new(e));
        assert!(!ctx.has_changes());
        assert_eq!(ctx.object_with_id(&permanent).unwrap(), e);
        assert!(ctx.object_with_id(&temporary).is_err());
        assert_eq!(ctx.attribute(e, "name").unwrap(), Value::from("John"));
    }

    #[test]
    fn test_temporary_id_lookup_fails() {
        let mut ctx = ObjectContext::new(coordinator());
        let err = ctx.object_with_id(&ObjectId::new_temporary("Employee")).unwrap_err();
        assert!(matches!(err, GraphError::Id(IdError::TemporaryId { .. })));
    }

    #[test]
    fn test_identity_is_stable_across_fetches() {
        let coordinator = coordinator();
        let mut writer = ObjectContext::new(Arc::clone(&coordinator));
        let e = employee(&mut writer, "John", 10);
        writer.save().unwrap();
        let id = writer.object_id(e).unwrap();

        let mut ctx = ObjectContext::new(coordinator);
        let first = ctx.object_with_id(&id).unwrap();
        assert!(ctx.is_fault(first));

        let fetched = ctx.execute_fetch(&FetchRequest::new("Employee")).unwrap();
        assert_eq!(fetched, vec![first]);
        assert_eq!(ctx.object_with_id(&id).unwrap(), first);
        assert_eq!(ctx.registered_count(), 1);
    }

    #[test]
    fn test_faults_load_on_access() {
        let coordinator = coordinator();
        let mut writer = ObjectContext::new(Arc::clone(&coordinator));
        let e = employee(&mut writer, "John", 10);
        writer.save().unwrap();
        let id = writer.object_id(e).unwrap();

        let mut ctx = ObjectContext::new(coordinator);
        let fault = ctx.object_with_id(&id).unwrap();
        assert_eq!(ctx.object(fault).unwrap().fault_state(), FaultState::Unloaded);
        assert_eq!(ctx.attribute(fault, "salary").unwrap(), Value::Int(10));
        assert_eq!(ctx.object(fault).unwrap().fault_state(), FaultState::Loaded);
    }

    #[test]
    fn test_existing_object_not_found_unregisters() {
        let coordinator = coordinator();
        let store = coordinator.stores().unwrap()[0];
        let mut ctx = ObjectContext::new(coordinator);
        let missing = ObjectId::new_permanent(store, "Employee", 99);

        let err = ctx.existing_object(&missing).unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::NotFound { .. })));
        assert_eq!(ctx.registered_count(), 0);

        let fault = ctx.object_with_id(&missing).unwrap();
        assert!(ctx.attribute(fault, "name").is_err());
        assert!(ctx.is_fault(fault));
    }

    #[test]
    fn test_to_one_maintains_inverse() {
        let mut ctx = ObjectContext::new(coordinator());
        let google = ctx.new_object("Company").unwrap();
        let apple = ctx.new_object("Company").unwrap();
        let john = employee(&mut ctx, "John", 1);

        ctx.set_value(john, "company", google).unwrap();
        assert_eq!(ctx.to_many(google, "employees").unwrap(), vec![john]);

        ctx.set_value(john, "company", apple).unwrap();
        assert!(ctx.to_many(google, "employees").unwrap().is_empty());
        assert_eq!(ctx.to_many(apple, "employees").unwrap(), vec![john]);

        ctx.set_value(john, "company", None::<ObjectRef>).unwrap();
        assert!(ctx.to_many(apple, "employees").unwrap().is_empty());
    }

    #[test]
    fn test_to_many_assignment_maintains_inverse() {
        let mut ctx = ObjectContext::new(coordinator());
        let google = ctx.new_object("Company").unwrap();
        let apple = ctx.new_object("Company").unwrap();
        let john = employee(&mut ctx, "John", 1);
        let mike = employee(&mut ctx, "Mike", 2);

        ctx.set_value(google, "employees", [john, mike]).unwrap();
        assert_eq!(ctx.to_one(john, "company").unwrap(), Some(google));
        assert_eq!(ctx.to_one(mike, "company").unwrap(), Some(google));

        // Moving Mike takes him out of Google's set.
        ctx.set_value(apple, "employees", [mike]).unwrap();
        assert_eq!(ctx.to_many(google, "employees").unwrap(), vec![john]);
        assert_eq!(ctx.to_one(mike, "company").unwrap(), Some(apple));
    }

    #[test]
    fn test_one_to_one_steals_partner() {
        let mut ctx = ObjectContext::new(coordinator());
        let a = employee(&mut ctx, "A", 1);
        let b = employee(&mut ctx, "B", 1);
        let c = employee(&mut ctx, "C", 1);

        ctx.set_value(a, "spouse", b).unwrap();
        assert_eq!(ctx.to_one(b, "spouse").unwrap(), Some(a));

        ctx.set_value(c, "spouse", b).unwrap();
        assert_eq!(ctx.to_one(b, "spouse").unwrap(), Some(c));
        assert_eq!(ctx.to_one(a, "spouse").unwrap(), None);
    }

    #[test]
    fn test_related_set_edits() {
        let mut ctx = ObjectContext::new(coordinator());
        let google = ctx.new_object("Company").unwrap();
        let john = employee(&mut ctx, "John", 1);
        let mike = employee(&mut ctx, "Mike", 1);

        let mut employees = ctx.related(google, "employees").unwrap();
        assert!(!employees.is_fault());
        employees.add(john).unwrap();
        employees.add(mike).unwrap();
        employees.add(mike).unwrap();
        assert_eq!(employees.len().unwrap(), 2);
        assert!(employees.contains(john).unwrap());
        employees.clear().unwrap();
        assert!(employees.is_empty().unwrap());

        assert_eq!(ctx.to_one(john, "company").unwrap(), None);
        assert!(ctx.is_inserted(john));
        assert!(ctx.related(john, "company").is_err());
    }

    #[test]
    fn test_removing_new_member_deletes_it() {
        let mut ctx = ObjectContext::new(coordinator());
        let google = ctx.new_object("Company").unwrap();
        let john = employee(&mut ctx, "John", 1);
        ctx.related(google, "employees").unwrap().add(john).unwrap();

        ctx.related(google, "employees").unwrap().remove(john).unwrap();
        assert!(!ctx.is_inserted(john));
        assert_eq!(ctx.to_one(john, "company").unwrap(), None);

        ctx.save().unwrap();
        assert!(ctx.object_id(john).unwrap().is_temporary());
        assert!(ctx.execute_fetch(&FetchRequest::new("Employee")).unwrap().is_empty());
    }

    #[test]
    fn test_removing_new_member_can_keep_it() {
        let config = ContextConfig {
            delete_new_on_remove: false,
            ..ContextConfig::default()
        };
        let mut ctx = ObjectContext::with_config(coordinator(), config).unwrap();
        let google = ctx.new_object("Company").unwrap();
        let john = employee(&mut ctx, "John", 1);
        ctx.set_value(google, "employees", [john]).unwrap();
        ctx.set_value(google, "employees", Vec::<ObjectRef>::new()).unwrap();
        assert!(ctx.is_inserted(john));
    }

    #[test]
    fn test_adding_discarded_object_reinserts_it() {
        let mut ctx = ObjectContext::new(coordinator());
        let google = ctx.new_object("Company").unwrap();
        let john = employee(&mut ctx, "John", 1);
        ctx.delete_object(john).unwrap();
        assert!(!ctx.is_inserted(john));

        ctx.related(google, "employees").unwrap().add(john).unwrap();
        assert!(ctx.is_inserted(john));
    }

    #[test]
    fn test_linking_discarded_object_to_one_reinserts_it() {
        let coordinator = coordinator();
        let mut ctx = ObjectContext::new(Arc::clone(&coordinator));
        let google = ctx.new_object("Company").unwrap();
        ctx.set_value(google, "name", "Google").unwrap();
        ctx.save().unwrap();

        let john = employee(&mut ctx, "John", 1);
        ctx.delete_object(john).unwrap();
        ctx.set_value(john, "company", google).unwrap();
        assert!(ctx.is_inserted(john));
        ctx.save().unwrap();

        let google_id = ctx.object_id(google).unwrap();
        let mut other = ObjectContext::new(coordinator);
        let google = other.existing_object(&google_id).unwrap();
        let staff = other.to_many(google, "employees").unwrap();
        assert_eq!(names(&mut other, &staff), ["John"]);
    }

    #[test]
    fn test_save_refuses_temporary_reference() {
        let mut ctx = ObjectContext::new(coordinator());
        let mike = employee(&mut ctx, "Mike", 1);
        ctx.save().unwrap();
        let john = employee(&mut ctx, "John", 1);
        ctx.delete_object(john).unwrap();

        // Bypass inverse maintenance to leave a link to a discarded object.
        let index = ctx.property_index(mike, "spouse").unwrap();
        ctx.obj_mut(mike).unwrap().slots[index] = Slot::ToOne(Some(john));
        ctx.did_change(mike, index);

        let err = ctx.save().unwrap_err();
        assert!(matches!(err, GraphError::Id(IdError::TemporaryId { .. })));
        assert!(ctx.is_updated(mike));
        assert_eq!(ctx.to_one(mike, "spouse").unwrap(), Some(john));
    }

    #[test]
    fn test_set_value_with_equal_value_is_noop() {
        let mut ctx = ObjectContext::new(coordinator());
        let e = employee(&mut ctx, "John", 10);
        ctx.save().unwrap();

        ctx.set_value(e, "salary", 10).unwrap();
        ctx.set_value(e, "name", "John").unwrap();
        assert!(!ctx.has_changes());
        assert!(!ctx.is_updated(e));

        ctx.set_value(e, "salary", 11).unwrap();
        assert!(ctx.is_updated(e));
    }

    #[test]
    fn test_delete_then_insert_cancels() {
        let mut ctx = ObjectContext::new(coordinator());
        let e = employee(&mut ctx, "John", 10);
        ctx.save().unwrap();

        ctx.delete_object(e).unwrap();
        assert!(ctx.is_deleted(e));
        assert!(ctx.has_changes());

        ctx.insert_object(e).unwrap();
        assert!(!ctx.is_deleted(e));
        assert!(!ctx.has_changes());
    }

    #[test]
    fn test_deleting_new_object_detaches_it() {
        let mut ctx = ObjectContext::new(coordinator());
        let google = ctx.new_object("Company").unwrap();
        let john = employee(&mut ctx, "John", 10);
        ctx.set_value(john, "company", google).unwrap();

        ctx.delete_object(john).unwrap();
        assert!(ctx.to_many(google, "employees").unwrap().is_empty());
        assert!(!ctx.is_deleted(john));
        assert_eq!(ctx.inserted_objects(), vec![google]);
    }

    #[test]
    fn test_saved_delete_nullifies_partners() {
        let coordinator = coordinator();
        let mut ctx = ObjectContext::new(Arc::clone(&coordinator));
        let google = ctx.new_object("Company").unwrap();
        let john = employee(&mut ctx, "John", 10);
        let mike = employee(&mut ctx, "Mike", 10);
        ctx.set_value(google, "employees", [john, mike]).unwrap();
        ctx.save().unwrap();
        let google_id = ctx.object_id(google).unwrap();

        ctx.delete_object(john).unwrap();
        ctx.save().unwrap();
        assert_eq!(ctx.to_many(google, "employees").unwrap(), vec![mike]);
        assert!(ctx.object(john).is_err());

        let mut other = ObjectContext::new(coordinator);
        let google = other.object_with_id(&google_id).unwrap();
        assert_eq!(other.to_many(google, "employees").unwrap().len(), 1);
        assert_eq!(other.count(&FetchRequest::new("Employee")).unwrap(), 1);
    }

    #[test]
    fn test_refresh_discards_changes() {
        let mut ctx = ObjectContext::new(coordinator());
        let e = employee(&mut ctx, "John", 10);
        ctx.save().unwrap();

        ctx.set_value(e, "salary", 99).unwrap();
        ctx.refresh(e).unwrap();
        assert!(ctx.is_fault(e));
        assert!(!ctx.has_changes());
        assert_eq!(ctx.attribute(e, "salary").unwrap(), Value::Int(10));
    }

    #[test]
    fn test_cross_context_handles_rejected() {
        let coordinator = coordinator();
        let mut a = ObjectContext::new(Arc::clone(&coordinator));
        let mut b = ObjectContext::new(coordinator);
        let foreign = a.new_object("Company").unwrap();
        let local = b.new_object("Employee").unwrap();

        let err = b.set_value(local, "company", foreign).unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::CrossContext)));
        let err = b.delete_object(foreign).unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::CrossContext)));
        assert!(!b.is_inserted(foreign));
    }

    #[test]
    fn test_required_attribute_checked_on_save() {
        let mut ctx = ObjectContext::new(coordinator());
        let badge = ctx.new_object("Badge").unwrap();

        let err = ctx.save().unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::MissingRequired { .. })));
        assert!(ctx.is_inserted(badge));
        assert!(ctx.is_new(badge));

        ctx.set_value(badge, "code", "A-1").unwrap();
        ctx.save().unwrap();
        assert!(!ctx.is_new(badge));
    }

    #[test]
    fn test_failed_save_keeps_changes() {
        let store = Arc::new(AtomicStore::open(FlakyBackend::default()).unwrap());
        let coordinator = Arc::new(StoreCoordinator::new(model()));
        coordinator.add_store(store.clone()).unwrap();
        let mut ctx = ObjectContext::new(coordinator);
        let google = ctx.new_object("Company").unwrap();
        let john = employee(&mut ctx, "John", 10);
        ctx.set_value(john, "company", google).unwrap();

        store.backend().fail.store(true, Ordering::SeqCst);
        let err = ctx.save().unwrap_err();
        assert!(err.is_retryable());
        assert!(ctx.is_new(john));
        assert_eq!(ctx.inserted_objects().len(), 2);
        assert_eq!(ctx.to_one(john, "company").unwrap(), Some(google));

        store.backend().fail.store(false, Ordering::SeqCst);
        ctx.save().unwrap();
        assert!(!ctx.has_changes());
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_fetch_filters_sorts_and_pages() {
        let mut ctx = ObjectContext::new(coordinator());
        employee(&mut ctx, "Carol", 300);
        employee(&mut ctx, "Alice", 100);
        ctx.save().unwrap();
        employee(&mut ctx, "Bob", 200);
        let manager = ctx.new_object("Manager").unwrap();
        ctx.set_value(manager, "name", "Dana").unwrap();
        ctx.set_value(manager, "salary", 400).unwrap();

        let request = FetchRequest::new("Employee")
            .filter("salary >= 200")
            .unwrap()
            .sort_by(SortDescriptor::descending("salary"));
        let found = ctx.execute_fetch(&request).unwrap();
        assert_eq!(names(&mut ctx, &found), ["Dana", "Carol", "Bob"]);

        let exact = request.clone().include_subentities(false);
        assert_eq!(ctx.count(&exact).unwrap(), 2);

        let saved_only = request.clone().include_pending_changes(false);
        let found = ctx.execute_fetch(&saved_only).unwrap();
        assert_eq!(names(&mut ctx, &found), ["Carol"]);

        let paged = FetchRequest::new("Employee")
            .sort_by(SortDescriptor::ascending("name"))
            .offset(1)
            .limit(2);
        let found = ctx.execute_fetch(&paged).unwrap();
        assert_eq!(names(&mut ctx, &found), ["Bob", "Carol"]);
    }

    #[test]
    fn test_fetch_skips_pending_deletes() {
        let mut ctx = ObjectContext::new(coordinator());
        let e = employee(&mut ctx, "John", 10);
        ctx.save().unwrap();
        ctx.delete_object(e).unwrap();

        assert!(ctx.execute_fetch(&FetchRequest::new("Employee")).unwrap().is_empty());
        let raw = FetchRequest::new("Employee").include_pending_changes(false);
        assert_eq!(ctx.execute_fetch(&raw).unwrap(), vec![e]);
    }

    #[test]
    fn test_fetch_type_error_surfaces() {
        let mut ctx = ObjectContext::new(coordinator());
        employee(&mut ctx, "John", 10);
        let request = FetchRequest::new("Employee").filter("name > 3").unwrap();
        let err = ctx.execute_fetch(&request).unwrap_err();
        assert!(matches!(err, GraphError::Predicate(PredicateError::Type { .. })));
    }

    #[test]
    fn test_evaluate_reads_relationships_as_ids() {
        let mut ctx = ObjectContext::new(coordinator());
        let google = ctx.new_object("Company").unwrap();
        let john = employee(&mut ctx, "John", 10);
        ctx.set_value(john, "company", google).unwrap();

        assert!(ctx.evaluate(john, &crate::predicate::parse("company != null").unwrap()).unwrap());
        assert!(ctx.evaluate(john, &crate::predicate::parse("spouse == null").unwrap()).unwrap());
    }

    #[test]
    fn test_merge_updates_loaded_objects() {
        let coordinator = coordinator();
        let mut a = ObjectContext::new(Arc::clone(&coordinator));
        let john = employee(&mut a, "John", 10);
        a.save().unwrap();
        let id = a.object_id(john).unwrap();

        let mut b = ObjectContext::new(coordinator);
        let local = b.existing_object(&id).unwrap();
        let changes = b.subscribe(EventFilter::ObjectChanges);
        let saves = a.subscribe(EventFilter::Saves);

        a.set_value(john, "salary", 20).unwrap();
        let google = a.new_object("Company").unwrap();
        a.set_value(google, "name", "Google").unwrap();
        a.set_value(john, "company", google).unwrap();
        a.save().unwrap();

        let events = saves.drain();
        assert!(matches!(events[0], ContextEvent::WillSave));
        let ContextEvent::DidSave(notification) = &events[1] else {
            panic!("expected DidSave, got {:?}", events[1]);
        };
        b.merge_changes_from_save_notification(notification).unwrap();

        assert_eq!(b.attribute(local, "salary").unwrap(), Value::Int(20));
        assert!(!b.has_changes());
        let company = b.to_one(local, "company").unwrap().unwrap();
        assert_eq!(b.attribute(company, "name").unwrap(), Value::from("Google"));
        assert!(!b.is_fault(company));
        assert_eq!(b.to_many(company, "employees").unwrap(), vec![local]);
        assert!(matches!(changes.try_recv(), Some(ContextEvent::ObjectsDidChange(_))));

        a.delete_object(john).unwrap();
        a.save().unwrap();
        let ContextEvent::DidSave(notification) = saves.drain().pop().unwrap() else {
            panic!("expected DidSave");
        };
        b.merge_changes_from_save_notification(&notification).unwrap();
        assert!(b.object(local).is_err());
        assert!(b.to_many(company, "employees").unwrap().is_empty());
    }

    #[test]
    fn test_merge_rejects_foreign_coordinator() {
        let mut a = ObjectContext::new(coordinator());
        let mut b = ObjectContext::new(coordinator());
        let saves = a.subscribe(EventFilter::Saves);
        employee(&mut a, "John", 1);
        a.save().unwrap();

        let Some(ContextEvent::DidSave(notification)) = saves.drain().pop() else {
            panic!("expected DidSave");
        };
        let err = b.merge_changes_from_save_notification(&notification).unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::IncompatibleContext)));
    }

    #[test]
    fn test_objects_did_change_is_coalesced() {
        let mut ctx = ObjectContext::new(coordinator());
        let sub = ctx.subscribe(EventFilter::ObjectChanges);
        let a = employee(&mut ctx, "A", 1);
        let b = employee(&mut ctx, "B", 1);
        ctx.delete_object(b).unwrap();
        ctx.process_pending_changes();
        ctx.process_pending_changes();

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        let ContextEvent::ObjectsDidChange(changed) = &events[0] else {
            panic!("expected ObjectsDidChange");
        };
        assert_eq!(changed.inserted.iter().copied().collect::<Vec<_>>(), vec![a]);
        assert!(changed.deleted.is_empty());
    }

    #[test]
    fn test_property_change_events() {
        let mut ctx = ObjectContext::new(coordinator());
        let e = employee(&mut ctx, "John", 1);
        let sub = ctx.subscribe(EventFilter::Property {
            object: e,
            property: Some("salary".into()),
        });

        ctx.set_value(e, "name", "Johnny").unwrap();
        ctx.set_value(e, "salary", 5).unwrap();
        ctx.set_value(e, "salary", 5).unwrap();

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ContextEvent::PropertyDidChange(PropertyChange { property, .. }) if property == "salary"
        ));
    }

    #[test]
    fn test_related_set_clone_into() {
        let coordinator = coordinator();
        let mut a = ObjectContext::new(Arc::clone(&coordinator));
        let google = a.new_object("Company").unwrap();
        let john = employee(&mut a, "John", 1);
        a.set_value(google, "employees", [john]).unwrap();

        let mut b = ObjectContext::new(Arc::clone(&coordinator));
        let err = a.related(google, "employees").unwrap().clone_into(&mut b).unwrap_err();
        assert!(matches!(err, GraphError::Id(IdError::TemporaryId { .. })));

        a.save().unwrap();
        let cloned = a.related(google, "employees").unwrap().clone_into(&mut b).unwrap();
        assert_eq!(b.object_id(cloned[0]).unwrap(), a.object_id(john).unwrap());

        let mut stranger = ObjectContext::new(Arc::new(StoreCoordinator::new(model())));
        let err = a
            .related(google, "employees")
            .unwrap()
            .clone_into(&mut stranger)
            .unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::IncompatibleContext)));
    }

    #[test]
    fn test_to_many_faults_until_read() {
        let coordinator = coordinator();
        let mut a = ObjectContext::new(Arc::clone(&coordinator));
        let google = a.new_object("Company").unwrap();
        let john = employee(&mut a, "John", 1);
        a.set_value(john, "company", google).unwrap();
        a.save().unwrap();
        let id = a.object_id(google).unwrap();

        let mut b = ObjectContext::new(coordinator);
        let google = b.object_with_id(&id).unwrap();
        assert!(b.related(google, "employees").unwrap().is_fault());
        b.refresh(google).unwrap();
        let mut employees = b.related(google, "employees").unwrap();
        assert_eq!(employees.len().unwrap(), 1);
        assert!(!employees.is_fault());
    }

    #[test]
    fn test_reset_forgets_everything() {
        let mut ctx = ObjectContext::new(coordinator());
        let e = employee(&mut ctx, "John", 1);
        ctx.reset();
        assert!(!ctx.has_changes());
        assert_eq!(ctx.registered_count(), 0);
        assert!(matches!(
            ctx.attribute(e, "name").unwrap_err(),
            GraphError::Context(ContextError::Unregistered)
        ));
        assert!(!ctx.is_fault(e));
    }

    #[test]
    fn test_save_without_store_fails_cleanly() {
        let mut ctx = ObjectContext::new(Arc::new(StoreCoordinator::new(model())));
        let e = employee(&mut ctx, "John", 1);
        let err = ctx.save().unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::NoPersistentStore)));
        assert!(ctx.is_inserted(e));
    }

    #[test]
    fn test_config_validation() {
        let config = ContextConfig {
            notification_capacity: 0,
            ..ContextConfig::default()
        };
        assert!(ObjectContext::with_config(coordinator(), config).is_err());
        let parsed: ContextConfig = serde_json::from_str(r#"{"validate_on_save": false}"#).unwrap();
        assert_eq!(parsed.notification_capacity, 1024);
        assert!(!parsed.validate_on_save);
    }
}
