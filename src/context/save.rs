//! Committing a context's changes to its stores.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ContextError, GraphError, GraphResult, IdError};
use crate::id::{ObjectId, StoreId};
use crate::model::PropertyDescription;
use crate::storage::{SaveChangesRequest, StorageError, StoreCacheNode};
use crate::value::Value;

use super::changes::{ChangeSet, PendingChanges};
use super::notify::{ContextEvent, SaveNotification};
use super::object::{ManagedObject, ObjectRef, Slot};
use super::ObjectContext;

/// Context state restored when a save fails.
struct Checkpoint {
    objects: HashMap<u64, ManagedObject>,
    registry: HashMap<ObjectId, u64>,
    changes: ChangeSet,
    pending: PendingChanges,
}

impl ObjectContext {
    /// Writes every pending insert, update and delete to the stores.
    ///
    /// New objects get permanent IDs from the default store; their handles
    /// stay valid. On failure the context is left exactly as it was before
    /// the call, so the save can be retried.
    pub fn save(&mut self) -> GraphResult<()> {
        self.process_pending_changes();
        if !self.has_changes() {
            return Ok(());
        }
        self.notifications.post(&ContextEvent::WillSave);

        let checkpoint = Checkpoint {
            objects: self.objects.clone(),
            registry: self.registry.clone(),
            changes: self.changes.clone(),
            pending: self.pending.clone(),
        };

        match self.commit() {
            Ok(notification) => {
                debug!(
                    context = %self.id,
                    inserted = notification.inserted.len(),
                    updated = notification.updated.len(),
                    deleted = notification.deleted.len(),
                    "saved context"
                );
                self.process_pending_changes();
                self.notifications
                    .post(&ContextEvent::DidSave(Arc::new(notification)));
                Ok(())
            }
            Err(e) => {
                warn!(context = %self.id, error = %e, "save failed, changes kept");
                self.objects = checkpoint.objects;
                self.registry = checkpoint.registry;
                self.changes = checkpoint.changes;
                self.pending = checkpoint.pending;
                Err(e)
            }
        }
    }

    fn commit(&mut self) -> GraphResult<SaveNotification> {
        let deleted: Vec<ObjectRef> = self.changes.deleted.iter().copied().collect();
        for &object in &deleted {
            match self.detach_relationships(object) {
                // Already gone from the store; nothing to detach.
                Err(GraphError::Context(ContextError::NotFound { .. })) | Ok(()) => {}
                Err(e) => return Err(e),
            }
        }

        if self.config.validate_on_save {
            let touched: Vec<ObjectRef> = self
                .changes
                .inserted
                .iter()
                .copied()
                .chain(self.changes.effective_updated())
                .collect();
            for object in touched {
                self.validate_required(object)?;
            }
        }

        let inserted: Vec<ObjectRef> = self.changes.inserted.iter().copied().collect();
        let mut requests: BTreeMap<StoreId, SaveChangesRequest> = BTreeMap::new();

        if !inserted.is_empty() {
            let (store_id, store) = self.coordinator.default_store()?;
            let temporary = inserted
                .iter()
                .map(|o| self.object_id(*o))
                .collect::<GraphResult<Vec<_>>>()?;
            let permanent = store.get_permanent_ids_for_objects(&temporary)?;
            if permanent.len() != temporary.len() {
                return Err(StorageError::BackendError(format!(
                    "store returned {} permanent IDs for {} objects",
                    permanent.len(),
                    temporary.len()
                ))
                .into());
            }
            for (object, id) in inserted.iter().zip(permanent) {
                self.rekey(*object, id)?;
            }

            let request = requests.entry(store_id).or_default();
            for object in &inserted {
                request.inserted.push(self.cache_node(*object)?);
            }
        }

        let updated: Vec<ObjectRef> = self.changes.effective_updated().collect();
        for object in updated {
            let node = self.cache_node(object)?;
            let store_id = store_of(&node.id)?;
            requests.entry(store_id).or_default().updated.push(node);
        }
        for &object in &deleted {
            let id = self.object_id(object)?;
            let store_id = store_of(&id)?;
            requests.entry(store_id).or_default().deleted.push(id);
        }

        let mut notification = SaveNotification {
            coordinator: self.coordinator.id(),
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        };
        for (store_id, request) in requests {
            if request.is_empty() {
                continue;
            }
            let store = self.coordinator.store(store_id)?;
            debug!(store = %store_id, changes = request.len(), "executing save request");
            store.execute_save_request(&request)?;
            notification.inserted.extend(request.inserted);
            notification.updated.extend(request.updated);
            notification.deleted.extend(request.deleted);
        }

        let gone: BTreeSet<ObjectRef> = deleted.into_iter().collect();
        for &object in &gone {
            self.unregister(object);
        }
        self.scrub_references(&gone);
        self.changes.clear();
        Ok(notification)
    }

    fn validate_required(&mut self, object: ObjectRef) -> GraphResult<()> {
        let entity = self.entity_of(object)?;
        self.fault_in_object(object)?;
        for (index, property) in entity.properties().iter().enumerate() {
            if !property.is_required() {
                continue;
            }
            if let PropertyDescription::Relationship(r) = property {
                if r.is_to_many() {
                    self.resolve_to_many(object, index)?;
                }
            }
            let missing = match &self.obj(object)?.slots[index] {
                Slot::Unset | Slot::Attribute(Value::Null) | Slot::ToOne(None) => true,
                Slot::ToMany(set) => set.members.is_empty(),
                Slot::Attribute(_) | Slot::ToOne(Some(_)) => false,
            };
            if missing {
                return Err(ContextError::MissingRequired {
                    entity: entity.name().to_string(),
                    property: property.name().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Snapshot of an object's loaded values. Unloaded properties are left
    /// out.
    fn cache_node(&self, object: ObjectRef) -> GraphResult<StoreCacheNode> {
        let obj = self.obj(object)?;
        let mut node = StoreCacheNode::new(obj.id.clone());
        for (property, slot) in obj.entity.properties().iter().zip(&obj.slots) {
            let value = match slot {
                Slot::Unset => continue,
                Slot::ToMany(set) if set.faulted => continue,
                Slot::Attribute(v) => v.clone(),
                Slot::ToOne(Some(target)) => Value::Object(self.saved_id(*target)?),
                Slot::ToOne(None) => Value::Null,
                Slot::ToMany(set) => Value::Objects(
                    set.members
                        .iter()
                        .map(|m| self.saved_id(*m))
                        .collect::<GraphResult<BTreeSet<_>>>()?,
                ),
            };
            node.set(property.name(), value);
        }
        Ok(node)
    }

    /// ID of a relationship target as it goes into a store. By now every
    /// inserted object holds a permanent ID, so a temporary one would be a
    /// dangling reference.
    fn saved_id(&self, target: ObjectRef) -> GraphResult<ObjectId> {
        let id = self.object_id(target)?;
        store_of(&id)?;
        Ok(id)
    }
}

fn store_of(id: &ObjectId) -> GraphResult<StoreId> {
    id.store().ok_or_else(|| {
        IdError::TemporaryId {
            uri: id.to_string(),
        }
        .into()
    })
}
