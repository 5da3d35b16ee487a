//! Atomic stores.
//!
//! The whole dataset lives in an in-memory cache-node table, loaded once
//! from an [`AtomicBackend`] and answered from memory. A save applies the
//! request to a copy of the table, persists the full snapshot, then swaps
//! the copy in, so a failed persist leaves the store exactly as it was.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::GraphResult;
use crate::id::{ObjectId, StoreId};

use super::node::{NodeSubject, StoreCacheNode};
use super::request::{FetchRequest, SaveChangesRequest};
use super::traits::{PersistentStore, StorageError, StoreBinding, StoreMetadata};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Everything an atomic store persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicSnapshot {
    pub metadata: StoreMetadata,
    /// Last reference key handed out.
    pub next_key: i64,
    pub nodes: Vec<StoreCacheNode>,
}

/// Where an atomic store keeps its snapshot.
pub trait AtomicBackend: Send + Sync + Debug {
    /// Short name reported as the store type.
    fn store_type(&self) -> &'static str;

    /// Reads the last persisted snapshot, `None` for a fresh backend.
    fn load(&self) -> GraphResult<Option<AtomicSnapshot>>;

    /// Replaces the persisted snapshot. Must not leave a partial snapshot
    /// behind on failure.
    fn persist(&self, snapshot: &AtomicSnapshot) -> GraphResult<()>;
}

/// Keeps the persisted snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    persisted: Mutex<Option<AtomicSnapshot>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that starts out holding `snapshot`.
    #[must_use]
    pub fn with_snapshot(snapshot: AtomicSnapshot) -> Self {
        Self {
            persisted: Mutex::new(Some(snapshot)),
        }
    }

    /// The last persisted snapshot.
    pub fn snapshot(&self) -> GraphResult<Option<AtomicSnapshot>> {
        let guard = self.persisted.lock().map_err(|_| lock_err("memory.snapshot"))?;
        Ok(guard.clone())
    }
}

impl AtomicBackend for MemoryBackend {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    fn load(&self) -> GraphResult<Option<AtomicSnapshot>> {
        self.snapshot()
    }

    fn persist(&self, snapshot: &AtomicSnapshot) -> GraphResult<()> {
        let mut guard = self.persisted.lock().map_err(|_| lock_err("memory.persist"))?;
        *guard = Some(snapshot.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AtomicState {
    metadata: StoreMetadata,
    next_key: i64,
    nodes: BTreeMap<ObjectId, StoreCacheNode>,
}

impl AtomicState {
    fn fresh(store_type: &str) -> Self {
        Self {
            metadata: StoreMetadata {
                store_id: StoreId::new(),
                store_type: store_type.to_string(),
                model_hash: None,
            },
            next_key: 0,
            nodes: BTreeMap::new(),
        }
    }

    fn from_snapshot(snapshot: AtomicSnapshot) -> Self {
        Self {
            metadata: snapshot.metadata,
            next_key: snapshot.next_key,
            nodes: snapshot
                .nodes
                .into_iter()
                .map(|node| (node.id.clone(), node))
                .collect(),
        }
    }

    fn to_snapshot(&self) -> AtomicSnapshot {
        AtomicSnapshot {
            metadata: self.metadata.clone(),
            next_key: self.next_key,
            nodes: self.nodes.values().cloned().collect(),
        }
    }

    fn apply(&mut self, request: &SaveChangesRequest) -> Result<(), StorageError> {
        for node in &request.inserted {
            if node.id.is_temporary() {
                return Err(StorageError::BackendError(format!(
                    "cannot insert temporary id {}",
                    node.id
                )));
            }
            if self.nodes.contains_key(&node.id) {
                return Err(StorageError::DuplicateKey(node.id.to_uri()));
            }
            self.nodes.insert(node.id.clone(), node.clone());
        }

        for node in &request.updated {
            let existing = self
                .nodes
                .get_mut(&node.id)
                .ok_or_else(|| StorageError::NotFound(node.id.clone()))?;
            existing.merge_from(node);
        }

        for id in &request.deleted {
            if self.nodes.remove(id).is_some() {
                for node in self.nodes.values_mut() {
                    node.remove_reference(id);
                }
            }
        }

        Ok(())
    }
}

/// A store answering every call from an in-memory table.
///
/// # Example
/// ```
/// use objgraph::AtomicStore;
///
/// let store = AtomicStore::in_memory();
/// assert!(store.is_empty().unwrap());
/// ```
#[derive(Debug)]
pub struct AtomicStore<B: AtomicBackend> {
    store_id: StoreId,
    backend: B,
    binding: StoreBinding,
    state: RwLock<AtomicState>,
}

impl AtomicStore<MemoryBackend> {
    /// A fresh store with nothing persisted.
    #[must_use]
    pub fn in_memory() -> Self {
        let backend = MemoryBackend::new();
        let state = AtomicState::fresh(backend.store_type());
        Self {
            store_id: state.metadata.store_id,
            backend,
            binding: StoreBinding::new(),
            state: RwLock::new(state),
        }
    }
}

impl<B: AtomicBackend> AtomicStore<B> {
    /// Loads the backend's snapshot, creating and persisting a fresh store
    /// identity if it has none.
    pub fn open(backend: B) -> GraphResult<Self> {
        let state = match backend.load()? {
            Some(snapshot) => AtomicState::from_snapshot(snapshot),
            None => {
                let state = AtomicState::fresh(backend.store_type());
                backend.persist(&state.to_snapshot())?;
                state
            }
        };

        debug!(
            store = %state.metadata.store_id,
            store_type = backend.store_type(),
            records = state.nodes.len(),
            "opened atomic store"
        );

        Ok(Self {
            store_id: state.metadata.store_id,
            backend,
            binding: StoreBinding::new(),
            state: RwLock::new(state),
        })
    }

    #[must_use]
    pub const fn store_id(&self) -> StoreId {
        self.store_id
    }

    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of stored records.
    pub fn len(&self) -> GraphResult<usize> {
        Ok(self.read("atomic.len")?.nodes.len())
    }

    pub fn is_empty(&self) -> GraphResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self, context: &'static str) -> Result<RwLockReadGuard<'_, AtomicState>, StorageError> {
        self.state.read().map_err(|_| lock_err(context))
    }

    fn write(
        &self,
        context: &'static str,
    ) -> Result<RwLockWriteGuard<'_, AtomicState>, StorageError> {
        self.state.write().map_err(|_| lock_err(context))
    }
}

impl<B: AtomicBackend> PersistentStore for AtomicStore<B> {
    fn load_metadata(&self) -> GraphResult<StoreMetadata> {
        Ok(self.read("atomic.load_metadata")?.metadata.clone())
    }

    fn binding(&self) -> &StoreBinding {
        &self.binding
    }

    fn get_object_values(&self, id: &ObjectId) -> GraphResult<Option<StoreCacheNode>> {
        Ok(self.read("atomic.get_object_values")?.nodes.get(id).cloned())
    }

    fn get_to_one_relationship_value(
        &self,
        id: &ObjectId,
        relationship: &str,
    ) -> GraphResult<Option<ObjectId>> {
        let state = self.read("atomic.get_to_one")?;
        let node = state
            .nodes
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        Ok(node.to_one(relationship).cloned())
    }

    fn get_to_many_relationship_value(
        &self,
        id: &ObjectId,
        relationship: &str,
    ) -> GraphResult<std::collections::BTreeSet<ObjectId>> {
        let state = self.read("atomic.get_to_many")?;
        let node = state
            .nodes
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        Ok(node.to_many(relationship).cloned().unwrap_or_default())
    }

    fn execute_fetch_request(&self, request: &FetchRequest) -> GraphResult<Vec<ObjectId>> {
        let model = self.binding.require_model()?;
        let entity = model.entity(&request.entity)?;
        let names: HashSet<&str> = if request.include_subentities {
            entity.names_in_hierarchy().collect()
        } else {
            HashSet::from([entity.name()])
        };

        let state = self.read("atomic.fetch")?;
        let mut matched = Vec::new();
        for node in state.nodes.values() {
            if !names.contains(node.id.entity()) {
                continue;
            }
            if let Some(predicate) = &request.predicate {
                let mut subject = NodeSubject {
                    node,
                    entity: model.entity(node.id.entity())?,
                };
                if !predicate.matches(&mut subject)? {
                    continue;
                }
            }
            matched.push(node.id.clone());
        }

        trace!(entity = %request.entity, matched = matched.len(), "atomic fetch");
        Ok(matched)
    }

    fn execute_save_request(&self, request: &SaveChangesRequest) -> GraphResult<()> {
        let model_hash = self.binding.model().map(|m| m.version_hash().to_string());

        let mut state = self.write("atomic.save")?;
        let mut next = state.clone();
        next.apply(request)?;
        if model_hash.is_some() {
            next.metadata.model_hash = model_hash;
        }

        self.backend.persist(&next.to_snapshot())?;
        *state = next;

        debug!(
            store = %self.store_id,
            inserted = request.inserted.len(),
            updated = request.updated.len(),
            deleted = request.deleted.len(),
            "atomic store saved"
        );
        Ok(())
    }

    fn get_permanent_ids_for_objects(&self, ids: &[ObjectId]) -> GraphResult<Vec<ObjectId>> {
        let mut state = self.write("atomic.permanent_ids")?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if id.is_temporary() {
                state.next_key += 1;
                out.push(ObjectId::new_permanent(self.store_id, id.entity(), state.next_key));
            } else {
                out.push(id.clone());
            }
        }
        Ok(out)
    }
}
