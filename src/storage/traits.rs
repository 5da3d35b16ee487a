//! The persistent store contract.
//!
//! A store exchanges only [`StoreCacheNode`]s and [`ObjectId`]s with the
//! core. Two shapes implement it:
//! - atomic stores keep the whole dataset in memory and persist it as one
//!   snapshot (see [`super::AtomicStore`])
//! - incremental stores answer each call against an external medium and
//!   implement this trait directly

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{ContextError, GraphResult};
use crate::id::{ObjectId, StoreId};
use crate::model::Model;

use super::node::StoreCacheNode;
use super::request::{FetchRequest, SaveChangesRequest};

/// Errors a store reports.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No record for the requested object.
    #[error("Record not found: {0}")]
    NotFound(ObjectId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The store cannot answer the request as posed.
    #[error("Query error: {0}")]
    Query(String),

    /// I/O against the backing medium failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

/// What a store reports about itself when added to a coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub store_id: StoreId,
    pub store_type: String,
    /// Version hash of the model the stored data was last written with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hash: Option<String>,
}

#[derive(Debug)]
struct Bound {
    coordinator: Uuid,
    model: Arc<Model>,
}

/// Records the coordinator a store belongs to. A store can be bound once.
#[derive(Debug, Default)]
pub struct StoreBinding {
    bound: OnceLock<Bound>,
}

impl StoreBinding {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds to `coordinator`. Binding again to the same coordinator is a
    /// no-op; any other coordinator fails with [`ContextError::AlreadyBound`].
    pub fn bind(&self, coordinator: Uuid, model: Arc<Model>) -> Result<(), ContextError> {
        let bound = self.bound.get_or_init(|| Bound { coordinator, model });
        if bound.coordinator == coordinator {
            Ok(())
        } else {
            Err(ContextError::AlreadyBound)
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> Option<Uuid> {
        self.bound.get().map(|b| b.coordinator)
    }

    /// The model of the owning coordinator.
    #[must_use]
    pub fn model(&self) -> Option<&Arc<Model>> {
        self.bound.get().map(|b| &b.model)
    }

    pub(crate) fn require_model(&self) -> Result<&Arc<Model>, StorageError> {
        self.model()
            .ok_or_else(|| StorageError::BackendError("store is not bound to a coordinator".into()))
    }
}

/// Contract for pluggable storage.
///
/// # Consistency
/// - Implementations serialize their own I/O; the trait is `Send + Sync` so
///   one store can serve several contexts on different threads.
/// - `execute_save_request` is all-or-nothing: on error, persisted state
///   must be unchanged.
pub trait PersistentStore: Send + Sync + std::fmt::Debug {
    /// Returns the store identity. `store_id` must not be nil.
    fn load_metadata(&self) -> GraphResult<StoreMetadata>;

    /// The coordinator binding embedded in this store.
    fn binding(&self) -> &StoreBinding;

    /// Fetches the cache node of one record, `None` if there is none.
    fn get_object_values(&self, id: &ObjectId) -> GraphResult<Option<StoreCacheNode>>;

    /// Resolves a to-one relationship the cache node omitted.
    fn get_to_one_relationship_value(
        &self,
        id: &ObjectId,
        relationship: &str,
    ) -> GraphResult<Option<ObjectId>>;

    /// Resolves the members of a to-many relationship.
    fn get_to_many_relationship_value(
        &self,
        id: &ObjectId,
        relationship: &str,
    ) -> GraphResult<BTreeSet<ObjectId>>;

    /// Returns the IDs of every persisted record matching the request's
    /// entity and predicate. Sorting and paging are applied by the context.
    fn execute_fetch_request(&self, request: &FetchRequest) -> GraphResult<Vec<ObjectId>>;

    /// Applies inserts, updates and deletes.
    fn execute_save_request(&self, request: &SaveChangesRequest) -> GraphResult<()>;

    /// Assigns permanent IDs, one per input and in input order.
    fn get_permanent_ids_for_objects(&self, ids: &[ObjectId]) -> GraphResult<Vec<ObjectId>>;
}
