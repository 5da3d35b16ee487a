//! The store coordinator: owns the model and routes object IDs to stores.

use std::sync::{Arc, RwLock};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ContextError, GraphError, GraphResult, IdError};
use crate::id::{ObjectId, StoreId};
use crate::model::Model;
use crate::storage::{PersistentStore, StorageError};

type StoreEntry = (StoreId, Arc<dyn PersistentStore>);

/// Routes store identities to store instances for any number of contexts.
///
/// Contexts share a coordinator through an `Arc`; it is `Send + Sync`.
#[derive(Debug)]
pub struct StoreCoordinator {
    id: Uuid,
    model: Arc<Model>,
    stores: RwLock<Vec<StoreEntry>>,
}

impl StoreCoordinator {
    #[must_use]
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model,
            stores: RwLock::new(Vec::new()),
        }
    }

    /// Identity used to check that contexts share this coordinator.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Adds a store and returns its identity.
    ///
    /// The store must report a non-nil identity. A store bound to another
    /// coordinator fails with [`ContextError::AlreadyBound`]; adding the same
    /// store twice is a no-op. A model hash that differs from this model's
    /// is logged and otherwise ignored.
    pub fn add_store(&self, store: Arc<dyn PersistentStore>) -> GraphResult<StoreId> {
        let metadata = store.load_metadata()?;
        if metadata.store_id.is_nil() {
            return Err(StorageError::BackendError(format!(
                "{} store reported a nil identity",
                metadata.store_type
            ))
            .into());
        }

        store.binding().bind(self.id, Arc::clone(&self.model))?;

        if let Some(hash) = metadata.model_hash.as_deref() {
            if hash != self.model.version_hash() {
                warn!(
                    store = %metadata.store_id,
                    stored = hash,
                    current = self.model.version_hash(),
                    "store data was written with a different model"
                );
            }
        }

        let mut stores = self.stores.write().map_err(|_| poisoned())?;
        if !stores.iter().any(|(id, _)| *id == metadata.store_id) {
            stores.push((metadata.store_id, store));
            debug!(
                coordinator = %self.id,
                store = %metadata.store_id,
                store_type = %metadata.store_type,
                "added persistent store"
            );
        }
        Ok(metadata.store_id)
    }

    /// Identities of every added store, in insertion order.
    pub fn stores(&self) -> GraphResult<Vec<StoreId>> {
        let stores = self.stores.read().map_err(|_| poisoned())?;
        Ok(stores.iter().map(|(id, _)| *id).collect())
    }

    /// Looks up a store by identity.
    pub fn store(&self, id: StoreId) -> GraphResult<Arc<dyn PersistentStore>> {
        let stores = self.stores.read().map_err(|_| poisoned())?;
        stores
            .iter()
            .find(|(sid, _)| *sid == id)
            .map(|(_, store)| Arc::clone(store))
            .ok_or_else(|| {
                IdError::UnknownStore {
                    store: id.to_string(),
                }
                .into()
            })
    }

    /// The store holding `id`. Temporary IDs have no store.
    pub fn route(&self, id: &ObjectId) -> GraphResult<Arc<dyn PersistentStore>> {
        let store = id.store().ok_or_else(|| IdError::TemporaryId {
            uri: id.to_string(),
        })?;
        self.store(store)
    }

    /// The store new objects are assigned to: the first one added.
    pub fn default_store(&self) -> GraphResult<(StoreId, Arc<dyn PersistentStore>)> {
        let stores = self.stores.read().map_err(|_| poisoned())?;
        stores
            .first()
            .map(|(id, store)| (*id, Arc::clone(store)))
            .ok_or_else(|| ContextError::NoPersistentStore.into())
    }

    /// Parses a URI and checks that its entity and store are known here.
    pub fn object_id_from_uri(&self, uri: &str) -> GraphResult<ObjectId> {
        let id = ObjectId::parse_uri(uri)?;
        self.model.entity(id.entity())?;
        if let Some(store) = id.store() {
            self.store(store)?;
        }
        Ok(id)
    }
}

fn poisoned() -> GraphError {
    GraphError::internal("coordinator store table lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeType, EntityDefinition};
    use crate::storage::AtomicStore;

    fn model() -> Arc<Model> {
        Arc::new(
            Model::from_entities([EntityDefinition::new("Book").attribute("title", AttributeType::String)])
                .unwrap(),
        )
    }

    #[test]
    fn test_add_store_and_route() {
        let coordinator = StoreCoordinator::new(model());
        let store = Arc::new(AtomicStore::in_memory());
        let id = coordinator.add_store(store.clone()).unwrap();
        assert_eq!(id, store.store_id());
        assert_eq!(coordinator.stores().unwrap(), vec![id]);

        let object = ObjectId::new_permanent(id, "Book", 1);
        assert!(coordinator.route(&object).is_ok());
        assert_eq!(coordinator.default_store().unwrap().0, id);
    }

    #[test]
    fn test_adding_same_store_twice_is_noop() {
        let coordinator = StoreCoordinator::new(model());
        let store = Arc::new(AtomicStore::in_memory());
        coordinator.add_store(store.clone()).unwrap();
        coordinator.add_store(store).unwrap();
        assert_eq!(coordinator.stores().unwrap().len(), 1);
    }

    #[test]
    fn test_store_bound_elsewhere_rejected() {
        let store = Arc::new(AtomicStore::in_memory());
        StoreCoordinator::new(model()).add_store(store.clone()).unwrap();

        let err = StoreCoordinator::new(model()).add_store(store).unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::AlreadyBound)));
    }

    #[test]
    fn test_route_temporary_id_fails() {
        let coordinator = StoreCoordinator::new(model());
        let err = coordinator.route(&ObjectId::new_temporary("Book")).unwrap_err();
        assert!(matches!(err, GraphError::Id(IdError::TemporaryId { .. })));
    }

    #[test]
    fn test_no_store_for_new_objects() {
        let coordinator = StoreCoordinator::new(model());
        let err = coordinator.default_store().unwrap_err();
        assert!(matches!(err, GraphError::Context(ContextError::NoPersistentStore)));
    }

    #[test]
    fn test_object_id_from_uri() {
        let coordinator = StoreCoordinator::new(model());
        let store = coordinator.add_store(Arc::new(AtomicStore::in_memory())).unwrap();
        let id = ObjectId::new_permanent(store, "Book", 3);

        assert_eq!(coordinator.object_id_from_uri(&id.to_uri()).unwrap(), id);

        let unknown_entity = ObjectId::new_permanent(store, "Film", 3).to_uri();
        assert!(coordinator.object_id_from_uri(&unknown_entity).unwrap_err().is_model());

        let unknown_store = ObjectId::new_permanent(StoreId::new(), "Book", 3).to_uri();
        let err = coordinator.object_id_from_uri(&unknown_store).unwrap_err();
        assert!(matches!(err, GraphError::Id(IdError::UnknownStore { .. })));

        let blank = format!("{}:///Book/3", crate::id::URI_SCHEME);
        let err = coordinator.object_id_from_uri(&blank).unwrap_err();
        assert!(matches!(err, GraphError::Id(IdError::TemporaryId { .. })));
    }
}
