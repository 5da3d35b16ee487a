//! # objgraph - an embedded object graph persistence engine
//!
//! objgraph lets an application work with a live, in-memory graph of typed
//! domain objects while deferring storage to a pluggable backend.
//!
//! ## Core Concepts
//!
//! - **Model**: entities with attributes and relationships, validated once
//! - **ObjectId**: stable identity of a record, with a URI form
//! - **ObjectContext**: a unit of work that loads objects lazily, tracks
//!   changes, keeps inverse relationships consistent and saves atomically
//! - **StoreCoordinator**: routes object IDs to persistent stores shared by
//!   many contexts
//! - **Expression**: predicates for fetches, built in code or parsed from
//!   text such as `salary > 1000 && company != null`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objgraph::{AtomicStore, FetchRequest, ObjectContext, SortDescriptor, StoreCoordinator};
//!
//! let coordinator = Arc::new(StoreCoordinator::new(Arc::new(model)));
//! coordinator.add_store(Arc::new(AtomicStore::in_memory()))?;
//!
//! let mut ctx = ObjectContext::new(coordinator);
//! let john = ctx.new_object("Employee")?;
//! ctx.set_value(john, "salary", 1200)?;
//! ctx.save()?;
//!
//! let request = FetchRequest::new("Employee")
//!     .filter("salary > 1000")?
//!     .sort_by(SortDescriptor::ascending("name"));
//! let rich = ctx.execute_fetch(&request)?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod coordinator;
pub mod error;
pub mod id;
pub mod model;
pub mod predicate;
pub mod storage;
pub mod value;

pub use context::{
    ContextConfig, ContextEvent, ContextId, EventFilter, FaultState, ManagedObject, ObjectContext,
    ObjectRef, ObjectsChanged, PropertyChange, PropertyValue, RelatedSet, SaveNotification,
    Subscription,
};
pub use coordinator::StoreCoordinator;
pub use error::{ContextError, GraphError, GraphResult, IdError, ModelError, PredicateError};
pub use id::{ObjectId, ReferenceKey, StoreId, URI_SCHEME};
pub use model::{
    AttributeDefinition, AttributeDescription, AttributeType, Cardinality, EntityDefinition,
    EntityDescription, EntityKind, Model, ModelDefinition, PropertyDescription,
    RelationshipDefinition, RelationshipDescription,
};
pub use predicate::{parse, ComparisonOp, Expression, LogicalOp, Subject};
pub use storage::{
    AtomicBackend, AtomicSnapshot, AtomicStore, FetchRequest, MemoryBackend, PersistentStore,
    SaveChangesRequest, SortDescriptor, StorageError, StoreBinding, StoreCacheNode, StoreMetadata,
};
pub use value::Value;

#[cfg(feature = "persistent")]
pub use storage::persistent::{open_file_store, FileBackend, FileStoreConfig};
