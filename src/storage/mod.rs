//! Store contract, exchange types and the bundled atomic store.

mod atomic;
mod node;
mod request;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use atomic::{AtomicBackend, AtomicSnapshot, AtomicStore, MemoryBackend};
pub use node::StoreCacheNode;
pub use request::{FetchRequest, SaveChangesRequest, SortDescriptor};
pub use traits::{PersistentStore, StorageError, StoreBinding, StoreMetadata};
