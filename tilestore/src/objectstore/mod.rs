//! Object store abstraction.
//!
//! - [`ObjectStore`]: dyn-compatible client trait for one bucket
//! - [`object_stream`]: lazy paginated listing, optionally retrying pages
//! - [`MemoryObjectStore`]: in-memory bucket with fault injection

mod listing;
mod memory;
mod traits;

pub use listing::{object_stream, object_stream_with_retry, prefix_exists};
pub use memory::MemoryObjectStore;
pub use traits::{
    BoxFuture, ListPage, ObjectMetadata, ObjectStore, ObjectStoreError, ObjectSummary,
    StoredObject, MAX_DELETE_BATCH, MAX_KEYS_PER_PAGE,
};
