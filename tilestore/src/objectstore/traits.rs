//! Object store client interface.
//!
//! The tile store only needs a handful of bucket operations: paginated
//! prefix listing, single-object get/put/delete, batched delete and a
//! metadata lookup. Any S3-compatible client can be adapted to this trait.
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures so that the store can hold an
//! `Arc<dyn ObjectStore>` and share it between the caller-facing facade and
//! the delete workers.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Largest page a listing request may ask for.
pub const MAX_KEYS_PER_PAGE: usize = 1000;

/// Largest number of keys a single batched delete may carry.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors reported by an object store client.
#[derive(Debug, Clone, Error)]
pub enum ObjectStoreError {
    /// Network or throttling failure; the same request may succeed later.
    #[error("Transient store error: {0}")]
    Transient(String),

    /// The service rejected the request.
    #[error("Store service error: {0}")]
    Service(String),
}

impl ObjectStoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Size and modification time of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub content_type: Option<String>,
}

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// An object's content together with its metadata.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub metadata: ObjectMetadata,
}

/// A bounded page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    /// Token for the next page; `None` once the listing is exhausted.
    pub next_token: Option<String>,
}

/// Bucket operations needed by the tile store.
///
/// Implementations must be safe for concurrent use by the facade and by
/// every delete worker.
pub trait ObjectStore: Send + Sync {
    /// Lists up to `max_keys` objects whose key starts with `prefix`, in key
    /// order, resuming after `continuation` when given.
    fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
        max_keys: usize,
    ) -> BoxFuture<'_, Result<ListPage, ObjectStoreError>>;

    /// Returns `Ok(None)` if the key does not exist.
    fn get_object(&self, key: &str) -> BoxFuture<'_, Result<Option<StoredObject>, ObjectStoreError>>;

    /// Stores an object, replacing any existing one.
    fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> BoxFuture<'_, Result<(), ObjectStoreError>>;

    /// Deletes one object, returning whether it existed.
    fn delete_object(&self, key: &str) -> BoxFuture<'_, Result<bool, ObjectStoreError>>;

    /// Deletes up to [`MAX_DELETE_BATCH`] objects in one request.
    ///
    /// Returns the keys the service failed to delete. A request-level error
    /// means none of the keys can be assumed deleted.
    fn delete_objects(&self, keys: Vec<String>) -> BoxFuture<'_, Result<Vec<String>, ObjectStoreError>>;

    /// Returns `Ok(None)` if the key does not exist.
    fn get_object_metadata(
        &self,
        key: &str,
    ) -> BoxFuture<'_, Result<Option<ObjectMetadata>, ObjectStoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ObjectStoreError::Transient("503 Slow Down".to_string()).is_transient());
        assert!(!ObjectStoreError::Service("403 Forbidden".to_string()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = ObjectStoreError::Service("NoSuchBucket".to_string());
        assert_eq!(err.to_string(), "Store service error: NoSuchBucket");
    }
}
