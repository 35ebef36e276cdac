//! In-memory object store.
//!
//! Behaves like a single bucket: keys are kept in order, listings are paged
//! with start-after continuation tokens and batched deletes report per-key
//! failures. It also offers fault injection so that delete paths can be
//! exercised without a live service.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::traits::{
    BoxFuture, ListPage, ObjectMetadata, ObjectStore, ObjectStoreError, ObjectSummary,
    StoredObject, MAX_DELETE_BATCH, MAX_KEYS_PER_PAGE,
};

/// Bucket held in a sorted map.
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    max_page_size: usize,
    delete_latency: Option<Duration>,
    failing_keys: RwLock<HashSet<String>>,
    failing_batches: AtomicUsize,
    failing_pages: AtomicUsize,
    broken_prefixes: RwLock<HashSet<String>>,
    panicking_batches: AtomicUsize,
    list_calls: AtomicUsize,
    delete_batches: Mutex<Vec<usize>>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            max_page_size: MAX_KEYS_PER_PAGE,
            delete_latency: None,
            failing_keys: RwLock::new(HashSet::new()),
            failing_batches: AtomicUsize::new(0),
            failing_pages: AtomicUsize::new(0),
            broken_prefixes: RwLock::new(HashSet::new()),
            panicking_batches: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            delete_batches: Mutex::new(Vec::new()),
        }
    }

    /// Caps listing pages below whatever the caller asks for.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.max_page_size = page_size.clamp(1, MAX_KEYS_PER_PAGE);
        self
    }

    /// Delays every batched delete.
    pub fn with_delete_latency(mut self, latency: Duration) -> Self {
        self.delete_latency = Some(latency);
        self
    }

    /// Stores an object stamped with the current time.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.insert_with_timestamp(key, data, Utc::now());
    }

    /// Stores an object with an explicit modification time.
    pub fn insert_with_timestamp(
        &self,
        key: impl Into<String>,
        data: impl Into<Bytes>,
        last_modified: DateTime<Utc>,
    ) {
        let data = data.into();
        let object = StoredObject {
            metadata: ObjectMetadata {
                size: data.len() as u64,
                last_modified,
                content_type: None,
            },
            data,
        };
        self.objects.write().insert(key.into(), object);
    }

    /// All keys currently stored, in order.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Makes batched deletes report these keys as failed and keep them.
    pub fn fail_deletes_for<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing_keys
            .write()
            .extend(keys.into_iter().map(Into::into));
    }

    /// Makes the next `count` batched delete requests fail as transient.
    pub fn fail_next_delete_batches(&self, count: usize) {
        self.failing_batches.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` listing requests fail as transient.
    pub fn fail_next_list_pages(&self, count: usize) {
        self.failing_pages.store(count, Ordering::SeqCst);
    }

    /// Makes every listing of exactly `prefix` fail with a service error.
    pub fn fail_listings_of(&self, prefix: impl Into<String>) {
        self.broken_prefixes.write().insert(prefix.into());
    }

    /// Makes the next `count` batched delete requests panic, like a client
    /// with a bug.
    pub fn panic_next_delete_batches(&self, count: usize) {
        self.panicking_batches.store(count, Ordering::SeqCst);
    }

    /// Number of listing requests served.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Size of every batched delete request that reached the bucket.
    pub fn delete_batch_sizes(&self) -> Vec<usize> {
        self.delete_batches.lock().clone()
    }

    fn take_batch_failure(&self) -> bool {
        take_one(&self.failing_batches)
    }

    fn page(&self, prefix: &str, continuation: Option<&str>, max_keys: usize) -> ListPage {
        let limit = max_keys.clamp(1, self.max_page_size);
        let objects = self.objects.read();

        let mut page: Vec<ObjectSummary> = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.map_or(true, |after| key.as_str() > after))
            .take(limit + 1)
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.metadata.size,
                last_modified: object.metadata.last_modified,
            })
            .collect();

        let next_token = if page.len() > limit {
            page.truncate(limit);
            page.last().map(|o| o.key.clone())
        } else {
            None
        };

        ListPage {
            objects: page,
            next_token,
        }
    }
}

/// Decrements an injected-fault counter, returning whether one was pending.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl ObjectStore for MemoryObjectStore {
    fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
        max_keys: usize,
    ) -> BoxFuture<'_, Result<ListPage, ObjectStoreError>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.broken_prefixes.read().contains(&prefix) {
                return Err(ObjectStoreError::Service(format!("listing {} denied", prefix)));
            }
            if take_one(&self.failing_pages) {
                trace!(prefix = prefix.as_str(), "injected transient listing failure");
                return Err(ObjectStoreError::Transient("SlowDown".to_string()));
            }
            Ok(self.page(&prefix, continuation.as_deref(), max_keys))
        })
    }

    fn get_object(&self, key: &str) -> BoxFuture<'_, Result<Option<StoredObject>, ObjectStoreError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.objects.read().get(&key).cloned()) })
    }

    fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> BoxFuture<'_, Result<(), ObjectStoreError>> {
        let key = key.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            let object = StoredObject {
                metadata: ObjectMetadata {
                    size: data.len() as u64,
                    last_modified: Utc::now(),
                    content_type: Some(content_type),
                },
                data,
            };
            self.objects.write().insert(key, object);
            Ok(())
        })
    }

    fn delete_object(&self, key: &str) -> BoxFuture<'_, Result<bool, ObjectStoreError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.objects.write().remove(&key).is_some()) })
    }

    fn delete_objects(&self, keys: Vec<String>) -> BoxFuture<'_, Result<Vec<String>, ObjectStoreError>> {
        Box::pin(async move {
            if keys.len() > MAX_DELETE_BATCH {
                return Err(ObjectStoreError::Service(format!(
                    "batch of {} keys exceeds the limit of {}",
                    keys.len(),
                    MAX_DELETE_BATCH
                )));
            }

            if let Some(latency) = self.delete_latency {
                tokio::time::sleep(latency).await;
            }

            if take_one(&self.panicking_batches) {
                panic!("injected panic in batched delete");
            }

            if self.take_batch_failure() {
                trace!(keys = keys.len(), "injected transient batch failure");
                return Err(ObjectStoreError::Transient("SlowDown".to_string()));
            }

            self.delete_batches.lock().push(keys.len());

            let failing = self.failing_keys.read();
            let mut objects = self.objects.write();
            let mut failed = Vec::new();
            for key in keys {
                if failing.contains(&key) {
                    failed.push(key);
                } else {
                    objects.remove(&key);
                }
            }
            Ok(failed)
        })
    }

    fn get_object_metadata(
        &self,
        key: &str,
    ) -> BoxFuture<'_, Result<Option<ObjectMetadata>, ObjectStoreError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.objects.read().get(&key).map(|o| o.metadata.clone())) })
    }
}
