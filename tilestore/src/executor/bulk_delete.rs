//! Deletion of everything under one prefix.
//!
//! [`BulkDelete::run`] performs one ledger entry end to end:
//!
//! ```text
//! list pages ──► filter (bounds, cutoff) ──► batch delete ──► notify
//! ```
//!
//! Listing always runs to completion before the first batch is issued so
//! that the key set is known up front. Batches are sent one after another;
//! a batch that fails is recorded and the remaining batches still run.

use std::collections::HashSet;
use std::sync::Arc;

use futures::{future, TryStreamExt};
use tracing::{debug, warn};

use super::policy::RetryPolicy;
use crate::layout::TmsKeyBuilder;
use crate::ledger::{DeleteOutcome, DeleteReport, PendingDelete};
use crate::listener::ListenerList;
use crate::objectstore::{
    object_stream_with_retry, ObjectStore, ObjectStoreError, ObjectSummary, MAX_DELETE_BATCH,
    MAX_KEYS_PER_PAGE,
};
use crate::telemetry::DeleteMetrics;

/// Tunables for [`BulkDelete`].
#[derive(Debug, Clone)]
pub struct BulkDeleteSettings {
    /// Keys per batched delete request, at most [`MAX_DELETE_BATCH`].
    pub batch_size: usize,
    /// Keys requested per listing page.
    pub page_size: usize,
    /// Retry behaviour for listing pages and batches failing with transient
    /// errors.
    pub retry: RetryPolicy,
}

impl Default for BulkDeleteSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_DELETE_BATCH,
            page_size: MAX_KEYS_PER_PAGE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Lists, filters and deletes the objects of one pending deletion.
pub struct BulkDelete {
    client: Arc<dyn ObjectStore>,
    keys: Arc<TmsKeyBuilder>,
    listeners: Arc<ListenerList>,
    metrics: Arc<DeleteMetrics>,
    settings: BulkDeleteSettings,
}

impl BulkDelete {
    pub fn new(
        client: Arc<dyn ObjectStore>,
        keys: Arc<TmsKeyBuilder>,
        listeners: Arc<ListenerList>,
        metrics: Arc<DeleteMetrics>,
        settings: BulkDeleteSettings,
    ) -> Self {
        let settings = BulkDeleteSettings {
            batch_size: settings.batch_size.clamp(1, MAX_DELETE_BATCH),
            page_size: settings.page_size.clamp(1, MAX_KEYS_PER_PAGE),
            ..settings
        };
        Self {
            client,
            keys,
            listeners,
            metrics,
            settings,
        }
    }

    pub fn metrics(&self) -> &DeleteMetrics {
        &self.metrics
    }

    /// Deletes every object the entry targets.
    ///
    /// The outcome is `Done` only if every matched object was deleted.
    pub async fn run(&self, entry: &PendingDelete) -> DeleteOutcome {
        let targets = match self.collect_targets(entry).await {
            Ok(targets) => targets,
            Err(e) => {
                return DeleteOutcome::Failed {
                    report: DeleteReport::default(),
                    reason: format!("listing {} failed: {}", entry.prefix(), e),
                }
            }
        };

        debug!(
            prefix = entry.prefix(),
            matched = targets.len(),
            "Listing complete"
        );

        let notify = entry.origin().notifies_per_tile() && !self.listeners.is_empty();
        let mut report = DeleteReport::default();
        let mut last_error: Option<ObjectStoreError> = None;

        for batch in targets.chunks(self.settings.batch_size) {
            let keys: Vec<String> = batch.iter().map(|o| o.key.clone()).collect();

            match self.delete_batch(keys).await {
                Ok(failed) => {
                    let failed_set: HashSet<&str> = failed.iter().map(String::as_str).collect();
                    let mut deleted = 0;
                    for object in batch.iter().filter(|o| !failed_set.contains(o.key.as_str())) {
                        deleted += 1;
                        if notify {
                            self.notify_deleted(object);
                        }
                    }
                    self.metrics.batch_finished(deleted, failed.len());
                    report.deleted += deleted;
                    report.failed_keys.extend(failed);
                }
                Err(e) => {
                    warn!(
                        prefix = entry.prefix(),
                        keys = batch.len(),
                        error = %e,
                        "Batch delete failed"
                    );
                    self.metrics.batch_finished(0, batch.len());
                    report
                        .failed_keys
                        .extend(batch.iter().map(|o| o.key.clone()));
                    last_error = Some(e);
                }
            }
        }

        if report.failed_keys.is_empty() {
            return DeleteOutcome::Done(report);
        }

        let reason = match last_error {
            Some(e) => format!("{} keys not deleted, last error: {}", report.failed_keys.len(), e),
            None => format!("{} keys not deleted", report.failed_keys.len()),
        };
        DeleteOutcome::Failed { report, reason }
    }

    /// Lists the whole prefix and keeps the objects this entry may delete.
    ///
    /// Objects modified after the second the deletion was scheduled are
    /// kept; bounded entries only take keys whose coordinates fall inside
    /// the rectangle.
    async fn collect_targets(
        &self,
        entry: &PendingDelete,
    ) -> Result<Vec<ObjectSummary>, ObjectStoreError> {
        let cutoff = entry.scheduled_at().timestamp();
        let bounds = entry.bounds();

        let metrics = self.metrics.clone();
        object_stream_with_retry(
            self.client.clone(),
            entry.prefix(),
            self.settings.page_size,
            self.settings.retry.clone(),
            move |_| metrics.list_retried(),
        )
        .try_filter(move |object| {
            let keep = object.last_modified.timestamp() <= cutoff
                && bounds.map_or(true, |b| b.matches(&object.key));
            future::ready(keep)
        })
        .try_collect()
        .await
    }

    async fn delete_batch(&self, keys: Vec<String>) -> Result<Vec<String>, ObjectStoreError> {
        let mut attempt = 1;
        loop {
            match self.client.delete_objects(keys.clone()).await {
                Ok(failed) => return Ok(failed),
                Err(e) if e.is_transient() => match self.settings.retry.delay_for_attempt(attempt) {
                    Some(delay) => {
                        debug!(attempt, ?delay, error = %e, "Retrying batch delete");
                        self.metrics.batch_retried();
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn notify_deleted(&self, object: &ObjectSummary) {
        if let Some(tile) = self.keys.tile_ref(&object.key, object.size) {
            self.listeners.send_tile_deleted(&tile);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Bounds;
    use crate::layout::StaticLayerCatalog;
    use crate::ledger::{DeleteLedger, DeleteOrigin, DeleteStatus};
    use crate::objectstore::MemoryObjectStore;
    use std::time::Duration;

    fn bulk_delete(store: Arc<MemoryObjectStore>, batch_size: usize) -> BulkDelete {
        let catalog = Arc::new(StaticLayerCatalog::new());
        BulkDelete::new(
            store,
            Arc::new(TmsKeyBuilder::new("", catalog)),
            Arc::new(ListenerList::new()),
            Arc::new(DeleteMetrics::new()),
            BulkDeleteSettings {
                batch_size,
                page_size: 1000,
                retry: RetryPolicy::fixed(3, Duration::ZERO),
            },
        )
    }

    fn entry(ledger: &DeleteLedger, prefix: &str, bounds: Option<Bounds>) -> Arc<PendingDelete> {
        ledger
            .schedule(prefix, bounds, DeleteOrigin::Tiles)
            .unwrap()
            .entry
    }

    #[tokio::test]
    async fn test_deletes_whole_prefix_in_batches() {
        let store = Arc::new(MemoryObjectStore::new());
        for i in 0..25 {
            store.insert(format!("l/g/png/default/3/{}/0.png", i), vec![0u8]);
        }
        store.insert("l/other/png/default/3/0/0.png", vec![0u8]);

        let (ledger, _queue) = DeleteLedger::new();
        let entry = entry(&ledger, "l/g/", None);
        let outcome = bulk_delete(store.clone(), 10).run(&entry).await;

        assert_eq!(outcome.status(), DeleteStatus::Done);
        assert_eq!(store.delete_batch_sizes(), vec![10, 10, 5]);
        assert_eq!(store.keys(), vec!["l/other/png/default/3/0/0.png".to_string()]);
    }

    #[tokio::test]
    async fn test_bounds_restrict_deleted_keys() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("l/g/png/default/5/15/15.png", vec![0u8]);
        store.insert("l/g/png/default/5/25/15.png", vec![0u8]);
        store.insert("l/g/png/default/5/metadata.txt", vec![0u8]);

        let (ledger, _queue) = DeleteLedger::new();
        let entry = entry(&ledger, "l/g/png/default/5/", Some(Bounds::new(10, 10, 20, 20)));
        let outcome = bulk_delete(store.clone(), 1000).run(&entry).await;

        match outcome {
            DeleteOutcome::Done(report) => assert_eq!(report.deleted, 1),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!store.contains("l/g/png/default/5/15/15.png"));
        assert!(store.contains("l/g/png/default/5/25/15.png"));
        assert!(store.contains("l/g/png/default/5/metadata.txt"));
    }

    #[tokio::test]
    async fn test_objects_newer_than_schedule_survive() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("p/old.png", vec![0u8]);

        let (ledger, _queue) = DeleteLedger::new();
        let entry = entry(&ledger, "p/", None);
        store.insert_with_timestamp(
            "p/new.png",
            vec![0u8],
            entry.scheduled_at() + chrono::Duration::seconds(5),
        );

        bulk_delete(store.clone(), 1000).run(&entry).await;
        assert_eq!(store.keys(), vec!["p/new.png".to_string()]);
    }

    #[tokio::test]
    async fn test_transient_batch_failure_is_retried() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("p/a", vec![0u8]);
        store.fail_next_delete_batches(2);

        let (ledger, _queue) = DeleteLedger::new();
        let entry = entry(&ledger, "p/", None);
        let task = bulk_delete(store.clone(), 1000);
        let outcome = task.run(&entry).await;

        assert_eq!(outcome.status(), DeleteStatus::Done);
        assert!(store.is_empty());
        assert_eq!(task.metrics().snapshot().batch_retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_entry() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("p/a", vec![0u8]);
        store.fail_next_delete_batches(3);

        let (ledger, _queue) = DeleteLedger::new();
        let entry = entry(&ledger, "p/", None);
        let outcome = bulk_delete(store.clone(), 1000).run(&entry).await;

        match outcome {
            DeleteOutcome::Failed { report, reason } => {
                assert_eq!(report.failed_keys, vec!["p/a".to_string()]);
                assert!(reason.contains("SlowDown"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(store.contains("p/a"));
    }

    #[tokio::test]
    async fn test_transient_listing_failure_is_retried() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("p/a", vec![0u8]);
        store.insert("p/b", vec![0u8]);
        store.fail_next_list_pages(1);

        let (ledger, _queue) = DeleteLedger::new();
        let entry = entry(&ledger, "p/", None);
        let task = bulk_delete(store.clone(), 1000);
        let outcome = task.run(&entry).await;

        match outcome {
            DeleteOutcome::Done(report) => assert_eq!(report.deleted, 2),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(store.is_empty());
        assert_eq!(task.metrics().snapshot().list_retries, 1);
    }

    #[tokio::test]
    async fn test_listing_failure_after_retries_fails_entry() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("p/a", vec![0u8]);
        store.fail_next_list_pages(3);

        let (ledger, _queue) = DeleteLedger::new();
        let entry = entry(&ledger, "p/", None);
        let outcome = bulk_delete(store.clone(), 1000).run(&entry).await;

        match outcome {
            DeleteOutcome::Failed { report, reason } => {
                assert_eq!(report.deleted, 0);
                assert!(reason.contains("SlowDown"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(store.contains("p/a"));
        assert!(store.delete_batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_empty_prefix_is_done() {
        let store = Arc::new(MemoryObjectStore::new());
        let (ledger, _queue) = DeleteLedger::new();
        let entry = entry(&ledger, "nothing/", None);

        let outcome = bulk_delete(store.clone(), 1000).run(&entry).await;
        assert_eq!(outcome, DeleteOutcome::Done(DeleteReport::default()));
        assert!(store.delete_batch_sizes().is_empty());
    }
}
