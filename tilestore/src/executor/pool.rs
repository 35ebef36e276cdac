//! Delete worker pool.
//!
//! A fixed number of tokio tasks share the ledger's work queue. Each worker
//! takes one entry at a time, runs it through [`BulkDelete`] and completes
//! it in the ledger.
//!
//! # Shutdown
//!
//! [`DeleteExecutor::shutdown`] closes the ledger, tells the workers to stop
//! taking new entries and waits for the running ones up to a deadline.
//! Entries still queued are completed as `Failed` without being started;
//! workers still busy at the deadline are aborted and their entries failed
//! as well.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bulk_delete::BulkDelete;
use crate::ledger::{DeleteLedger, DeleteOutcome, DeleteQueue, DeleteReport, DeleteStatus, PendingDelete};
use crate::listener::panic_message;

/// Default number of delete workers.
pub const DEFAULT_DELETE_WORKERS: usize = 4;

/// What [`DeleteExecutor::shutdown`] had to give up on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Entries that were still queued and never started.
    pub abandoned: usize,
    /// Entries whose worker did not finish before the deadline.
    pub unfinished: usize,
}

type SharedQueue = Arc<tokio::sync::Mutex<DeleteQueue>>;

/// Fixed-size pool of delete workers.
pub struct DeleteExecutor {
    ledger: Arc<DeleteLedger>,
    queue: SharedQueue,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DeleteExecutor {
    /// Spawns `workers` tasks consuming `queue`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        workers: usize,
        ledger: Arc<DeleteLedger>,
        queue: DeleteQueue,
        task: Arc<BulkDelete>,
    ) -> Self {
        let workers = workers.max(1);
        let queue: SharedQueue = Arc::new(tokio::sync::Mutex::new(queue));
        let shutdown = CancellationToken::new();

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    ledger.clone(),
                    queue.clone(),
                    task.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(workers, "Delete executor started");

        Self {
            ledger,
            queue,
            shutdown,
            handles: Mutex::new(handles),
        }
    }

    /// Stops the pool, waiting at most `timeout` for running deletions.
    ///
    /// Safe to call more than once; later calls find nothing left to do.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.ledger.close();
        self.shutdown.cancel();

        let handles = std::mem::take(&mut *self.handles.lock());
        let deadline = Instant::now() + timeout;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                // Wait for the abort so the worker releases the queue
                let _ = handle.await;
            }
        }

        let mut report = ShutdownReport::default();

        {
            let mut queue = self.queue.lock().await;
            while let Ok(entry) = queue.try_recv() {
                if self.abandon(&entry, "abandoned at shutdown before it started") {
                    report.abandoned += 1;
                }
            }
        }

        for entry in self.ledger.active() {
            let started = entry.status() == DeleteStatus::Running;
            let reason = if started {
                "interrupted by shutdown"
            } else {
                "abandoned at shutdown before it started"
            };
            if self.abandon(&entry, reason) {
                if started {
                    report.unfinished += 1;
                } else {
                    report.abandoned += 1;
                }
            }
        }

        if report.abandoned > 0 || report.unfinished > 0 {
            warn!(
                abandoned = report.abandoned,
                unfinished = report.unfinished,
                "Delete executor stopped with work outstanding; objects under those prefixes remain"
            );
        } else {
            info!("Delete executor stopped");
        }

        report
    }

    fn abandon(&self, entry: &Arc<PendingDelete>, reason: &str) -> bool {
        let completed = self.ledger.complete(
            entry,
            DeleteOutcome::Failed {
                report: DeleteReport::default(),
                reason: reason.to_string(),
            },
        );
        if completed {
            warn!(delete_target = %entry.target(), id = entry.id(), reason, "Deletion not carried out");
        }
        completed
    }
}

impl Drop for DeleteExecutor {
    fn drop(&mut self) {
        // Workers finish their current entry and exit
        self.ledger.close();
        self.shutdown.cancel();
    }
}

async fn worker_loop(
    worker_id: usize,
    ledger: Arc<DeleteLedger>,
    queue: SharedQueue,
    task: Arc<BulkDelete>,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "Delete worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            entry = async { queue.lock().await.recv().await } => entry,
        };

        let Some(entry) = next else {
            break;
        };

        process_entry(worker_id, &ledger, &task, entry).await;
    }

    debug!(worker_id, "Delete worker stopped");
}

async fn process_entry(
    worker_id: usize,
    ledger: &DeleteLedger,
    task: &BulkDelete,
    entry: Arc<PendingDelete>,
) {
    if !entry.mark_running() {
        // Completed elsewhere while queued
        return;
    }

    debug!(worker_id, delete_target = %entry.target(), id = entry.id(), "Deletion started");

    // A panic must still leave the entry terminal and the worker alive
    let outcome = match AssertUnwindSafe(task.run(&entry)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => DeleteOutcome::Failed {
            report: DeleteReport::default(),
            reason: format!("deletion panicked: {}", panic_message(payload.as_ref())),
        },
    };
    match &outcome {
        DeleteOutcome::Done(report) => {
            task.metrics().delete_completed();
            info!(
                prefix = entry.prefix(),
                bounds = ?entry.bounds(),
                deleted = report.deleted,
                "Prefix deletion complete"
            );
        }
        DeleteOutcome::Failed { report, reason } => {
            task.metrics().delete_failed();
            error!(
                prefix = entry.prefix(),
                bounds = ?entry.bounds(),
                deleted = report.deleted,
                failed = report.failed_keys.len(),
                reason = reason.as_str(),
                "Prefix deletion failed"
            );
        }
    }

    ledger.complete(&entry, outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::bulk_delete::BulkDeleteSettings;
    use crate::layout::{StaticLayerCatalog, TmsKeyBuilder};
    use crate::ledger::DeleteOrigin;
    use crate::listener::ListenerList;
    use crate::objectstore::MemoryObjectStore;
    use crate::telemetry::DeleteMetrics;

    fn executor(
        store: Arc<MemoryObjectStore>,
        workers: usize,
    ) -> (Arc<DeleteLedger>, DeleteExecutor, Arc<DeleteMetrics>) {
        let (ledger, queue) = DeleteLedger::new();
        let ledger = Arc::new(ledger);
        let metrics = Arc::new(DeleteMetrics::new());
        let task = Arc::new(BulkDelete::new(
            store,
            Arc::new(TmsKeyBuilder::new("", Arc::new(StaticLayerCatalog::new()))),
            Arc::new(ListenerList::new()),
            metrics.clone(),
            BulkDeleteSettings::default(),
        ));
        let executor = DeleteExecutor::start(workers, ledger.clone(), queue, task);
        (ledger, executor, metrics)
    }

    #[tokio::test]
    async fn test_workers_complete_entries() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("a/1.png", vec![0u8]);
        store.insert("b/1.png", vec![0u8]);

        let (ledger, executor, metrics) = executor(store.clone(), 2);
        let a = ledger.schedule("a/", None, DeleteOrigin::Tiles).unwrap().entry;
        let b = ledger.schedule("b/", None, DeleteOrigin::Tiles).unwrap().entry;

        assert_eq!(a.wait().await, DeleteStatus::Done);
        assert_eq!(b.wait().await, DeleteStatus::Done);
        assert!(store.is_empty());
        assert!(ledger.is_empty());
        assert_eq!(metrics.snapshot().deletes_completed, 2);

        let report = executor.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report, ShutdownReport::default());
    }

    #[tokio::test]
    async fn test_panicking_task_fails_entry_and_keeps_worker() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("a/1.png", vec![0u8]);
        store.insert("b/1.png", vec![0u8]);
        store.panic_next_delete_batches(1);

        let (ledger, executor, metrics) = executor(store.clone(), 1);
        let a = ledger.schedule("a/", None, DeleteOrigin::Tiles).unwrap().entry;
        assert_eq!(a.wait().await, DeleteStatus::Failed);
        assert!(a.failure_reason().unwrap().contains("panicked"));
        assert!(!ledger.is_covered("a/1.png"));
        assert!(store.contains("a/1.png"));

        // The single worker survived and serves the next entry
        let b = ledger.schedule("b/", None, DeleteOrigin::Tiles).unwrap().entry;
        assert_eq!(b.wait().await, DeleteStatus::Done);
        assert!(!store.contains("b/1.png"));
        assert!(ledger.is_empty());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.deletes_failed, 1);
        assert_eq!(snapshot.deletes_completed, 1);

        executor.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_queued_entries() {
        let store = Arc::new(MemoryObjectStore::new().with_delete_latency(Duration::from_millis(200)));
        for prefix in ["a", "b", "c"] {
            store.insert(format!("{}/1.png", prefix), vec![0u8]);
        }

        let (ledger, executor, _metrics) = executor(store.clone(), 1);
        let entries: Vec<_> = ["a/", "b/", "c/"]
            .iter()
            .map(|p| ledger.schedule(p, None, DeleteOrigin::Tiles).unwrap().entry)
            .collect();

        let report = executor.shutdown(Duration::from_secs(5)).await;

        assert!(report.abandoned == 2 || report.abandoned == 3, "{:?}", report);
        assert_eq!(report.unfinished, 0);
        assert!(ledger.is_empty());
        for entry in &entries {
            assert!(entry.status().is_terminal());
        }
        assert!(ledger.schedule("d/", None, DeleteOrigin::Tiles).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_timeout_interrupts_running_entry() {
        let store = Arc::new(MemoryObjectStore::new().with_delete_latency(Duration::from_secs(30)));
        store.insert("a/1.png", vec![0u8]);

        let (ledger, executor, _metrics) = executor(store.clone(), 1);
        let entry = ledger.schedule("a/", None, DeleteOrigin::Tiles).unwrap().entry;

        // Let the worker pick the entry up
        while entry.status() == DeleteStatus::Scheduled {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let report = executor.shutdown(Duration::from_millis(50)).await;
        assert_eq!(report.unfinished, 1);
        assert_eq!(entry.status(), DeleteStatus::Failed);
        assert!(store.contains("a/1.png"));
    }
}
