//! Atomic deletion counters.

use std::sync::atomic::{AtomicU64, Ordering};

use super::snapshot::TelemetrySnapshot;

/// Counters for the asynchronous deletion subsystem.
///
/// All updates use relaxed ordering; a snapshot is a consistent view of each
/// counter but not across counters.
#[derive(Debug, Default)]
pub struct DeleteMetrics {
    scheduled: AtomicU64,
    deduplicated: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    objects_deleted: AtomicU64,
    objects_failed: AtomicU64,
    batches_issued: AtomicU64,
    batch_retries: AtomicU64,
    list_retries: AtomicU64,
}

impl DeleteMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// A request matched a deletion already in flight.
    pub fn delete_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delete_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delete_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one batch request's result.
    pub fn batch_finished(&self, deleted: usize, failed: usize) {
        self.batches_issued.fetch_add(1, Ordering::Relaxed);
        self.objects_deleted
            .fetch_add(deleted as u64, Ordering::Relaxed);
        self.objects_failed.fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn batch_retried(&self) {
        self.batch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn list_retried(&self) {
        self.list_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            deletes_scheduled: self.scheduled.load(Ordering::Relaxed),
            deletes_deduplicated: self.deduplicated.load(Ordering::Relaxed),
            deletes_completed: self.completed.load(Ordering::Relaxed),
            deletes_failed: self.failed.load(Ordering::Relaxed),
            objects_deleted: self.objects_deleted.load(Ordering::Relaxed),
            objects_failed: self.objects_failed.load(Ordering::Relaxed),
            batches_issued: self.batches_issued.load(Ordering::Relaxed),
            batch_retries: self.batch_retries.load(Ordering::Relaxed),
            list_retries: self.list_retries.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = DeleteMetrics::new();
        metrics.delete_scheduled();
        metrics.delete_scheduled();
        metrics.delete_deduplicated();
        metrics.batch_finished(1000, 0);
        metrics.batch_finished(497, 3);
        metrics.batch_retried();
        metrics.list_retried();
        metrics.list_retried();
        metrics.delete_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.deletes_scheduled, 2);
        assert_eq!(snapshot.deletes_deduplicated, 1);
        assert_eq!(snapshot.objects_deleted, 1497);
        assert_eq!(snapshot.objects_failed, 3);
        assert_eq!(snapshot.batches_issued, 2);
        assert_eq!(snapshot.batch_retries, 1);
        assert_eq!(snapshot.list_retries, 2);
        assert_eq!(snapshot.deletes_failed, 1);
        assert_eq!(snapshot.deletes_completed, 0);
    }
}
