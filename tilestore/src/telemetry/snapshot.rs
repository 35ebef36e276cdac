//! Point-in-time copy of the deletion counters.

use std::fmt;

/// Values of [`DeleteMetrics`](super::DeleteMetrics) at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub deletes_scheduled: u64,
    pub deletes_deduplicated: u64,
    pub deletes_completed: u64,
    pub deletes_failed: u64,
    pub objects_deleted: u64,
    pub objects_failed: u64,
    pub batches_issued: u64,
    pub batch_retries: u64,
    pub list_retries: u64,
}

impl TelemetrySnapshot {
    /// Deletions scheduled but not yet finished.
    pub fn deletes_in_flight(&self) -> u64 {
        self.deletes_scheduled
            .saturating_sub(self.deletes_completed + self.deletes_failed)
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deletes: {} scheduled ({} deduplicated), {} done, {} failed | objects: {} deleted, {} failed | batches: {} ({} retries) | listing retries: {}",
            self.deletes_scheduled,
            self.deletes_deduplicated,
            self.deletes_completed,
            self.deletes_failed,
            self.objects_deleted,
            self.objects_failed,
            self.batches_issued,
            self.batch_retries,
            self.list_retries,
        )
    }
}
