//! In-flight deletion ledger.
//!
//! Every scheduled prefix deletion gets one [`PendingDelete`] entry, keyed
//! by its prefix and bounds. The ledger deduplicates repeated requests for
//! the same target, answers "is this prefix being deleted?" for existence
//! checks, and hands new entries to the delete workers through an unbounded
//! queue.
//!
//! # Lifecycle
//!
//! ```text
//! schedule ──► Scheduled ──► Running ──► Done
//!                  │            │
//!                  └────────────┴──────► Failed
//! ```
//!
//! An entry leaves the ledger the moment it reaches a terminal status, so a
//! later request for the same target schedules a fresh deletion.
//!
//! The ledger lives in memory only. Deletions still queued when the process
//! stops are lost; the objects they targeted stay in the bucket.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::bounds::Bounds;
use crate::error::{StoreError, StoreResult};

// =============================================================================
// Status and origin
// =============================================================================

/// Progress of one prefix deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeleteStatus {
    /// Waiting in the queue for a worker.
    Scheduled,
    /// A worker is listing or deleting.
    Running,
    /// Every matching object was deleted.
    Done,
    /// The deletion stopped early or some objects could not be deleted.
    Failed,
}

impl DeleteStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for DeleteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Which store operation scheduled a deletion.
///
/// Only deletions of individual tiles report each deleted object to
/// listeners; layer, gridset and parameter deletions are announced once
/// when they are scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOrigin {
    /// A tile range or an explicit prefix.
    Tiles,
    Layer(String),
    Gridset {
        layer_name: String,
        gridset_id: String,
    },
    Parameters {
        layer_name: String,
        parameters_id: String,
    },
}

impl DeleteOrigin {
    pub fn notifies_per_tile(&self) -> bool {
        matches!(self, Self::Tiles)
    }
}

/// What a finished deletion achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Objects removed from the bucket.
    pub deleted: usize,
    /// Keys that matched but could not be deleted.
    pub failed_keys: Vec<String>,
}

/// Terminal result handed back by a delete worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Done(DeleteReport),
    Failed { report: DeleteReport, reason: String },
}

impl DeleteOutcome {
    pub fn status(&self) -> DeleteStatus {
        match self {
            Self::Done(_) => DeleteStatus::Done,
            Self::Failed { .. } => DeleteStatus::Failed,
        }
    }
}

// =============================================================================
// Pending entry
// =============================================================================

/// One scheduled prefix deletion.
pub struct PendingDelete {
    id: u64,
    prefix: String,
    bounds: Option<Bounds>,
    origin: DeleteOrigin,
    scheduled_at: DateTime<Utc>,
    status: watch::Sender<DeleteStatus>,
    report: Mutex<Option<DeleteReport>>,
    failure: Mutex<Option<String>>,
}

impl PendingDelete {
    fn new(id: u64, prefix: String, bounds: Option<Bounds>, origin: DeleteOrigin) -> Self {
        let (status, _) = watch::channel(DeleteStatus::Scheduled);
        Self {
            id,
            prefix,
            bounds,
            origin,
            scheduled_at: Utc::now(),
            status,
            report: Mutex::new(None),
            failure: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn origin(&self) -> &DeleteOrigin {
        &self.origin
    }

    /// Objects modified after this instant are left in place.
    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }

    pub fn status(&self) -> DeleteStatus {
        *self.status.borrow()
    }

    /// Moves a scheduled entry to running. Returns false if it had already
    /// left the scheduled state.
    pub fn mark_running(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == DeleteStatus::Scheduled {
                *status = DeleteStatus::Running;
                true
            } else {
                false
            }
        })
    }

    /// Waits until the deletion reaches a terminal status.
    pub async fn wait(&self) -> DeleteStatus {
        let mut rx = self.status.subscribe();
        // The sender lives in self, so the channel cannot close while waiting
        let _ = rx.wait_for(DeleteStatus::is_terminal).await;
        self.status()
    }

    /// Report of a finished deletion, `None` while it is still active.
    pub fn report(&self) -> Option<DeleteReport> {
        self.report.lock().clone()
    }

    /// Why a failed deletion failed.
    pub fn failure_reason(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// The full deletion target, `prefix?bounds=...` when bounded.
    pub fn target(&self) -> String {
        match &self.bounds {
            Some(bounds) => bounds.with_prefix(&self.prefix),
            None => self.prefix.clone(),
        }
    }

    fn key(&self) -> LedgerKey {
        LedgerKey {
            prefix: self.prefix.clone(),
            bounds: self.bounds,
        }
    }

    fn finish(&self, outcome: DeleteOutcome) {
        let status = outcome.status();
        match outcome {
            DeleteOutcome::Done(report) => *self.report.lock() = Some(report),
            DeleteOutcome::Failed { report, reason } => {
                *self.report.lock() = Some(report);
                *self.failure.lock() = Some(reason);
            }
        }
        self.status.send_replace(status);
    }
}

impl fmt::Debug for PendingDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDelete")
            .field("id", &self.id)
            .field("target", &self.target())
            .field("origin", &self.origin)
            .field("status", &self.status())
            .finish()
    }
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LedgerKey {
    prefix: String,
    bounds: Option<Bounds>,
}

/// Receiving end of the work queue, consumed by the delete workers.
pub type DeleteQueue = mpsc::UnboundedReceiver<Arc<PendingDelete>>;

/// Result of [`DeleteLedger::schedule`].
#[derive(Debug, Clone)]
pub struct Scheduled {
    pub entry: Arc<PendingDelete>,
    /// False when an equal deletion was already in flight and was reused.
    pub fresh: bool,
}

struct LedgerState {
    entries: HashMap<LedgerKey, Arc<PendingDelete>>,
    queue: Option<mpsc::UnboundedSender<Arc<PendingDelete>>>,
}

/// Registry of in-flight prefix deletions.
pub struct DeleteLedger {
    state: Mutex<LedgerState>,
    next_id: AtomicU64,
}

impl DeleteLedger {
    /// Creates an empty ledger and the queue its entries are published on.
    pub fn new() -> (Self, DeleteQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ledger = Self {
            state: Mutex::new(LedgerState {
                entries: HashMap::new(),
                queue: Some(tx),
            }),
            next_id: AtomicU64::new(1),
        };
        (ledger, rx)
    }

    /// Registers a deletion and queues it for the workers.
    ///
    /// If an active entry already targets the same prefix and bounds, that
    /// entry is returned instead and nothing new is queued.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShuttingDown`] once the ledger is closed.
    pub fn schedule(
        &self,
        prefix: &str,
        bounds: Option<Bounds>,
        origin: DeleteOrigin,
    ) -> StoreResult<Scheduled> {
        let key = LedgerKey {
            prefix: prefix.to_string(),
            bounds,
        };

        let mut state = self.state.lock();
        let Some(queue) = state.queue.as_ref() else {
            return Err(StoreError::ShuttingDown);
        };

        if let Some(existing) = state.entries.get(&key) {
            debug!(delete_target = %existing.target(), id = existing.id, "Deletion already in flight");
            return Ok(Scheduled {
                entry: existing.clone(),
                fresh: false,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(PendingDelete::new(id, key.prefix.clone(), bounds, origin));
        queue
            .send(entry.clone())
            .map_err(|_| StoreError::ShuttingDown)?;
        state.entries.insert(key, entry.clone());

        debug!(delete_target = %entry.target(), id, "Deletion scheduled");
        Ok(Scheduled { entry, fresh: true })
    }

    /// True if an active deletion targets `prefix`, one of its ancestors or
    /// one of its descendants.
    pub fn is_pending(&self, prefix: &str) -> bool {
        self.state
            .lock()
            .entries
            .values()
            .any(|e| e.prefix.starts_with(prefix) || prefix.starts_with(e.prefix.as_str()))
    }

    /// True if an active unbounded deletion of `prefix` or an ancestor will
    /// remove everything under `prefix`.
    pub fn is_covered(&self, prefix: &str) -> bool {
        self.state
            .lock()
            .entries
            .values()
            .any(|e| e.bounds.is_none() && prefix.starts_with(e.prefix.as_str()))
    }

    /// Records a terminal outcome and removes the entry.
    ///
    /// Returns false if the entry had already been completed.
    pub fn complete(&self, entry: &Arc<PendingDelete>, outcome: DeleteOutcome) -> bool {
        let mut state = self.state.lock();
        let key = entry.key();
        match state.entries.get(&key) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                state.entries.remove(&key);
            }
            _ => return false,
        }
        entry.finish(outcome);
        true
    }

    /// Snapshot of every active entry.
    pub fn active(&self) -> Vec<Arc<PendingDelete>> {
        let mut entries: Vec<_> = self.state.lock().entries.values().cloned().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Stops accepting deletions and closes the work queue.
    pub fn close(&self) {
        self.state.lock().queue = None;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().queue.is_none()
    }
}
