//! Asynchronous prefix deletion.
//!
//! - [`DeleteExecutor`]: fixed-size worker pool draining the ledger queue
//! - [`BulkDelete`]: list, filter, batch delete and notify for one entry
//! - [`RetryPolicy`]: retry behaviour for transient batch failures

mod bulk_delete;
mod policy;
mod pool;

pub use bulk_delete::{BulkDelete, BulkDeleteSettings};
pub use policy::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use pool::{DeleteExecutor, ShutdownReport, DEFAULT_DELETE_WORKERS};
