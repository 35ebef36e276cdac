//! Deletion telemetry.
//!
//! Lock-free counters updated by the facade and the delete workers, and a
//! point-in-time snapshot for reporting.
//!
//! ```text
//! TileStore / workers ─────► DeleteMetrics ─────► TelemetrySnapshot
//!                            (atomic counters)     (point-in-time copy)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let snapshot = store.metrics().snapshot();
//! println!("{}", snapshot);
//! ```

mod metrics;
mod snapshot;

pub use metrics::DeleteMetrics;
pub use snapshot::TelemetrySnapshot;
