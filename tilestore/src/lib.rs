//! Tilestore - object-storage backend for tile caches
//!
//! This library maps a tiled-map cache's logical keyspace
//! (layer → gridset → format → parameters → zoom → x/y) onto objects in a
//! bucket-style object store. On top of the raw store it provides:
//!
//! - Passthrough tile operations (put, get, single-tile delete)
//! - Layer and parameters metadata documents
//! - Listener notifications for every change to the cache
//! - Asynchronous prefix deletion, optionally restricted to a tile rectangle
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           TileStore                               │
//! │                                                                   │
//! │  delete_range ──► TmsKeyBuilder ──► prefix (+ ?bounds=...)        │
//! │                                        │                          │
//! │                                        ▼                          │
//! │                                  DeleteLedger ──► work queue      │
//! │                                                      │            │
//! │                                                      ▼            │
//! │                     DeleteExecutor (worker pool) ──► BulkDelete   │
//! │                       list pages → filter → batch delete → notify │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tilestore::{MemoryObjectStore, StaticLayerCatalog, StoreConfig, TileStore};
//!
//! let client = Arc::new(MemoryObjectStore::new());
//! let catalog = Arc::new(StaticLayerCatalog::new());
//! let store = TileStore::open(StoreConfig::new("tiles"), client, catalog).await?;
//!
//! store.delete_layer("topp:states").await?;
//! store.shutdown().await;
//! ```

pub mod bounds;
pub mod config;
pub mod error;
pub mod executor;
pub mod format;
pub mod layout;
pub mod ledger;
pub mod listener;
pub mod logging;
pub mod metadata;
pub mod objectstore;
pub mod store;
pub mod telemetry;
pub mod tile;

pub use bounds::{Bounds, BoundsError};
pub use config::{ConfigError, StoreConfig, SuitabilityCheck};
pub use error::{StoreError, StoreResult};
pub use executor::{RetryPolicy, ShutdownReport};
pub use format::TileFormat;
pub use layout::{LayerCatalog, LayerInfo, StaticLayerCatalog, TileCoord, TmsKeyBuilder};
pub use ledger::{DeleteLedger, DeleteOrigin, DeleteReport, DeleteStatus, PendingDelete};
pub use listener::{BlobStoreListener, ListenerError, ListenerList};
pub use objectstore::{MemoryObjectStore, ObjectStore, ObjectStoreError};
pub use store::TileStore;
pub use telemetry::{DeleteMetrics, TelemetrySnapshot};
pub use tile::{TileObject, TileRange, TileRef};
