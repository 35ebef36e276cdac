//! Tile store error types.

use thiserror::Error;

use crate::bounds::BoundsError;
use crate::config::ConfigError;
use crate::objectstore::ObjectStoreError;

/// Errors surfaced by [`TileStore`](crate::TileStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying object store failed.
    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    /// A deletion prefix carried a structurally invalid bounds suffix.
    #[error("Invalid bounds: {0}")]
    InvalidBounds(#[from] BoundsError),

    /// Store configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A request argument was rejected before touching the store.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The tile format is not known to the format registry.
    #[error("Unknown tile format: {0}")]
    UnknownFormat(String),

    /// The layer is not known to the layer catalog.
    #[error("Unknown layer: {0}")]
    UnknownLayer(String),

    /// A metadata document could not be decoded.
    #[error("Invalid metadata document {key}: {reason}")]
    Metadata { key: String, reason: String },

    /// The configured location failed the suitability check on open.
    #[error("Location {location} is not suitable for a tile store: {reason}")]
    Unsuitable { location: String, reason: String },

    /// The store is shutting down and no longer accepts deletions.
    #[error("Tile store is shutting down")]
    ShuttingDown,
}

/// Result type for tile store operations.
pub type StoreResult<T> = Result<T, StoreError>;
