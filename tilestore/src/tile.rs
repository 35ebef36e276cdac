//! Tile-level value types exchanged with the cache layer.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::bounds::Bounds;
use crate::metadata;

/// A single cached tile.
///
/// Coordinates follow the `[x, y, z]` order used by the cache layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TileObject {
    pub layer_name: String,
    pub gridset_id: String,
    pub xyz: [i64; 3],
    /// Format name, either a mime type or a short name.
    pub blob_format: String,
    /// Request parameters the tile was rendered with, if any.
    pub parameters: Option<BTreeMap<String, String>>,
    /// Identifier of `parameters`; `None` means the default parameter set.
    pub parameters_id: Option<String>,
    pub blob: Option<Bytes>,
    pub blob_size: u64,
    pub created: Option<DateTime<Utc>>,
}

impl TileObject {
    pub fn new(
        layer_name: impl Into<String>,
        gridset_id: impl Into<String>,
        xyz: [i64; 3],
        blob_format: impl Into<String>,
    ) -> Self {
        Self {
            layer_name: layer_name.into(),
            gridset_id: gridset_id.into(),
            xyz,
            blob_format: blob_format.into(),
            parameters: None,
            parameters_id: None,
            blob: None,
            blob_size: 0,
            created: None,
        }
    }

    /// Attaches request parameters and derives their identifier.
    ///
    /// An empty map is treated as the default parameter set.
    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters_id = metadata::parameters_id(&parameters);
        self.parameters = (!parameters.is_empty()).then_some(parameters);
        self
    }

    pub fn with_blob(mut self, blob: impl Into<Bytes>) -> Self {
        let blob = blob.into();
        self.blob_size = blob.len() as u64;
        self.blob = Some(blob);
        self
    }
}

/// A deletion request over a rectangle of tiles per zoom level.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRange {
    pub layer_name: String,
    pub gridset_id: String,
    pub mime_format: String,
    pub parameters_id: Option<String>,
    pub zoom_start: i64,
    pub zoom_stop: i64,
    rect_bounds: BTreeMap<i64, Bounds>,
}

impl TileRange {
    pub fn new(
        layer_name: impl Into<String>,
        gridset_id: impl Into<String>,
        mime_format: impl Into<String>,
        zoom_start: i64,
        zoom_stop: i64,
    ) -> Self {
        Self {
            layer_name: layer_name.into(),
            gridset_id: gridset_id.into(),
            mime_format: mime_format.into(),
            parameters_id: None,
            zoom_start,
            zoom_stop,
            rect_bounds: BTreeMap::new(),
        }
    }

    pub fn with_parameters_id(mut self, parameters_id: impl Into<String>) -> Self {
        self.parameters_id = Some(parameters_id.into());
        self
    }

    /// Restricts the given zoom level to a coordinate rectangle.
    pub fn with_bounds(mut self, zoom: i64, bounds: Bounds) -> Self {
        self.rect_bounds.insert(zoom, bounds);
        self
    }

    /// Rectangle for one zoom level; `None` covers the whole level.
    pub fn range_bounds(&self, zoom: i64) -> Option<Bounds> {
        self.rect_bounds.get(&zoom).copied()
    }

    /// Number of zoom levels covered, `0` for an inverted range.
    pub fn zoom_levels(&self) -> usize {
        if self.zoom_stop < self.zoom_start {
            0
        } else {
            (self.zoom_stop - self.zoom_start + 1) as usize
        }
    }
}

/// A tile as reported to listeners.
///
/// Bulk deletions only see object keys, so the naming fields are filled in
/// only when the key layout can recover them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRef {
    pub key: String,
    pub xyz: [i64; 3],
    pub blob_size: u64,
    pub layer_name: Option<String>,
    pub gridset_id: Option<String>,
    pub format: Option<String>,
    pub parameters_id: Option<String>,
}

impl TileRef {
    /// A reference carrying only what an object listing knows.
    pub fn new(key: impl Into<String>, xyz: [i64; 3], blob_size: u64) -> Self {
        Self {
            key: key.into(),
            xyz,
            blob_size,
            layer_name: None,
            gridset_id: None,
            format: None,
            parameters_id: None,
        }
    }

    /// Builds a reference for a tile the caller handed to the store.
    pub fn from_tile(tile: &TileObject, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            xyz: tile.xyz,
            blob_size: tile.blob_size,
            layer_name: Some(tile.layer_name.clone()),
            gridset_id: Some(tile.gridset_id.clone()),
            format: Some(tile.blob_format.clone()),
            parameters_id: tile.parameters_id.clone(),
        }
    }
}

/// Distinct parameter sets of a layer.
pub type ParameterSets = BTreeSet<BTreeMap<String, String>>;
