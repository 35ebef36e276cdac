//! Key layout for tiles and metadata documents.
//!
//! Objects are laid out TMS-style under an optional store prefix:
//!
//! ```text
//! {prefix}/metadata.properties                               store marker
//! {prefix}/{layer_id}/metadata.properties                    layer metadata
//! {prefix}/{layer_id}/parameters-{id}.properties             parameter sets
//! {prefix}/{layer_id}/{gridset}/{format}/{params}/{z}/{x}/{y}.{ext}
//! ```
//!
//! Every grouping level (layer, gridset, parameter set, zoom level) is a
//! literal key prefix ending in `/`, which is what makes prefix deletion
//! possible. Coordinates are recovered from the last three key segments by
//! [`coordinates_of`].

mod catalog;

pub use catalog::{LayerCatalog, LayerInfo, StaticLayerCatalog};

use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::format::TileFormat;
use crate::tile::{TileObject, TileRange, TileRef};

/// Parameters segment used for tiles rendered with the default parameters.
pub const DEFAULT_PARAMETERS_ID: &str = "default";

/// Object name of the store marker and of layer metadata documents.
pub const METADATA_OBJECT_NAME: &str = "metadata.properties";

const PARAMETERS_METADATA_PREFIX: &str = "parameters-";
const PARAMETERS_METADATA_SUFFIX: &str = ".properties";

/// Parameters id named by a parameters metadata key, such as
/// `L1/parameters-abc.properties`.
pub fn parameters_id_of(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next()?;
    name.strip_prefix(PARAMETERS_METADATA_PREFIX)?
        .strip_suffix(PARAMETERS_METADATA_SUFFIX)
        .filter(|id| !id.is_empty())
}

// =============================================================================
// Coordinate parsing
// =============================================================================

/// Tile coordinates recovered from an object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

/// Extracts `{z}/{x}/{y}.{ext}` from the tail of a key.
///
/// Returns `None` for any key that does not end in three numeric segments
/// with a non-empty extension on the last one.
pub fn coordinates_of(key: &str) -> Option<TileCoord> {
    let mut segments = key.rsplit('/');
    let file = segments.next()?;
    let x = parse_number(segments.next()?)?;
    let z = parse_number(segments.next()?)?;

    let (y, extension) = file.split_once('.')?;
    if extension.is_empty() {
        return None;
    }
    let y = parse_number(y)?;

    Some(TileCoord { x, y, z })
}

fn parse_number(segment: &str) -> Option<i64> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

// =============================================================================
// Key builder
// =============================================================================

/// Builds object keys and prefixes for tiles, layers and metadata.
pub struct TmsKeyBuilder {
    prefix: String,
    catalog: Arc<dyn LayerCatalog>,
}

impl TmsKeyBuilder {
    /// Creates a builder rooted at `prefix` (leading/trailing `/` ignored).
    pub fn new(prefix: impl Into<String>, catalog: Arc<dyn LayerCatalog>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { prefix, catalog }
    }

    /// Literal prefix of everything this store owns; empty for the bucket root.
    pub fn store_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    pub fn store_metadata(&self) -> String {
        self.join(&[METADATA_OBJECT_NAME])
    }

    pub fn for_tile(&self, tile: &TileObject) -> StoreResult<String> {
        let layer_id = self.layer_id(&tile.layer_name)?;
        let format = resolve_format(&tile.blob_format)?;
        let [x, y, z] = tile.xyz;
        let parameters_id = tile
            .parameters_id
            .as_deref()
            .unwrap_or(DEFAULT_PARAMETERS_ID);

        Ok(self.join(&[
            &layer_id,
            &tile.gridset_id,
            format.internal_name,
            parameters_id,
            &z.to_string(),
            &x.to_string(),
            &format!("{}.{}", y, format.extension),
        ]))
    }

    pub fn for_layer(&self, layer_name: &str) -> StoreResult<String> {
        let layer_id = self.layer_id(layer_name)?;
        Ok(self.join_prefix(&[&layer_id]))
    }

    pub fn for_gridset(&self, layer_name: &str, gridset_id: &str) -> StoreResult<String> {
        let layer_id = self.layer_id(layer_name)?;
        Ok(self.join_prefix(&[&layer_id, gridset_id]))
    }

    /// One prefix per (gridset, format) the layer is cached in.
    pub fn for_parameters(&self, layer_name: &str, parameters_id: &str) -> StoreResult<Vec<String>> {
        let layer_id = self.layer_id(layer_name)?;
        let formats = self.catalog.formats(layer_name);

        let mut prefixes = Vec::new();
        for gridset_id in self.catalog.gridset_ids(layer_name) {
            for format in &formats {
                prefixes.push(self.join_prefix(&[
                    &layer_id,
                    &gridset_id,
                    format.internal_name,
                    parameters_id,
                ]));
            }
        }
        Ok(prefixes)
    }

    /// Prefix shared by every zoom level of a tile range.
    pub fn coordinates_prefix(&self, range: &TileRange) -> StoreResult<String> {
        let (layer_id, format, parameters_id) = self.range_parts(range)?;
        Ok(self.join_prefix(&[
            &layer_id,
            &range.gridset_id,
            format.internal_name,
            parameters_id,
        ]))
    }

    pub fn for_zoom_level(&self, range: &TileRange, level: i64) -> StoreResult<String> {
        let (layer_id, format, parameters_id) = self.range_parts(range)?;
        Ok(self.join_prefix(&[
            &layer_id,
            &range.gridset_id,
            format.internal_name,
            parameters_id,
            &level.to_string(),
        ]))
    }

    pub fn layer_metadata(&self, layer_name: &str) -> StoreResult<String> {
        let layer_id = self.layer_id(layer_name)?;
        Ok(self.join(&[&layer_id, METADATA_OBJECT_NAME]))
    }

    pub fn parameters_metadata_prefix(&self, layer_name: &str) -> StoreResult<String> {
        let layer_id = self.layer_id(layer_name)?;
        Ok(self.join(&[&layer_id, PARAMETERS_METADATA_PREFIX]))
    }

    pub fn parameters_metadata(&self, layer_name: &str, parameters_id: &str) -> StoreResult<String> {
        let layer_id = self.layer_id(layer_name)?;
        let name = format!(
            "{}{}{}",
            PARAMETERS_METADATA_PREFIX, parameters_id, PARAMETERS_METADATA_SUFFIX
        );
        Ok(self.join(&[&layer_id, &name]))
    }

    /// Describes a tile found by a listing, for listener notifications.
    ///
    /// Returns `None` for keys without tile coordinates. Naming fields are
    /// only filled when the key has the full layout and the layer id is
    /// known to the catalog.
    pub fn tile_ref(&self, key: &str, blob_size: u64) -> Option<TileRef> {
        let coord = coordinates_of(key)?;
        let mut tile = TileRef::new(key, [coord.x, coord.y, coord.z], blob_size);

        let relative = key.strip_prefix(&self.store_prefix()).unwrap_or(key);
        let segments: Vec<&str> = relative.split('/').collect();
        if let [layer_id, gridset_id, format, parameters_id, _, _, _] = segments.as_slice() {
            tile.layer_name = self.catalog.layer_name(layer_id);
            tile.gridset_id = Some(gridset_id.to_string());
            tile.format = Some(format.to_string());
            tile.parameters_id =
                (*parameters_id != DEFAULT_PARAMETERS_ID).then(|| parameters_id.to_string());
        }

        Some(tile)
    }

    fn layer_id(&self, layer_name: &str) -> StoreResult<String> {
        self.catalog
            .layer_id(layer_name)
            .ok_or_else(|| StoreError::UnknownLayer(layer_name.to_string()))
    }

    fn range_parts<'a>(
        &self,
        range: &'a TileRange,
    ) -> StoreResult<(String, TileFormat, &'a str)> {
        let layer_id = self.layer_id(&range.layer_name)?;
        let format = resolve_format(&range.mime_format)?;
        let parameters_id = range
            .parameters_id
            .as_deref()
            .unwrap_or(DEFAULT_PARAMETERS_ID);
        Ok((layer_id, format, parameters_id))
    }

    fn join(&self, parts: &[&str]) -> String {
        let mut key = self.store_prefix();
        key.push_str(&parts.join("/"));
        key
    }

    fn join_prefix(&self, parts: &[&str]) -> String {
        let mut prefix = self.join(parts);
        prefix.push('/');
        prefix
    }
}

fn resolve_format(format: &str) -> StoreResult<TileFormat> {
    TileFormat::from_format(format).ok_or_else(|| StoreError::UnknownFormat(format.to_string()))
}
