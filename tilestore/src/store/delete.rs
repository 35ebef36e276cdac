//! Bulk deletion entry points of the tile store.
//!
//! Every operation here resolves its target to one or more key prefixes and
//! schedules them in the ledger; the objects are removed later by the delete
//! workers. Scheduling first checks the raw bucket so that a prefix holding
//! nothing is reported as "did not exist" and never creates a ledger entry.

use std::sync::Arc;

use tracing::{debug, warn};

use super::TileStore;
use crate::bounds::{self, Bounds};
use crate::error::{StoreError, StoreResult};
use crate::ledger::{DeleteOrigin, PendingDelete};
use crate::objectstore;
use crate::tile::TileRange;

impl TileStore {
    /// Deletes every tile of a range, one scheduled deletion per zoom level.
    ///
    /// Returns false without scheduling anything if nothing is stored under
    /// the range's coordinates prefix. Otherwise returns true only if every
    /// zoom level could be scheduled; a level that holds no tiles still
    /// counts as scheduled.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] for a negative or inverted zoom range,
    /// [`StoreError::UnknownLayer`] and [`StoreError::UnknownFormat`] when the
    /// range cannot be mapped to keys.
    pub async fn delete_range(&self, range: &TileRange) -> StoreResult<bool> {
        if range.zoom_start < 0 {
            return Err(StoreError::InvalidArgument(
                "zoom start must be greater or equal than zero".to_string(),
            ));
        }
        if range.zoom_stop < range.zoom_start {
            return Err(StoreError::InvalidArgument(
                "zoom stop must be greater or equal than start zoom".to_string(),
            ));
        }

        let coordinates_prefix = self.keys.coordinates_prefix(range)?;
        if !self.prefix_exists(&coordinates_prefix).await? {
            return Ok(false);
        }

        let mut scheduled = 0;
        for level in range.zoom_start..=range.zoom_stop {
            let prefix = self.keys.for_zoom_level(range, level)?;
            let bounds = range.range_bounds(level);
            match self.schedule_async_delete(&prefix, bounds, DeleteOrigin::Tiles).await {
                Ok(_) => scheduled += 1,
                Err(e) => warn!(prefix = prefix.as_str(), error = %e, "Cannot schedule delete for zoom level"),
            }
        }

        Ok(scheduled == range.zoom_levels())
    }

    /// Deletes a layer's metadata document and, asynchronously, all of its
    /// tiles.
    ///
    /// Returns whether the layer had any tiles; `layer_deleted` is only sent
    /// in that case.
    pub async fn delete_layer(&self, layer_name: &str) -> StoreResult<bool> {
        let metadata_key = self.keys.layer_metadata(layer_name)?;
        let layer_prefix = self.keys.for_layer(layer_name)?;

        self.client.delete_object(&metadata_key).await?;

        let existed = self
            .schedule_async_delete(&layer_prefix, None, DeleteOrigin::Layer(layer_name.to_string()))
            .await?
            .is_some();
        if existed {
            self.listeners.send_layer_deleted(layer_name);
        }
        Ok(existed)
    }

    /// Deletes every tile of a layer in one gridset.
    pub async fn delete_by_gridset_id(&self, layer_name: &str, gridset_id: &str) -> StoreResult<bool> {
        let prefix = self.keys.for_gridset(layer_name, gridset_id)?;
        let origin = DeleteOrigin::Gridset {
            layer_name: layer_name.to_string(),
            gridset_id: gridset_id.to_string(),
        };

        let existed = self.schedule_async_delete(&prefix, None, origin).await?.is_some();
        if existed {
            self.listeners.send_gridset_deleted(layer_name, gridset_id);
        }
        Ok(existed)
    }

    /// Deletes every tile rendered with one parameter set, across all of the
    /// layer's gridsets and formats.
    ///
    /// Every prefix is scheduled even after one turns out to exist.
    pub async fn delete_by_parameters_id(&self, layer_name: &str, parameters_id: &str) -> StoreResult<bool> {
        let mut existed = false;
        for prefix in self.keys.for_parameters(layer_name, parameters_id)? {
            let origin = DeleteOrigin::Parameters {
                layer_name: layer_name.to_string(),
                parameters_id: parameters_id.to_string(),
            };
            existed |= self.schedule_async_delete(&prefix, None, origin).await?.is_some();
        }

        if existed {
            self.listeners.send_parameters_deleted(layer_name, parameters_id);
        }
        Ok(existed)
    }

    /// Schedules deletion of a raw prefix, optionally suffixed with
    /// `?bounds=minx,miny,maxx,maxy`.
    ///
    /// Returns the ledger entry, or `None` if nothing is stored under the
    /// prefix.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidBounds`] if the bounds suffix is malformed.
    pub async fn delete_prefix(&self, prefix: &str) -> StoreResult<Option<Arc<PendingDelete>>> {
        let (literal, bounds) = bounds::parse_prefix(prefix)?;
        self.schedule_async_delete(&literal, bounds, DeleteOrigin::Tiles).await
    }

    /// Puts a prefix deletion on the ledger if the prefix holds anything.
    ///
    /// An identical deletion already in flight is reused.
    async fn schedule_async_delete(
        &self,
        prefix: &str,
        bounds: Option<Bounds>,
        origin: DeleteOrigin,
    ) -> StoreResult<Option<Arc<PendingDelete>>> {
        if self.ledger.is_closed() {
            return Err(StoreError::ShuttingDown);
        }

        if !objectstore::prefix_exists(self.client.as_ref(), prefix).await? {
            debug!(prefix, "Nothing to delete");
            return Ok(None);
        }

        let scheduled = self.ledger.schedule(prefix, bounds, origin)?;
        if scheduled.fresh {
            self.metrics.delete_scheduled();
        } else {
            self.metrics.delete_deduplicated();
        }
        Ok(Some(scheduled.entry))
    }
}
