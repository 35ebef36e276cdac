//! Tile store facade.
//!
//! [`TileStore`] is what the tile cache talks to. It owns the key layout,
//! the listener list, the deletion ledger and the delete worker pool, and
//! exposes:
//!
//! - Tile operations: [`put`](TileStore::put), [`get`](TileStore::get),
//!   [`delete_tile`](TileStore::delete_tile)
//! - Bulk deletions, all asynchronous (see the `delete` submodule)
//! - Layer and parameters metadata documents
//! - Existence checks that account for deletions still in flight
//!
//! # Example
//!
//! ```ignore
//! let store = TileStore::open(config, client, catalog).await?;
//! store.add_listener(quota_listener);
//!
//! store.put(&tile).await?;
//! store.delete_range(&range).await?;
//!
//! let report = store.shutdown().await;
//! ```

mod delete;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::TryStreamExt;
use tracing::{debug, info, trace};

use crate::config::{StoreConfig, SuitabilityCheck};
use crate::error::{StoreError, StoreResult};
use crate::executor::{BulkDelete, BulkDeleteSettings, DeleteExecutor, ShutdownReport};
use crate::format::TileFormat;
use crate::layout::{self, LayerCatalog, TmsKeyBuilder};
use crate::ledger::{DeleteLedger, PendingDelete};
use crate::listener::{BlobStoreListener, ListenerList};
use crate::metadata::{self, Properties, PROPERTIES_CONTENT_TYPE};
use crate::objectstore::{self, object_stream, ObjectStore};
use crate::telemetry::{DeleteMetrics, TelemetrySnapshot};
use crate::tile::{ParameterSets, TileObject, TileRef};

/// Object-store backed tile store.
pub struct TileStore {
    config: StoreConfig,
    client: Arc<dyn ObjectStore>,
    keys: Arc<TmsKeyBuilder>,
    listeners: Arc<ListenerList>,
    ledger: Arc<DeleteLedger>,
    metrics: Arc<DeleteMetrics>,
    executor: DeleteExecutor,
}

impl TileStore {
    /// Opens a store on the configured bucket location.
    ///
    /// Validates the configuration, runs the suitability check, writes the
    /// store marker and starts the delete workers. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Config`] for invalid configuration
    /// - [`StoreError::Unsuitable`] if the location fails the check
    /// - [`StoreError::ObjectStore`] if the bucket cannot be reached
    pub async fn open(
        config: StoreConfig,
        client: Arc<dyn ObjectStore>,
        catalog: Arc<dyn LayerCatalog>,
    ) -> StoreResult<Self> {
        config.validate()?;

        let keys = Arc::new(TmsKeyBuilder::new(config.prefix.clone(), catalog));
        check_suitability(&config, client.as_ref(), &keys).await?;

        // Marks the location as holding a tile store
        let marker = keys.store_metadata();
        client
            .put_object(
                &marker,
                metadata::encode_properties(&marker, &Properties::new())?,
                PROPERTIES_CONTENT_TYPE,
            )
            .await?;

        let listeners = Arc::new(ListenerList::new());
        let metrics = Arc::new(DeleteMetrics::new());
        let (ledger, queue) = DeleteLedger::new();
        let ledger = Arc::new(ledger);

        let task = Arc::new(BulkDelete::new(
            client.clone(),
            keys.clone(),
            listeners.clone(),
            metrics.clone(),
            BulkDeleteSettings {
                batch_size: config.delete_batch_size,
                page_size: config.list_page_size,
                retry: config.retry.clone(),
            },
        ));
        let executor = DeleteExecutor::start(config.delete_workers, ledger.clone(), queue, task);

        info!(
            bucket = config.bucket.as_str(),
            prefix = config.prefix.as_str(),
            "Tile store opened"
        );

        Ok(Self {
            config,
            client,
            keys,
            listeners,
            ledger,
            metrics,
            executor,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn BlobStoreListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn BlobStoreListener>) -> bool {
        self.listeners.remove(listener)
    }

    // =========================================================================
    // Tiles
    // =========================================================================

    /// Stores a tile and, if it carries parameters, its parameters document.
    ///
    /// Listeners get `tile_updated` with the old size when the tile
    /// replaced an existing one, `tile_stored` otherwise. The lookup of the
    /// old object is skipped when nobody is listening.
    pub async fn put(&self, tile: &TileObject) -> StoreResult<()> {
        let blob = tile
            .blob
            .clone()
            .ok_or_else(|| StoreError::InvalidArgument("tile has no blob".to_string()))?;
        let format = TileFormat::from_format(&tile.blob_format)
            .ok_or_else(|| StoreError::UnknownFormat(tile.blob_format.clone()))?;
        let key = self.keys.for_tile(tile)?;

        let previous = if self.listeners.is_empty() {
            None
        } else {
            self.client.get_object_metadata(&key).await?
        };

        trace!(key = key.as_str(), size = blob.len(), "Storing tile");
        self.client.put_object(&key, blob, format.mime_type).await?;

        self.put_parameters_metadata(tile).await?;

        if !self.listeners.is_empty() {
            let tile_ref = TileRef::from_tile(tile, key);
            match previous {
                Some(old) => self.listeners.send_tile_updated(&tile_ref, old.size),
                None => self.listeners.send_tile_stored(&tile_ref),
            }
        }
        Ok(())
    }

    /// Loads a tile's blob, size and creation time.
    ///
    /// Returns false, leaving the tile untouched, if it is not stored.
    pub async fn get(&self, tile: &mut TileObject) -> StoreResult<bool> {
        let key = self.keys.for_tile(tile)?;
        let Some(object) = self.client.get_object(&key).await? else {
            return Ok(false);
        };

        tile.blob_size = object.data.len() as u64;
        tile.blob = Some(object.data);
        tile.created = Some(object.metadata.last_modified);
        Ok(true)
    }

    /// Deletes a single tile right away.
    ///
    /// With listeners registered the tile's size is looked up first so that
    /// `tile_deleted` can report it.
    pub async fn delete_tile(&self, tile: &mut TileObject) -> StoreResult<bool> {
        let key = self.keys.for_tile(tile)?;

        if self.listeners.is_empty() {
            return Ok(self.client.delete_object(&key).await?);
        }

        let Some(old) = self.client.get_object_metadata(&key).await? else {
            return Ok(false);
        };

        self.client.delete_object(&key).await?;
        tile.blob_size = old.size;
        self.listeners
            .send_tile_deleted(&TileRef::from_tile(tile, key));
        Ok(true)
    }

    // =========================================================================
    // Existence
    // =========================================================================

    /// True if the layer has any objects that are not being deleted.
    ///
    /// Layers unknown to the catalog do not exist.
    pub async fn layer_exists(&self, layer_name: &str) -> StoreResult<bool> {
        match self.keys.for_layer(layer_name) {
            Ok(prefix) => self.prefix_exists(&prefix).await,
            Err(StoreError::UnknownLayer(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// True if objects exist under `prefix` and no unbounded deletion of it
    /// or of an enclosing prefix is in flight.
    pub async fn prefix_exists(&self, prefix: &str) -> StoreResult<bool> {
        if self.ledger.is_covered(prefix) {
            debug!(prefix, "Prefix is being deleted");
            return Ok(false);
        }
        Ok(objectstore::prefix_exists(self.client.as_ref(), prefix).await?)
    }

    /// Keys use layer ids, so renaming moves nothing; listeners are told
    /// about the rename if the layer has content.
    pub async fn rename(&self, old_name: &str, new_name: &str) -> StoreResult<bool> {
        // The catalog may already know the layer by its new name
        let prefix = self
            .keys
            .for_layer(old_name)
            .or_else(|_| self.keys.for_layer(new_name))?;

        if self.prefix_exists(&prefix).await? {
            self.listeners.send_layer_renamed(old_name, new_name);
        }
        Ok(true)
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub async fn get_layer_metadata(&self, layer_name: &str, key: &str) -> StoreResult<Option<String>> {
        let properties = self.layer_metadata(layer_name).await?;
        Ok(properties.get(key).cloned())
    }

    /// Sets one value of the layer's metadata document.
    pub async fn put_layer_metadata(&self, layer_name: &str, key: &str, value: &str) -> StoreResult<()> {
        let mut properties = self.layer_metadata(layer_name).await?;
        properties.insert(key.to_string(), value.to_string());

        let resource = self.keys.layer_metadata(layer_name)?;
        self.put_properties(&resource, &properties).await
    }

    /// Every parameter set stored for the layer.
    pub async fn get_parameters(&self, layer_name: &str) -> StoreResult<ParameterSets> {
        let documents = self.parameters_documents(layer_name).await?;
        Ok(documents.into_iter().map(|(_, parameters)| parameters).collect())
    }

    /// Parameter sets of the layer keyed by the identifier they were stored
    /// under.
    pub async fn get_parameters_mapping(
        &self,
        layer_name: &str,
    ) -> StoreResult<BTreeMap<String, BTreeMap<String, String>>> {
        let documents = self.parameters_documents(layer_name).await?;
        Ok(documents
            .into_iter()
            .filter_map(|(key, parameters)| {
                layout::parameters_id_of(&key).map(|id| (id.to_string(), parameters))
            })
            .collect())
    }

    async fn layer_metadata(&self, layer_name: &str) -> StoreResult<Properties> {
        let key = self.keys.layer_metadata(layer_name)?;
        self.get_properties(&key).await
    }

    async fn put_parameters_metadata(&self, tile: &TileObject) -> StoreResult<()> {
        let (Some(parameters), Some(parameters_id)) = (&tile.parameters, &tile.parameters_id) else {
            return Ok(());
        };
        let key = self.keys.parameters_metadata(&tile.layer_name, parameters_id)?;
        self.put_properties(&key, parameters).await
    }

    async fn parameters_documents(&self, layer_name: &str) -> StoreResult<Vec<(String, Properties)>> {
        let prefix = self.keys.parameters_metadata_prefix(layer_name)?;
        let keys: Vec<String> = object_stream(self.client.clone(), prefix, self.config.list_page_size)
            .map_ok(|object| object.key)
            .try_collect()
            .await?;

        let mut documents = Vec::with_capacity(keys.len());
        for key in keys {
            let parameters = self.get_properties(&key).await?;
            documents.push((key, parameters));
        }
        Ok(documents)
    }

    /// Missing documents read as empty.
    async fn get_properties(&self, key: &str) -> StoreResult<Properties> {
        match self.client.get_object(key).await? {
            Some(object) => metadata::decode_properties(key, &object.data),
            None => Ok(Properties::new()),
        }
    }

    async fn put_properties(&self, key: &str, properties: &Properties) -> StoreResult<()> {
        self.client
            .put_object(key, metadata::encode_properties(key, properties)?, PROPERTIES_CONTENT_TYPE)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Deletion state and lifecycle
    // =========================================================================

    /// Deletions currently scheduled or running.
    pub fn pending_deletes(&self) -> Vec<Arc<PendingDelete>> {
        self.ledger.active()
    }

    /// True if a deletion in flight targets `prefix`, an enclosing prefix or
    /// a prefix inside it.
    pub fn is_delete_pending(&self, prefix: &str) -> bool {
        self.ledger.is_pending(prefix)
    }

    pub fn metrics(&self) -> TelemetrySnapshot {
        self.metrics.snapshot()
    }

    /// Stops accepting deletions and stops the workers.
    ///
    /// Running deletions get the configured shutdown timeout to finish;
    /// queued ones are abandoned.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Tile store shutting down");
        self.executor.shutdown(self.config.shutdown_timeout).await
    }
}

/// Checks the location against the configured [`SuitabilityCheck`].
async fn check_suitability(
    config: &StoreConfig,
    client: &dyn ObjectStore,
    keys: &TmsKeyBuilder,
) -> StoreResult<()> {
    if config.suitability == SuitabilityCheck::None {
        return Ok(());
    }

    let empty = !objectstore::prefix_exists(client, &keys.store_prefix()).await?;
    let existing = client
        .get_object_metadata(&keys.store_metadata())
        .await?
        .is_some();

    let reason = match config.suitability {
        SuitabilityCheck::Existing if !existing && !empty => {
            "location is not empty and holds no tile store"
        }
        SuitabilityCheck::Empty if !empty => "location is not empty",
        _ => return Ok(()),
    };

    Err(StoreError::Unsuitable {
        location: format!("{}/{}", config.bucket, keys.store_prefix()),
        reason: reason.to_string(),
    })
}
