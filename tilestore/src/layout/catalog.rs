//! Layer catalog: resolves layer names to the identifiers used in keys.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::format::TileFormat;

/// What the key layout needs to know about the cache's layers.
///
/// Keys are rooted at a layer *id* rather than its name so that renaming a
/// layer does not move any object. Parameter-set deletion needs the
/// gridsets and formats a layer is cached in.
pub trait LayerCatalog: Send + Sync {
    /// Identifier used as the first key segment for the layer.
    fn layer_id(&self, layer_name: &str) -> Option<String>;

    /// Reverse lookup used to name tiles found by bulk listings.
    fn layer_name(&self, layer_id: &str) -> Option<String>;

    /// Gridsets the layer is cached in.
    fn gridset_ids(&self, layer_name: &str) -> Vec<String>;

    /// Formats the layer is cached in.
    fn formats(&self, layer_name: &str) -> Vec<TileFormat>;
}

/// Description of one layer for [`StaticLayerCatalog`].
#[derive(Debug, Clone)]
pub struct LayerInfo {
    pub name: String,
    pub id: String,
    pub gridset_ids: Vec<String>,
    pub formats: Vec<TileFormat>,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            gridset_ids: Vec::new(),
            formats: Vec::new(),
        }
    }

    pub fn with_gridset(mut self, gridset_id: impl Into<String>) -> Self {
        self.gridset_ids.push(gridset_id.into());
        self
    }

    pub fn with_format(mut self, format: TileFormat) -> Self {
        self.formats.push(format);
        self
    }
}

/// In-memory catalog, mutable at runtime.
#[derive(Default)]
pub struct StaticLayerCatalog {
    layers: RwLock<HashMap<String, LayerInfo>>,
}

impl StaticLayerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a layer, keyed by name.
    pub fn insert(&self, layer: LayerInfo) {
        self.layers.write().insert(layer.name.clone(), layer);
    }

    pub fn with_layer(self, layer: LayerInfo) -> Self {
        self.insert(layer);
        self
    }

    /// Renames a layer, keeping its id.
    pub fn rename(&self, old_name: &str, new_name: &str) -> bool {
        let mut layers = self.layers.write();
        match layers.remove(old_name) {
            Some(mut layer) => {
                layer.name = new_name.to_string();
                layers.insert(new_name.to_string(), layer);
                true
            }
            None => false,
        }
    }
}

impl LayerCatalog for StaticLayerCatalog {
    fn layer_id(&self, layer_name: &str) -> Option<String> {
        self.layers.read().get(layer_name).map(|l| l.id.clone())
    }

    fn layer_name(&self, layer_id: &str) -> Option<String> {
        self.layers
            .read()
            .values()
            .find(|l| l.id == layer_id)
            .map(|l| l.name.clone())
    }

    fn gridset_ids(&self, layer_name: &str) -> Vec<String> {
        self.layers
            .read()
            .get(layer_name)
            .map(|l| l.gridset_ids.clone())
            .unwrap_or_default()
    }

    fn formats(&self, layer_name: &str) -> Vec<TileFormat> {
        self.layers
            .read()
            .get(layer_name)
            .map(|l| l.formats.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StaticLayerCatalog {
        let png = TileFormat::from_format("image/png").unwrap();
        StaticLayerCatalog::new().with_layer(
            LayerInfo::new("topp:states", "LayerInfoImpl-1")
                .with_gridset("EPSG:4326")
                .with_format(png),
        )
    }

    #[test]
    fn test_lookup_both_ways() {
        let catalog = catalog();
        assert_eq!(
            catalog.layer_id("topp:states").as_deref(),
            Some("LayerInfoImpl-1")
        );
        assert_eq!(
            catalog.layer_name("LayerInfoImpl-1").as_deref(),
            Some("topp:states")
        );
        assert!(catalog.layer_id("unknown").is_none());
    }

    #[test]
    fn test_rename_keeps_id() {
        let catalog = catalog();
        assert!(catalog.rename("topp:states", "usa:states"));
        assert!(catalog.layer_id("topp:states").is_none());
        assert_eq!(
            catalog.layer_id("usa:states").as_deref(),
            Some("LayerInfoImpl-1")
        );
        assert!(!catalog.rename("missing", "other"));
    }

    #[test]
    fn test_unknown_layer_has_no_gridsets() {
        let catalog = catalog();
        assert!(catalog.gridset_ids("unknown").is_empty());
        assert!(catalog.formats("unknown").is_empty());
        assert_eq!(catalog.gridset_ids("topp:states"), vec!["EPSG:4326"]);
    }
}
