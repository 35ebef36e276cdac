//! Tile format registry.
//!
//! Resolves a format name as carried by tiles and tile ranges (either the
//! mime type, `image/png`, or the short name, `png`) to the pieces the store
//! needs: the content type for uploads, the key segment and the file
//! extension.

/// A known tile format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileFormat {
    /// Mime type sent as the object's content type.
    pub mime_type: &'static str,
    /// Short name used as the format segment of tile keys.
    pub internal_name: &'static str,
    /// File extension of tile objects.
    pub extension: &'static str,
}

const FORMATS: &[TileFormat] = &[
    TileFormat::new("image/png", "png", "png"),
    TileFormat::new("image/png8", "png8", "png"),
    TileFormat::new("image/png; mode=8bit", "png8", "png"),
    TileFormat::new("image/jpeg", "jpeg", "jpeg"),
    TileFormat::new("image/gif", "gif", "gif"),
    TileFormat::new("image/webp", "webp", "webp"),
    TileFormat::new("image/tiff", "tiff", "tiff"),
    TileFormat::new("application/vnd.mapbox-vector-tile", "pbf", "pbf"),
    TileFormat::new("application/json;type=geojson", "geojson", "geojson"),
    TileFormat::new("application/json;type=topojson", "topojson", "topojson"),
];

impl TileFormat {
    const fn new(
        mime_type: &'static str,
        internal_name: &'static str,
        extension: &'static str,
    ) -> Self {
        Self {
            mime_type,
            internal_name,
            extension,
        }
    }

    /// Looks up a format by mime type or short name, ignoring ASCII case.
    pub fn from_format(format: &str) -> Option<Self> {
        let format = format.trim();
        FORMATS
            .iter()
            .find(|f| {
                f.mime_type.eq_ignore_ascii_case(format)
                    || f.internal_name.eq_ignore_ascii_case(format)
            })
            .copied()
    }
}
