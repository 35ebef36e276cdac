//! Tile-coordinate rectangles attached to deletion prefixes.
//!
//! A range deletion is scheduled per zoom level as a literal key prefix plus
//! an optional rectangle. The rectangle travels as a suffix on the prefix
//! string so that a single string identifies the whole request:
//!
//! ```text
//! gwc/states/EPSG:4326/png/default/12/?bounds=10,10,20,20
//! └────────────── literal prefix ─────┘└──── suffix ─────┘
//! ```
//!
//! Parsing is grammar based. A string without the `?bounds=` marker has no
//! bounds; a string with the marker must match the grammar exactly or the
//! whole request is rejected.

use std::fmt;

use thiserror::Error;

use crate::layout;

/// Marker separating the literal prefix from the serialized rectangle.
pub const BOUNDS_MARKER: &str = "?bounds=";

/// Errors for structurally invalid bounds suffixes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundsError {
    /// The literal prefix in front of the marker does not end with `/`.
    #[error("bounds suffix must follow a prefix ending in '/': {0:?}")]
    MissingSlash(String),

    /// The suffix does not carry exactly four fields.
    #[error("expected 4 bounds fields, found {0}")]
    FieldCount(usize),

    /// A field is empty, non-numeric or out of range.
    #[error("bounds field {index} is not a non-negative integer: {value:?}")]
    InvalidField { index: usize, value: String },
}

/// Axis-aligned, inclusive rectangle in tile-coordinate space.
///
/// Corners are normalised on construction, so `min_x <= max_x` and
/// `min_y <= max_y` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bounds {
    min_x: i64,
    min_y: i64,
    max_x: i64,
    max_y: i64,
}

impl Bounds {
    /// Creates a rectangle from two opposite corners given in any order.
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    pub fn min_x(&self) -> i64 {
        self.min_x
    }

    pub fn min_y(&self) -> i64 {
        self.min_y
    }

    pub fn max_x(&self) -> i64 {
        self.max_x
    }

    pub fn max_y(&self) -> i64 {
        self.max_y
    }

    /// Inclusive containment test.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }

    /// Returns true if `key` encodes tile coordinates inside this rectangle.
    ///
    /// Keys without a `{z}/{x}/{y}.{ext}` tail (metadata documents, for
    /// instance) never match.
    pub fn matches(&self, key: &str) -> bool {
        layout::coordinates_of(key).is_some_and(|coord| self.contains(coord.x, coord.y))
    }

    /// Appends the serialized rectangle to a literal prefix.
    pub fn with_prefix(&self, prefix: &str) -> String {
        format!("{}?{}", prefix, self)
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bounds={},{},{},{}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// Splits a deletion prefix into its literal prefix and optional bounds.
///
/// # Errors
///
/// Returns [`BoundsError`] when the `?bounds=` marker is present but the
/// suffix does not follow `prefix/?bounds=minx,miny,maxx,maxy`.
pub fn parse_prefix(prefix: &str) -> Result<(String, Option<Bounds>), BoundsError> {
    let Some(marker) = prefix.rfind(BOUNDS_MARKER) else {
        return Ok((prefix.to_string(), None));
    };

    let literal = &prefix[..marker];
    if !literal.ends_with('/') {
        return Err(BoundsError::MissingSlash(literal.to_string()));
    }

    let fields: Vec<&str> = prefix[marker + BOUNDS_MARKER.len()..].split(',').collect();
    if fields.len() != 4 {
        return Err(BoundsError::FieldCount(fields.len()));
    }

    let mut values = [0i64; 4];
    for (index, field) in fields.iter().enumerate() {
        values[index] = parse_field(index, field)?;
    }

    let bounds = Bounds::new(values[0], values[1], values[2], values[3]);
    Ok((literal.to_string(), Some(bounds)))
}

fn parse_field(index: usize, field: &str) -> Result<i64, BoundsError> {
    let invalid = || BoundsError::InvalidField {
        index,
        value: field.to_string(),
    };
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    field.parse().map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bounds_normalises_corners() {
        let bounds = Bounds::new(20, 5, 10, 15);
        assert_eq!(bounds.min_x(), 10);
        assert_eq!(bounds.min_y(), 5);
        assert_eq!(bounds.max_x(), 20);
        assert_eq!(bounds.max_y(), 15);
    }

    #[test]
    fn test_bounds_display() {
        let bounds = Bounds::new(1, 2, 3, 4);
        assert_eq!(bounds.to_string(), "bounds=1,2,3,4");
        assert_eq!(bounds.with_prefix("a/b/"), "a/b/?bounds=1,2,3,4");
    }

    #[test]
    fn test_contains_is_inclusive() {
        let bounds = Bounds::new(10, 10, 20, 20);
        assert!(bounds.contains(10, 10));
        assert!(bounds.contains(20, 20));
        assert!(bounds.contains(15, 15));
        assert!(!bounds.contains(21, 15));
        assert!(!bounds.contains(15, 9));
    }

    #[test]
    fn test_matches_tile_keys() {
        let bounds = Bounds::new(10, 10, 20, 20);
        assert!(bounds.matches("gwc/layer/EPSG:4326/png/default/5/15/15.png"));
        assert!(!bounds.matches("gwc/layer/EPSG:4326/png/default/5/25/15.png"));
    }

    #[test]
    fn test_matches_rejects_non_tile_keys() {
        let bounds = Bounds::new(0, 0, 100, 100);
        assert!(!bounds.matches("gwc/layer/metadata.properties"));
        assert!(!bounds.matches("gwc/layer/parameters-abc.properties"));
        assert!(!bounds.matches(""));
    }

    #[test]
    fn test_parse_without_marker() {
        let (prefix, bounds) = parse_prefix("layerA/gridsetX/").unwrap();
        assert_eq!(prefix, "layerA/gridsetX/");
        assert!(bounds.is_none());
    }

    #[test]
    fn test_parse_with_bounds() {
        let (prefix, bounds) = parse_prefix("layerA/gridsetX/3/?bounds=4,3,2,1").unwrap();
        assert_eq!(prefix, "layerA/gridsetX/3/");
        assert_eq!(bounds, Some(Bounds::new(2, 1, 4, 3)));
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        assert_eq!(
            parse_prefix("a/?bounds=1,2,3"),
            Err(BoundsError::FieldCount(3))
        );
        assert_eq!(
            parse_prefix("a/?bounds=1,2,3,4,5"),
            Err(BoundsError::FieldCount(5))
        );
    }

    #[test]
    fn test_parse_rejects_non_numeric_fields() {
        assert!(matches!(
            parse_prefix("a/?bounds=1,x,3,4"),
            Err(BoundsError::InvalidField { index: 1, .. })
        ));
        assert!(matches!(
            parse_prefix("a/?bounds=1,,3,4"),
            Err(BoundsError::InvalidField { index: 1, .. })
        ));
        assert!(matches!(
            parse_prefix("a/?bounds=-1,2,3,4"),
            Err(BoundsError::InvalidField { index: 0, .. })
        ));
        assert!(matches!(
            parse_prefix("a/?bounds=1,2,3,99999999999999999999"),
            Err(BoundsError::InvalidField { index: 3, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_prefix_without_slash() {
        assert!(matches!(
            parse_prefix("layer?bounds=1,2,3,4"),
            Err(BoundsError::MissingSlash(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_format_parse_round_trip(
            x1 in 0i64..1_000_000,
            y1 in 0i64..1_000_000,
            x2 in 0i64..1_000_000,
            y2 in 0i64..1_000_000,
            segment in "[a-zA-Z0-9_:]{1,12}",
        ) {
            let bounds = Bounds::new(x1, y1, x2, y2);
            let prefix = format!("{}/12/", segment);
            let parsed = parse_prefix(&bounds.with_prefix(&prefix)).unwrap();
            prop_assert_eq!(parsed, (prefix, Some(bounds)));
        }

        #[test]
        fn prop_corners_are_normalised(
            x1 in any::<i64>(),
            y1 in any::<i64>(),
            x2 in any::<i64>(),
            y2 in any::<i64>(),
        ) {
            let bounds = Bounds::new(x1, y1, x2, y2);
            prop_assert!(bounds.min_x() <= bounds.max_x());
            prop_assert!(bounds.min_y() <= bounds.max_y());
            prop_assert_eq!(bounds, Bounds::new(x2, y2, x1, y1));
        }
    }
}
