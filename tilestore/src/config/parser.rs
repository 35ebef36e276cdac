//! INI parsing logic for converting `Ini` → `StoreConfig`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::str::FromStr;
use std::time::Duration;

use ini::Ini;

use super::{ConfigError, StoreConfig, SuitabilityCheck};
use crate::executor::RetryPolicy;

/// Parse an `Ini` object into a `StoreConfig`.
///
/// `store.bucket` is required; every other value overlays the defaults of
/// [`StoreConfig::new`].
pub(super) fn parse_ini(ini: &Ini) -> Result<StoreConfig, ConfigError> {
    let store = ini.section(Some("store"));

    let bucket = store
        .and_then(|s| s.get("bucket"))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingValue {
            section: "store".to_string(),
            key: "bucket".to_string(),
        })?;

    let mut config = StoreConfig::new(bucket);

    // [store] section
    if let Some(section) = store {
        if let Some(v) = section.get("prefix") {
            config.prefix = v.trim().to_string();
        }
        if let Some(v) = section.get("suitability") {
            config.suitability =
                SuitabilityCheck::from_str(v).map_err(|_| ConfigError::InvalidValue {
                    section: "store".to_string(),
                    key: "suitability".to_string(),
                    value: v.to_string(),
                    reason: "must be one of: existing, empty, none".to_string(),
                })?;
        }
    }

    // [delete] section
    if let Some(section) = ini.section(Some("delete")) {
        if let Some(v) = section.get("workers") {
            config.delete_workers = parse_number("delete", "workers", v)?;
        }
        if let Some(v) = section.get("batch_size") {
            config.delete_batch_size = parse_number("delete", "batch_size", v)?;
        }
        if let Some(v) = section.get("page_size") {
            config.list_page_size = parse_number("delete", "page_size", v)?;
        }
        if let Some(v) = section.get("max_attempts") {
            let attempts: u32 = parse_number("delete", "max_attempts", v)?;
            config.retry = if attempts <= 1 {
                RetryPolicy::None
            } else {
                RetryPolicy::exponential(attempts)
            };
        }
        if let Some(v) = section.get("shutdown_timeout") {
            let secs: u64 = parse_number("delete", "shutdown_timeout", v)?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }
    }

    Ok(config)
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: "must be a non-negative integer".to_string(),
    })
}
