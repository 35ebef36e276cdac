//! Tile store configuration.
//!
//! [`StoreConfig`] carries defaults for everything except the bucket name and
//! can be built in code or loaded from an INI file:
//!
//! ```ini
//! [store]
//! bucket = tiles
//! prefix = gwc
//! suitability = existing
//!
//! [delete]
//! workers = 4
//! batch_size = 1000
//! page_size = 1000
//! max_attempts = 3
//! shutdown_timeout = 30
//! ```

mod parser;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::executor::{RetryPolicy, DEFAULT_DELETE_WORKERS};
use crate::objectstore::{MAX_DELETE_BATCH, MAX_KEYS_PER_PAGE};

/// Default time allowed for running deletions at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or parse the config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// A required value is absent
    #[error("Missing configuration value: {section}.{key}")]
    MissingValue { section: String, key: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// What [`TileStore::open`](crate::TileStore::open) requires of the
/// configured location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuitabilityCheck {
    /// The location must be empty or already hold a tile store.
    #[default]
    Existing,
    /// The location must be empty.
    Empty,
    /// No check.
    None,
}

impl FromStr for SuitabilityCheck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "existing" => Ok(Self::Existing),
            "empty" => Ok(Self::Empty),
            "none" => Ok(Self::None),
            other => Err(format!("unknown suitability check '{}'", other)),
        }
    }
}

impl fmt::Display for SuitabilityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Existing => write!(f, "existing"),
            Self::Empty => write!(f, "empty"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Settings for one tile store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Bucket holding the cache.
    pub bucket: String,
    /// Key prefix all objects are stored under; empty for the bucket root.
    pub prefix: String,
    /// Number of delete workers.
    pub delete_workers: usize,
    /// Keys per batched delete request.
    pub delete_batch_size: usize,
    /// Keys requested per listing page.
    pub list_page_size: usize,
    /// Time allowed for running deletions to finish on shutdown.
    pub shutdown_timeout: Duration,
    /// Retry behaviour for transient batch failures.
    pub retry: RetryPolicy,
    /// Check applied to the location when the store opens.
    pub suitability: SuitabilityCheck,
}

impl StoreConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            delete_workers: DEFAULT_DELETE_WORKERS,
            delete_batch_size: MAX_DELETE_BATCH,
            list_page_size: MAX_KEYS_PER_PAGE,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            suitability: SuitabilityCheck::default(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_delete_workers(mut self, workers: usize) -> Self {
        self.delete_workers = workers;
        self
    }

    pub fn with_delete_batch_size(mut self, batch_size: usize) -> Self {
        self.delete_batch_size = batch_size;
        self
    }

    pub fn with_list_page_size(mut self, page_size: usize) -> Self {
        self.list_page_size = page_size;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_suitability(mut self, suitability: SuitabilityCheck) -> Self {
        self.suitability = suitability;
        self
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingValue`] for an empty bucket name and
    /// [`ConfigError::InvalidValue`] for out-of-range numbers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::MissingValue {
                section: "store".to_string(),
                key: "bucket".to_string(),
            });
        }
        if self.delete_workers == 0 {
            return Err(invalid("delete", "workers", self.delete_workers, "must be at least 1"));
        }
        if self.delete_batch_size == 0 || self.delete_batch_size > MAX_DELETE_BATCH {
            return Err(invalid(
                "delete",
                "batch_size",
                self.delete_batch_size,
                &format!("must be between 1 and {}", MAX_DELETE_BATCH),
            ));
        }
        if self.list_page_size == 0 || self.list_page_size > MAX_KEYS_PER_PAGE {
            return Err(invalid(
                "delete",
                "page_size",
                self.list_page_size,
                &format!("must be between 1 and {}", MAX_KEYS_PER_PAGE),
            ));
        }
        if self.retry.max_attempts() == 0 {
            return Err(invalid("delete", "max_attempts", 0, "must be at least 1"));
        }
        Ok(())
    }

    /// Loads and validates configuration from an INI file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    /// Parses and validates configuration from INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(ini::Error::Parse)?;
        Self::from_ini(&ini)
    }

    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let config = parser::parse_ini(ini)?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(section: &str, key: &str, value: impl fmt::Display, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::new("tiles");
        assert!(config.validate().is_ok());
        assert_eq!(config.delete_workers, DEFAULT_DELETE_WORKERS);
        assert_eq!(config.delete_batch_size, 1000);
        assert_eq!(config.suitability, SuitabilityCheck::Existing);
    }

    #[test]
    fn test_empty_bucket_rejected() {
        let err = StoreConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue { .. }));
    }

    #[test]
    fn test_batch_size_over_limit_rejected() {
        let err = StoreConfig::new("tiles")
            .with_delete_batch_size(1001)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("delete.batch_size"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = StoreConfig::new("tiles")
            .with_delete_workers(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_suitability_from_str() {
        assert_eq!("EMPTY".parse::<SuitabilityCheck>(), Ok(SuitabilityCheck::Empty));
        assert_eq!(" none ".parse::<SuitabilityCheck>(), Ok(SuitabilityCheck::None));
        assert!("strict".parse::<SuitabilityCheck>().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store]\nbucket = tiles\nprefix = gwc\n\n[delete]\nworkers = 2").unwrap();

        let config = StoreConfig::load(file.path()).unwrap();
        assert_eq!(config.bucket, "tiles");
        assert_eq!(config.prefix, "gwc");
        assert_eq!(config.delete_workers, 2);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoreConfig::load(&dir.path().join("absent.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }
}
