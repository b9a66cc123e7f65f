//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. The intent is to avoid reading process-wide environment variables
//! during request handling, which can lead to inconsistent behaviour in multi-threaded runtimes
//! and test harnesses.

use crate::allocator::IdRange;
use crate::constants::{
    CATALOG_FILENAME, DEFAULT_MAX_ALLOCATION_ATTEMPTS, DEFAULT_MAX_UPLOAD_BYTES, STAGING_DIR_NAME,
    UPLOADS_DIR_NAME,
};
use crate::error::{ConfigError, ConfigResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    id_range: IdRange,
    max_allocation_attempts: u32,
    max_upload_bytes: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig` using the default five-digit id range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if either limit is zero.
    pub fn new(
        data_dir: PathBuf,
        max_allocation_attempts: u32,
        max_upload_bytes: usize,
    ) -> ConfigResult<Self> {
        if max_allocation_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_allocation_attempts",
                value: "0".into(),
                reason: "must be greater than zero",
            });
        }
        if max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_upload_bytes",
                value: "0".into(),
                reason: "must be greater than zero",
            });
        }

        Ok(Self {
            data_dir,
            id_range: IdRange::default(),
            max_allocation_attempts,
            max_upload_bytes,
        })
    }

    /// Replace the range identifiers are drawn from.
    pub fn with_id_range(mut self, id_range: IdRange) -> Self {
        self.id_range = id_range;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join(STAGING_DIR_NAME)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join(UPLOADS_DIR_NAME)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(CATALOG_FILENAME)
    }

    pub fn id_range(&self) -> IdRange {
        self.id_range
    }

    pub fn max_allocation_attempts(&self) -> u32 {
        self.max_allocation_attempts
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Create the data, staging and uploads directories if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataDirCreation`] naming the directory that could not be created.
    pub fn ensure_layout(&self) -> ConfigResult<()> {
        for dir in [self.data_dir.clone(), self.staging_dir(), self.uploads_dir()] {
            fs::create_dir_all(&dir)
                .map_err(|source| ConfigError::DataDirCreation { path: dir, source })?;
        }
        Ok(())
    }
}

/// Parse the allocator attempt cap from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default cap.
pub fn max_allocation_attempts_from_env_value(value: Option<String>) -> ConfigResult<u32> {
    parse_positive(
        "SCAPE_MAX_ALLOCATION_ATTEMPTS",
        value,
        DEFAULT_MAX_ALLOCATION_ATTEMPTS,
    )
}

/// Parse the upload size cap (bytes) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default cap.
pub fn max_upload_bytes_from_env_value(value: Option<String>) -> ConfigResult<usize> {
    parse_positive("SCAPE_MAX_UPLOAD_BYTES", value, DEFAULT_MAX_UPLOAD_BYTES)
}

fn parse_positive<T>(name: &'static str, value: Option<String>, default: T) -> ConfigResult<T>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let Some(value) = value else {
        return Ok(default);
    };

    match value.parse::<T>() {
        Ok(parsed) if parsed != T::default() => Ok(parsed),
        Ok(_) => Err(ConfigError::InvalidValue {
            name,
            value,
            reason: "must be greater than zero",
        }),
        Err(_) => Err(ConfigError::InvalidValue {
            name,
            value,
            reason: "must be a positive integer",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_rejects_zero_limits() {
        assert!(CoreConfig::new(PathBuf::from("data"), 0, 10).is_err());
        assert!(CoreConfig::new(PathBuf::from("data"), 10, 0).is_err());
    }

    #[test]
    fn test_layout_paths_are_distinct_children_of_data_dir() {
        let cfg = CoreConfig::new(PathBuf::from("data"), 10, 10).unwrap();

        assert_eq!(cfg.staging_dir(), PathBuf::from("data/staging"));
        assert_eq!(cfg.uploads_dir(), PathBuf::from("data/uploads"));
        assert_eq!(cfg.catalog_path(), PathBuf::from("data/catalog.json"));
        assert_ne!(cfg.staging_dir(), cfg.uploads_dir());
    }

    #[test]
    fn test_ensure_layout_creates_directories() {
        let temp = TempDir::new().unwrap();
        let cfg = CoreConfig::new(temp.path().join("nested/data"), 10, 10).unwrap();

        cfg.ensure_layout().unwrap();

        assert!(cfg.staging_dir().is_dir());
        assert!(cfg.uploads_dir().is_dir());
    }

    #[test]
    fn test_ensure_layout_reports_blocked_path() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("data");
        fs::write(&blocker, b"not a directory").unwrap();
        let cfg = CoreConfig::new(blocker, 10, 10).unwrap();

        assert!(matches!(
            cfg.ensure_layout(),
            Err(ConfigError::DataDirCreation { .. })
        ));
    }

    #[test]
    fn test_env_values_default_when_missing_or_blank() {
        assert_eq!(
            max_allocation_attempts_from_env_value(None).unwrap(),
            DEFAULT_MAX_ALLOCATION_ATTEMPTS
        );
        assert_eq!(
            max_upload_bytes_from_env_value(Some("   ".into())).unwrap(),
            DEFAULT_MAX_UPLOAD_BYTES
        );
    }

    #[test]
    fn test_env_values_parse_and_validate() {
        assert_eq!(
            max_allocation_attempts_from_env_value(Some(" 25 ".into())).unwrap(),
            25
        );
        assert!(max_allocation_attempts_from_env_value(Some("0".into())).is_err());
        assert!(max_allocation_attempts_from_env_value(Some("-3".into())).is_err());
        assert!(max_upload_bytes_from_env_value(Some("lots".into())).is_err());
    }
}
