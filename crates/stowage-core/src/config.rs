//! Runtime configuration.
//!
//! The configuration is read once per process and passed down by value;
//! nothing below the entry point looks at the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::{Error, Result};

/// Parsed `storage.rootLocation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    root: PathBuf,
}

impl StorageLocation {
    /// Parse a `file://` location. Other schemes are rejected.
    ///
    /// `file:///var/lib/stowage` is absolute; `file://filestore` is taken
    /// relative to the working directory.
    pub fn parse(location: &str) -> Result<Self> {
        let path = location
            .strip_prefix(defaults::FILE_SCHEME)
            .ok_or_else(|| {
                Error::Config(format!("unsupported storage location scheme: {}", location))
            })?;
        if path.is_empty() {
            return Err(Error::Config(format!(
                "storage location has no path: {}",
                location
            )));
        }
        Ok(Self {
            root: PathBuf::from(path),
        })
    }

    /// Use a directory directly.
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Per-job selection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    pub migrate: i64,
    pub repair: i64,
    pub index: i64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            migrate: defaults::BATCH_LIMIT,
            repair: defaults::BATCH_LIMIT,
            index: defaults::BATCH_LIMIT,
        }
    }
}

/// Immutable configuration injected into the blob store and the jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StowageConfig {
    /// `None` selects the null blob store: payloads stay inline.
    pub storage: Option<StorageLocation>,
    pub limits: BatchLimits,
    /// Run the bulk mover synchronously from `init`.
    pub run_during_init: bool,
    pub database_url: String,
}

impl Default for StowageConfig {
    fn default() -> Self {
        Self {
            storage: None,
            limits: BatchLimits::default(),
            run_during_init: false,
            database_url: defaults::DATABASE_URL.to_string(),
        }
    }
}

impl StowageConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `STORAGE_ROOT_LOCATION` | unset | `file://` root of the blob store |
    /// | `MIGRATION_BATCH_LIMIT` | `512` | Records per migration pass |
    /// | `REPAIR_BATCH_LIMIT` | `512` | Records per repair pass |
    /// | `INDEX_BATCH_LIMIT` | `512` | Records per index pass |
    /// | `MIGRATION_RUN_DURING_INIT` | `false` | Bulk move during `init` |
    /// | `DATABASE_URL` | `postgres://localhost/stowage` | Record store |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = match lookup("STORAGE_ROOT_LOCATION") {
            Some(location) if !location.trim().is_empty() => {
                Some(StorageLocation::parse(location.trim())?)
            }
            _ => None,
        };

        let limit = |name: &str| -> Result<i64> {
            match lookup(name) {
                Some(raw) => {
                    let value = raw
                        .trim()
                        .parse::<i64>()
                        .map_err(|e| Error::Config(format!("{}: {}", name, e)))?;
                    if value < 1 {
                        return Err(Error::Config(format!("{} must be positive", name)));
                    }
                    Ok(value)
                }
                None => Ok(defaults::BATCH_LIMIT),
            }
        };

        let run_during_init = lookup("MIGRATION_RUN_DURING_INIT")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            storage,
            limits: BatchLimits {
                migrate: limit("MIGRATION_BATCH_LIMIT")?,
                repair: limit("REPAIR_BATCH_LIMIT")?,
                index: limit("INDEX_BATCH_LIMIT")?,
            },
            run_during_init,
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| defaults::DATABASE_URL.to_string()),
        })
    }

    pub fn with_storage(mut self, location: StorageLocation) -> Self {
        self.storage = Some(location);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = StowageConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StowageConfig::default());
        assert!(config.storage.is_none());
        assert_eq!(config.limits.migrate, 512);
        assert!(!config.run_during_init);
    }

    #[test]
    fn test_absolute_file_location() {
        let loc = StorageLocation::parse("file:///var/lib/stowage").unwrap();
        assert_eq!(loc.root(), Path::new("/var/lib/stowage"));
    }

    #[test]
    fn test_relative_file_location() {
        let loc = StorageLocation::parse("file://filestore").unwrap();
        assert_eq!(loc.root(), Path::new("filestore"));
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(matches!(
            StorageLocation::parse("s3://bucket/prefix"),
            Err(Error::Config(_))
        ));
        assert!(StorageLocation::parse("file://").is_err());
    }

    #[test]
    fn test_env_values() {
        let config = StowageConfig::from_lookup(lookup(&[
            ("STORAGE_ROOT_LOCATION", "file:///srv/blobs"),
            ("MIGRATION_BATCH_LIMIT", "10000"),
            ("INDEX_BATCH_LIMIT", " 64 "),
            ("MIGRATION_RUN_DURING_INIT", "1"),
        ]))
        .unwrap();
        assert_eq!(
            config.storage.as_ref().map(|s| s.root().to_path_buf()),
            Some(PathBuf::from("/srv/blobs"))
        );
        assert_eq!(config.limits.migrate, 10_000);
        assert_eq!(config.limits.repair, 512);
        assert_eq!(config.limits.index, 64);
        assert!(config.run_during_init);
    }

    #[test]
    fn test_blank_location_means_unconfigured() {
        let config =
            StowageConfig::from_lookup(lookup(&[("STORAGE_ROOT_LOCATION", "  ")])).unwrap();
        assert!(config.storage.is_none());
    }

    #[test]
    fn test_invalid_limit() {
        assert!(StowageConfig::from_lookup(lookup(&[("REPAIR_BATCH_LIMIT", "lots")])).is_err());
        assert!(StowageConfig::from_lookup(lookup(&[("REPAIR_BATCH_LIMIT", "0")])).is_err());
    }
}
