// Store Configuration
//
// File locations for the snapshot and the transaction log. These are the
// only external configuration the store takes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Paths of the two files backing a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub snapshot_path: PathBuf,
    pub log_path: PathBuf,
}

impl StoreConfig {
    pub const SNAPSHOT_FILE: &'static str = "snapshot.json";
    pub const LOG_FILE: &'static str = "transactions.log";

    /// Default file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            snapshot_path: dir.join(Self::SNAPSHOT_FILE),
            log_path: dir.join(Self::LOG_FILE),
        }
    }

    /// Load a JSON config file.
    ///
    /// Relative paths are resolved against the directory holding the file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(Self {
            snapshot_path: base.join(config.snapshot_path),
            log_path: base.join(config.log_path),
        })
    }
}
