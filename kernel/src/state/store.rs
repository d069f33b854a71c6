// Snapshot Storage
//
// Whole-document persistence for the snapshot. Every mutation reads the
// full document, changes it in memory and writes it back in full.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::Snapshot;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot at {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(serde_json::Error),
}

impl SnapshotError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, SnapshotError::Corrupt { .. })
    }
}

/// Storage backend for the snapshot document.
///
/// Properties required from implementations:
/// - `read` returns a complete snapshot or an error, never a partial one
/// - `write` replaces the whole document; readers see the old or the new
pub trait SnapshotStore {
    fn read(&self) -> Result<Snapshot, SnapshotError>;

    fn write(&self, snapshot: &Snapshot) -> Result<(), SnapshotError>;
}

/// Snapshot persisted as a single JSON document.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write an empty snapshot if no document exists yet.
    ///
    /// Returns whether a document was created.
    pub fn initialize_if_absent(&self) -> Result<bool, SnapshotError> {
        match fs::metadata(&self.path) {
            Ok(_) => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.write(&Snapshot::empty())?;
                tracing::info!(path = %self.path.display(), "initialized empty snapshot");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for FileSnapshotStore {
    /// Load and fully parse the document.
    ///
    /// A document that does not parse is reported as
    /// [`SnapshotError::Corrupt`], never as a partial snapshot.
    fn read(&self) -> Result<Snapshot, SnapshotError> {
        let bytes = fs::read(&self.path)?;
        serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the document.
    ///
    /// The new document is written and synced to a sibling file, then
    /// renamed over the old one.
    fn write(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(SnapshotError::Encode)?;
        let tmp_path = self.temp_path();

        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
