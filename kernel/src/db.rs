// Record Store
//
// The single entry point for callers: owns the transaction log and the
// snapshot for one pair of files.
//
// Write path contract: a mutation is appended to the log, durably, before
// the snapshot is read, changed and written back. If the append fails the
// snapshot is never touched.

use crate::config::StoreConfig;
use crate::log::{FileLogStore, LogEntry, LogError, Operation, Transaction, TransactionLog, UpsertRecord};
use crate::state::{FileSnapshotStore, Snapshot, SnapshotError, SnapshotStore};

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("transaction log append failed, snapshot untouched: {0}")]
    Append(#[source] LogError),

    #[error("failed to open transaction log: {0}")]
    Open(#[from] LogError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// File-backed record store.
///
/// Single writer: callers must not run mutations or recovery on the same
/// files concurrently.
pub struct Database {
    config: StoreConfig,
    pub(crate) log: TransactionLog<FileLogStore>,
    pub(crate) snapshots: FileSnapshotStore,
}

impl Database {
    /// Open the store, creating the log and an empty snapshot on first use.
    pub fn open(config: StoreConfig) -> Result<Self, DbError> {
        let log = TransactionLog::new(FileLogStore::open(&config.log_path)?)?;
        let snapshots = FileSnapshotStore::new(&config.snapshot_path);

        if snapshots.initialize_if_absent()? && log.last_timestamp().is_some() {
            tracing::warn!(
                log = %config.log_path.display(),
                "snapshot was missing but the log has transactions; run recovery to rebuild it"
            );
        }

        Ok(Self {
            config,
            log,
            snapshots,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Insert or overwrite the record at `key`.
    ///
    /// Any string is a valid key. Returns the transaction as logged.
    pub fn upsert(
        &mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
    ) -> Result<Transaction, DbError> {
        let transaction = self.log.stamp(Operation::UpsertRecord(UpsertRecord {
            key: key.into(),
            name: name.into(),
            address: address.into(),
        }));

        self.log.append(&transaction).map_err(DbError::Append)?;

        let mut snapshot = self.snapshots.read()?;
        snapshot.apply(&transaction.operation);
        self.snapshots.write(&snapshot)?;

        Ok(transaction)
    }

    /// Load the persisted snapshot.
    ///
    /// Corruption is reported, never repaired here; see [`Database::recover`].
    pub fn read_snapshot(&self) -> Result<Snapshot, SnapshotError> {
        self.snapshots.read()
    }

    /// Scan the transaction log.
    pub fn transactions(&self) -> Result<Vec<LogEntry>, LogError> {
        self.log.scan()
    }
}
