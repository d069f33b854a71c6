// Transaction Log
//
// Append-only ledger of every mutation ever intended for the snapshot.
// Entries are written before the snapshot changes and are never
// rewritten or removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod store;

pub use store::{FileLogStore, InMemoryLogStore, LogEntry, LogStore};

/// Stable identifier for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

/// Input of an upsert: set the record at `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertRecord {
    pub key: String,
    pub name: String,
    pub address: String,
}

/// A mutation carried by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    UpsertRecord(UpsertRecord),
}

impl Operation {
    pub const UPSERT_RECORD: &'static str = "UPSERT_RECORD";

    /// Wire name of the operation kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::UpsertRecord(_) => Self::UPSERT_RECORD,
        }
    }

    /// Encode the operation payload.
    pub fn data(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Operation::UpsertRecord(upsert) => serde_json::to_value(upsert),
        }
    }

    /// Decode a payload for a known operation kind.
    ///
    /// Returns `Ok(None)` for kinds this build does not understand.
    pub fn decode(kind: &str, data: serde_json::Value) -> Result<Option<Self>, serde_json::Error> {
        match kind {
            Self::UPSERT_RECORD => Ok(Some(Operation::UpsertRecord(serde_json::from_value(data)?))),
            _ => Ok(None),
        }
    }
}

/// Immutable log entry.
///
/// `id` is absent on entries written without one; only `timestamp`,
/// `operation` and `data` are required on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Option<TransactionId>,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
}

impl Transaction {
    pub fn new(timestamp: DateTime<Utc>, operation: Operation) -> Self {
        Self {
            id: Some(TransactionId(Uuid::new_v4())),
            timestamp,
            operation,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("transaction log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode transaction: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Appender that stamps transactions with non-decreasing timestamps.
#[derive(Debug)]
pub struct TransactionLog<S: LogStore> {
    store: S,
    last_timestamp: Option<DateTime<Utc>>,
}

impl<S: LogStore> TransactionLog<S> {
    /// Wrap a store, picking up the last timestamp already persisted.
    pub fn new(store: S) -> Result<Self, LogError> {
        let last_timestamp = store.last_timestamp()?;
        Ok(Self {
            store,
            last_timestamp,
        })
    }

    /// Build a transaction for `operation` stamped no earlier than the
    /// previous append.
    pub fn stamp(&self, operation: Operation) -> Transaction {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        Transaction::new(timestamp, operation)
    }

    /// Durably append a transaction.
    ///
    /// On error nothing is remembered and the caller must not apply the
    /// transaction.
    pub fn append(&mut self, transaction: &Transaction) -> Result<(), LogError> {
        self.store.append(transaction)?;
        self.last_timestamp = Some(transaction.timestamp);
        tracing::debug!(
            id = ?transaction.id.map(|id| id.0),
            operation = transaction.operation.kind(),
            "transaction appended"
        );
        Ok(())
    }

    /// Scan every entry in append order.
    pub fn scan(&self) -> Result<Vec<LogEntry>, LogError> {
        self.store.scan()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn upsert(key: &str) -> Operation {
        Operation::UpsertRecord(UpsertRecord {
            key: key.into(),
            name: format!("name-{key}"),
            address: format!("{key}@example.com"),
        })
    }

    #[test]
    fn append_and_scan() {
        let mut log = TransactionLog::new(InMemoryLogStore::default()).unwrap();

        let first = log.stamp(upsert("1"));
        log.append(&first).unwrap();
        let second = log.stamp(upsert("2"));
        log.append(&second).unwrap();

        let entries = log.scan().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].transaction(), Some(&first));
        assert_eq!(entries[1].transaction(), Some(&second));
    }

    #[test]
    fn stamp_never_goes_backwards() {
        let mut log = TransactionLog::new(InMemoryLogStore::default()).unwrap();

        let future = Utc::now() + Duration::hours(1);
        log.append(&Transaction::new(future, upsert("1"))).unwrap();

        let next = log.stamp(upsert("2"));
        assert_eq!(next.timestamp, future);
    }

    #[test]
    fn last_timestamp_is_loaded_from_store() {
        let mut store = InMemoryLogStore::default();
        let stamped = Transaction::new(Utc::now(), upsert("1"));
        store.append(&stamped).unwrap();

        let log = TransactionLog::new(store).unwrap();
        assert_eq!(log.last_timestamp(), Some(stamped.timestamp));
    }

    #[test]
    fn failed_append_is_not_remembered() {
        let mut store = InMemoryLogStore::default();
        store.fail_appends(true);
        let mut log = TransactionLog::new(store).unwrap();

        let tx = log.stamp(upsert("1"));
        assert!(matches!(log.append(&tx), Err(LogError::Io(_))));
        assert_eq!(log.last_timestamp(), None);
        assert!(log.scan().unwrap().is_empty());
    }

    #[test]
    fn decode_unknown_kind_is_none() {
        let decoded = Operation::decode("DELETE_RECORD", serde_json::json!({"key": "1"})).unwrap();
        assert!(decoded.is_none());
    }
}
