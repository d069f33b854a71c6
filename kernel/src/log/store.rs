// Transaction Log Storage
//
// Defines the durability contract for the transaction log and the
// line-delimited JSON framing shared by every backend.
//
// One entry per line, so a scanner can find record boundaries even when
// an entry in the middle is damaged or the tail is truncated.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use super::{LogError, Operation, Transaction, TransactionId};

/// Storage backend for the transaction log.
///
/// Properties required from implementations:
/// - Append-only
/// - Ordered
/// - Durable before `append` returns
///
/// Implementations MUST NOT:
/// - Reorder entries
/// - Mutate or drop existing entries
/// - Batch appends across calls
pub trait LogStore: Send + Sync {
    /// Append one fully-formed entry.
    fn append(&mut self, transaction: &Transaction) -> Result<(), LogError>;

    /// Scan all entries in append order.
    ///
    /// Damaged or unrecognised lines are returned as entries, not errors.
    /// Only failure to read the log at all is an error.
    fn scan(&self) -> Result<Vec<LogEntry>, LogError>;

    /// Timestamp of the last readable transaction.
    fn last_timestamp(&self) -> Result<Option<DateTime<Utc>>, LogError> {
        Ok(last_transaction_timestamp(&self.scan()?))
    }
}

fn last_transaction_timestamp(entries: &[LogEntry]) -> Option<DateTime<Utc>> {
    entries
        .iter()
        .rev()
        .find_map(LogEntry::transaction)
        .map(|tx| tx.timestamp)
}

/// One scanned line of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Transaction { line: usize, transaction: Transaction },
    Unknown { line: usize, operation: String },
    Malformed { line: usize, reason: String },
}

impl LogEntry {
    /// 1-based line number in the log.
    pub fn line(&self) -> usize {
        match self {
            LogEntry::Transaction { line, .. }
            | LogEntry::Unknown { line, .. }
            | LogEntry::Malformed { line, .. } => *line,
        }
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            LogEntry::Transaction { transaction, .. } => Some(transaction),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<TransactionId>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    timestamp: DateTime<Utc>,
    operation: String,
    data: serde_json::Value,
}

/// Accepts RFC 3339 timestamps and ISO-8601 local timestamps without an
/// offset, which are taken as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| de::Error::custom(format!("invalid timestamp `{raw}`: {e}")))
}

/// Encode a transaction as a single JSON line, without the newline.
pub fn encode(transaction: &Transaction) -> Result<String, serde_json::Error> {
    let wire = WireEntry {
        id: transaction.id,
        timestamp: transaction.timestamp,
        operation: transaction.operation.kind().to_string(),
        data: transaction.operation.data()?,
    };
    serde_json::to_string(&wire)
}

fn decode(line: usize, bytes: &[u8]) -> LogEntry {
    let wire: WireEntry = match serde_json::from_slice(bytes) {
        Ok(wire) => wire,
        Err(e) => {
            return LogEntry::Malformed {
                line,
                reason: e.to_string(),
            }
        }
    };

    match Operation::decode(&wire.operation, wire.data) {
        Ok(Some(operation)) => LogEntry::Transaction {
            line,
            transaction: Transaction {
                id: wire.id,
                timestamp: wire.timestamp,
                operation,
            },
        },
        Ok(None) => LogEntry::Unknown {
            line,
            operation: wire.operation,
        },
        Err(e) => LogEntry::Malformed {
            line,
            reason: format!("invalid {} payload: {e}", wire.operation),
        },
    }
}

fn scan_bytes(bytes: &[u8]) -> Vec<LogEntry> {
    bytes
        .split(|b| *b == b'\n')
        .enumerate()
        .filter(|(_, raw)| !raw.iter().all(u8::is_ascii_whitespace))
        .map(|(index, raw)| decode(index + 1, raw))
        .collect()
}

/// Log persisted as a JSON Lines file.
#[derive(Debug, Clone)]
pub struct FileLogStore {
    path: PathBuf,
}

impl FileLogStore {
    /// Open the log at `path`, creating an empty file on first use.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        let path = path.into();
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStore for FileLogStore {
    fn append(&mut self, transaction: &Transaction) -> Result<(), LogError> {
        let mut line = encode(transaction)?;
        line.push('\n');

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<LogEntry>, LogError> {
        let bytes = fs::read(&self.path)?;
        Ok(scan_bytes(&bytes))
    }

    fn last_timestamp(&self) -> Result<Option<DateTime<Utc>>, LogError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(last_transaction_timestamp(&scan_bytes(&bytes)))
    }
}

/// Log held in memory with the same framing as [`FileLogStore`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryLogStore {
    buffer: Vec<u8>,
    fail_appends: bool,
}

impl InMemoryLogStore {
    /// Make every subsequent append fail with an I/O error.
    pub fn fail_appends(&mut self, fail: bool) {
        self.fail_appends = fail;
    }

    /// Append raw bytes as one line, bypassing encoding.
    pub fn push_raw_line(&mut self, raw: &str) {
        self.buffer.extend_from_slice(raw.as_bytes());
        self.buffer.push(b'\n');
    }
}

impl LogStore for InMemoryLogStore {
    fn append(&mut self, transaction: &Transaction) -> Result<(), LogError> {
        if self.fail_appends {
            return Err(LogError::Io(io::Error::other("append disabled")));
        }
        let line = encode(transaction)?;
        self.push_raw_line(&line);
        Ok(())
    }

    fn scan(&self) -> Result<Vec<LogEntry>, LogError> {
        Ok(scan_bytes(&self.buffer))
    }
}
