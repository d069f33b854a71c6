// Deterministic Replay Engine
//
// Replays scanned log entries in order and decides for every entry
// whether it is applied or skipped.
//
// Damaged entries and unknown operations are skipped and reported.
// Replay itself never fails.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::log::{LogEntry, Transaction};
use crate::state::Snapshot;

/// Why an entry was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    Malformed(String),
    UnknownOperation(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Malformed(reason) => write!(f, "malformed entry: {reason}"),
            SkipReason::UnknownOperation(op) => write!(f, "unknown operation `{op}`"),
        }
    }
}

/// A log entry left out of the rebuilt snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub line: usize,
    pub reason: SkipReason,
}

/// What a replay did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub applied: usize,
    pub skipped: Vec<SkippedEntry>,
}

impl ReplaySummary {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Step-wise replay driver.
///
/// Callers feed entries in log order: [`Replayer::admit`] filters out
/// entries that cannot be replayed, [`Replayer::apply`] applies an
/// admitted transaction.
#[derive(Debug, Default)]
pub struct Replayer {
    last_timestamp: Option<DateTime<Utc>>,
    summary: ReplaySummary,
}

impl Replayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the transaction carried by `entry`, or record why it is skipped.
    pub fn admit<'e>(&mut self, entry: &'e LogEntry) -> Option<&'e Transaction> {
        match entry {
            LogEntry::Transaction { line, transaction } => {
                if let Some(last) = self.last_timestamp {
                    if transaction.timestamp < last {
                        // Log order stays authoritative.
                        tracing::warn!(
                            line,
                            %last,
                            timestamp = %transaction.timestamp,
                            "transaction timestamp goes backwards"
                        );
                    }
                }
                self.last_timestamp = Some(transaction.timestamp);
                Some(transaction)
            }
            LogEntry::Unknown { line, operation } => {
                self.skip(*line, SkipReason::UnknownOperation(operation.clone()));
                None
            }
            LogEntry::Malformed { line, reason } => {
                self.skip(*line, SkipReason::Malformed(reason.clone()));
                None
            }
        }
    }

    /// Apply an admitted transaction to `snapshot`.
    pub fn apply(&mut self, line: usize, snapshot: &mut Snapshot, transaction: &Transaction) {
        snapshot.apply(&transaction.operation);
        self.summary.applied += 1;
        tracing::debug!(line, operation = transaction.operation.kind(), "replayed");
    }

    pub fn finish(self) -> ReplaySummary {
        self.summary
    }

    fn skip(&mut self, line: usize, reason: SkipReason) {
        tracing::warn!(line, %reason, "skipping log entry");
        self.summary.skipped.push(SkippedEntry { line, reason });
    }
}

/// Replay entries onto the empty snapshot, in memory.
///
/// This is the reference derivation of the snapshot from the log.
pub fn replay(entries: &[LogEntry]) -> (Snapshot, ReplaySummary) {
    let mut replayer = Replayer::new();
    let mut snapshot = Snapshot::empty();

    for entry in entries {
        if let Some(transaction) = replayer.admit(entry) {
            replayer.apply(entry.line(), &mut snapshot, transaction);
        }
    }

    (snapshot, replayer.finish())
}
