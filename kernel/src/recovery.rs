// Recovery Engine
//
// Rebuilds the snapshot from the transaction log: reset to the empty
// snapshot, then replay every entry in append order through the
// snapshot store. Only ever run on explicit request.

use crate::db::Database;
use crate::log::{LogEntry, LogError};
use crate::replay::{ReplaySummary, Replayer};
use crate::state::{Snapshot, SnapshotError, SnapshotStore};

/// Outcome of a completed recovery.
pub type RecoveryReport = ReplaySummary;

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("failed to reset snapshot: {0}")]
    Reset(#[source] SnapshotError),

    #[error("transaction log unreadable, snapshot left empty: {0}")]
    LogUnreadable(#[source] LogError),

    #[error("failed to apply log line {line}: {source}")]
    Apply { line: usize, source: SnapshotError },
}

impl Database {
    /// Discard the current snapshot and rebuild it from the log.
    ///
    /// Damaged entries and unknown operations are skipped and listed in the
    /// report. If the log cannot be read at all the snapshot is left empty
    /// and an error is returned.
    ///
    /// Replaying the same log always produces the same snapshot, so
    /// recovery can be run again at any time.
    pub fn recover(&self) -> Result<RecoveryReport, RecoveryError> {
        tracing::info!(log = %self.config().log_path.display(), "starting recovery");

        let report = rebuild(&self.snapshots, || self.log.scan())?;
        tracing::info!(
            applied = report.applied,
            skipped = report.skipped.len(),
            "recovery complete"
        );
        Ok(report)
    }
}

/// Reset `snapshots` to empty, then replay `scan`'s entries through it one
/// read/apply/write cycle at a time.
fn rebuild<S, F>(snapshots: &S, scan: F) -> Result<RecoveryReport, RecoveryError>
where
    S: SnapshotStore,
    F: FnOnce() -> Result<Vec<LogEntry>, LogError>,
{
    snapshots
        .write(&Snapshot::empty())
        .map_err(RecoveryError::Reset)?;

    let entries = scan().map_err(RecoveryError::LogUnreadable)?;
    let mut replayer = Replayer::new();

    for entry in &entries {
        let Some(transaction) = replayer.admit(entry) else {
            continue;
        };
        let line = entry.line();

        let mut current = snapshots
            .read()
            .map_err(|source| RecoveryError::Apply { line, source })?;
        replayer.apply(line, &mut current, transaction);
        snapshots
            .write(&current)
            .map_err(|source| RecoveryError::Apply { line, source })?;
    }

    Ok(replayer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::log::{InMemoryLogStore, LogStore, Operation, Transaction, UpsertRecord};
    use crate::replay::SkipReason;
    use crate::state::Record;
    use chrono::Utc;
    use std::cell::{Cell, RefCell};
    use std::fs::{self, OpenOptions};
    use std::io::{self, Write};

    fn seeded(dir: &tempfile::TempDir) -> Database {
        let mut db = Database::open(StoreConfig::in_dir(dir.path())).unwrap();
        db.upsert("1", "John Doe", "john@example.com").unwrap();
        db.upsert("2", "Jane Smith", "jane@example.com").unwrap();
        db.upsert("1", "John D.", "john2@example.com").unwrap();
        db
    }

    fn corrupt(db: &Database) {
        fs::write(&db.config().snapshot_path, r#"{"records": CORRUPTED_DATA}"#).unwrap();
    }

    fn append_lines(db: &Database, lines: &[&str]) {
        let mut log = OpenOptions::new()
            .append(true)
            .open(&db.config().log_path)
            .unwrap();
        for line in lines {
            writeln!(log, "{line}").unwrap();
        }
    }

    /// Snapshot store that keeps its document in memory and fails a chosen
    /// write or read.
    #[derive(Default)]
    struct FlakySnapshots {
        current: RefCell<Snapshot>,
        writes: Cell<usize>,
        fail_write: Option<usize>,
        fail_reads: bool,
    }

    impl SnapshotStore for FlakySnapshots {
        fn read(&self) -> Result<Snapshot, SnapshotError> {
            if self.fail_reads && self.writes.get() > 0 {
                return Err(io::Error::other("read disabled").into());
            }
            Ok(self.current.borrow().clone())
        }

        fn write(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
            let n = self.writes.get() + 1;
            self.writes.set(n);
            if self.fail_write == Some(n) {
                return Err(io::Error::other("write disabled").into());
            }
            *self.current.borrow_mut() = snapshot.clone();
            Ok(())
        }
    }

    fn three_upserts() -> Vec<LogEntry> {
        let mut store = InMemoryLogStore::default();
        for (key, name) in [("1", "John Doe"), ("2", "Jane Smith"), ("3", "Jim Beam")] {
            let op = Operation::UpsertRecord(UpsertRecord {
                key: key.into(),
                name: name.into(),
                address: format!("{key}@example.com"),
            });
            store.append(&Transaction::new(Utc::now(), op)).unwrap();
        }
        store.scan().unwrap()
    }

    #[test]
    fn rebuilds_corrupted_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(&dir);
        let expected = db.read_snapshot().unwrap();

        corrupt(&db);
        assert!(db.read_snapshot().unwrap_err().is_corrupt());

        let report = db.recover().unwrap();
        assert_eq!(report.applied, 3);
        assert!(report.is_complete());
        assert_eq!(db.read_snapshot().unwrap(), expected);
    }

    #[test]
    fn rebuilds_deleted_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(&dir);
        fs::remove_file(&db.config().snapshot_path).unwrap();

        db.recover().unwrap();
        assert_eq!(db.read_snapshot().unwrap().len(), 2);
    }

    #[test]
    fn recovery_is_repeatable_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(&dir);

        db.recover().unwrap();
        let first = fs::read(&db.config().snapshot_path).unwrap();
        db.recover().unwrap();
        let second = fs::read(&db.config().snapshot_path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn discards_records_not_in_log() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(&dir);

        let mut tampered = db.read_snapshot().unwrap();
        tampered.records.insert(
            "9".into(),
            Record {
                name: "Mallory".into(),
                address: "mallory@example.com".into(),
            },
        );
        db.snapshots.write(&tampered).unwrap();

        db.recover().unwrap();
        assert!(db.read_snapshot().unwrap().get("9").is_none());
    }

    #[test]
    fn skips_damaged_entries_and_keeps_later_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = seeded(&dir);
        {
            let mut log = OpenOptions::new()
                .append(true)
                .open(&db.config().log_path)
                .unwrap();
            writeln!(log, "{{\"timestamp\": \"2024-01-01T00:00:00").unwrap();
        }
        db.upsert("3", "Jim Beam", "jim@example.com").unwrap();

        corrupt(&db);
        let report = db.recover().unwrap();

        assert_eq!(report.applied, 4);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].line, 4);
        assert!(matches!(report.skipped[0].reason, SkipReason::Malformed(_)));
        assert_eq!(db.read_snapshot().unwrap().len(), 3);
    }

    #[test]
    fn unreadable_log_leaves_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(&dir);
        fs::remove_file(&db.config().log_path).unwrap();

        let err = db.recover().unwrap_err();
        assert!(matches!(err, RecoveryError::LogUnreadable(_)), "unexpected error: {err}");
        assert_eq!(db.read_snapshot().unwrap(), Snapshot::empty());
    }

    #[test]
    fn empty_log_recovers_to_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(StoreConfig::in_dir(dir.path())).unwrap();
        corrupt(&db);

        let report = db.recover().unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(db.read_snapshot().unwrap(), Snapshot::empty());
    }

    #[test]
    fn replays_entries_without_id_or_offset() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded(&dir);
        append_lines(
            &db,
            &[
                r#"{"timestamp":"2024-01-01T10:00:00","operation":"UPSERT_RECORD","data":{"key":"3","name":"Jim Beam","address":"jim@example.com"}}"#,
                r#"{"timestamp":"2024-01-01T10:00:01.250000Z","operation":"UPSERT_RECORD","data":{"key":"2","name":"Jane S.","address":"jane2@example.com"}}"#,
            ],
        );

        corrupt(&db);
        let report = db.recover().unwrap();

        assert_eq!(report.applied, 5);
        assert!(report.is_complete());
        let snapshot = db.read_snapshot().unwrap();
        assert_eq!(snapshot.get("3").unwrap().name, "Jim Beam");
        assert_eq!(snapshot.get("2").unwrap().address, "jane2@example.com");
    }

    #[test]
    fn failed_write_mid_replay_reports_its_line() {
        // Write 1 is the reset, so write 3 belongs to the second entry.
        let snapshots = FlakySnapshots {
            fail_write: Some(3),
            ..Default::default()
        };

        let err = rebuild(&snapshots, || Ok(three_upserts())).unwrap_err();
        assert!(
            matches!(err, RecoveryError::Apply { line: 2, .. }),
            "unexpected error: {err}"
        );
        assert_eq!(snapshots.current.borrow().len(), 1);
    }

    #[test]
    fn failed_read_mid_replay_reports_its_line() {
        let snapshots = FlakySnapshots {
            fail_reads: true,
            ..Default::default()
        };

        let err = rebuild(&snapshots, || Ok(three_upserts())).unwrap_err();
        assert!(
            matches!(err, RecoveryError::Apply { line: 1, .. }),
            "unexpected error: {err}"
        );
        assert!(snapshots.current.borrow().is_empty());
    }

    #[test]
    fn failed_reset_is_reported_before_scanning() {
        let snapshots = FlakySnapshots {
            fail_write: Some(1),
            ..Default::default()
        };

        let err = rebuild(&snapshots, || panic!("scanned after failed reset")).unwrap_err();
        assert!(matches!(err, RecoveryError::Reset(_)), "unexpected error: {err}");
    }
}
