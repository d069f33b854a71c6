// Consistency Check (Dry-Run)
//
// Runs log → replay → drift without writing anything:
// the snapshot the log implies is compared with the one on disk.

use serde::Serialize;

use crate::db::Database;
use crate::log::LogError;
use crate::replay::{replay, ReplaySummary};
use crate::state::drift::{detect_drift, DriftFinding, DriftReport, DriftSeverity, DriftType};
use crate::state::{Snapshot, SnapshotError, SnapshotStore};

/// Result of a verification run.
#[derive(Debug, Serialize)]
pub struct VerifyResult {
    pub expected: Snapshot,
    pub replay: ReplaySummary,
    pub drift_report: DriftReport,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("transaction log unreadable: {0}")]
    Log(#[from] LogError),

    #[error(transparent)]
    Snapshot(SnapshotError),
}

impl Database {
    /// Compare the persisted snapshot with a fresh in-memory replay.
    ///
    /// Side-effect free and safe to run at any time.
    pub fn verify(&self) -> Result<VerifyResult, VerifyError> {
        let entries = self.log.scan()?;
        let (expected, summary) = replay(&entries);

        let mut drift_report = match self.snapshots.read() {
            Ok(actual) => detect_drift(&expected, &actual),
            Err(e @ SnapshotError::Corrupt { .. }) => DriftReport {
                findings: vec![DriftFinding {
                    drift_type: DriftType::SnapshotCorrupt,
                    severity: DriftSeverity::Critical,
                    key: None,
                    message: e.to_string(),
                }],
            },
            Err(e) => return Err(VerifyError::Snapshot(e)),
        };

        for skipped in &summary.skipped {
            drift_report.push(DriftFinding {
                drift_type: DriftType::SkippedEntry,
                severity: DriftSeverity::Info,
                key: None,
                message: format!("log line {}: {}", skipped.line, skipped.reason),
            });
        }

        Ok(VerifyResult {
            expected,
            replay: summary,
            drift_report,
        })
    }
}
