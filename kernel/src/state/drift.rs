// Drift Detection & Classification
//
// Compares the snapshot derived from replaying the log (expected) with
// the persisted snapshot (actual) and classifies every difference.

use serde::Serialize;

use crate::state::Snapshot;

/// Severity of detected drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum DriftSeverity {
    /// Informational drift (no immediate risk).
    Info,

    /// The snapshot lags the log. `recover` repairs it.
    Warning,

    /// The snapshot cannot be trusted at all.
    Critical,
}

/// Types of drift that can occur.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DriftType {
    /// Persisted document does not parse.
    SnapshotCorrupt,
    /// Logged record absent from the snapshot.
    MissingRecord,
    /// Snapshot holds an older value than the log.
    StaleRecord,
    /// Snapshot holds a record the log never wrote.
    UnexpectedRecord,
    /// Log entry that replay had to skip.
    SkippedEntry,
}

/// A single drift finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftFinding {
    pub drift_type: DriftType,
    pub severity: DriftSeverity,
    pub key: Option<String>,
    pub message: String,
}

/// Full drift report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub findings: Vec<DriftFinding>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn highest_severity(&self) -> Option<DriftSeverity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    pub fn push(&mut self, finding: DriftFinding) {
        self.findings.push(finding);
    }
}

/// Detect and classify drift between expected and actual snapshots.
pub fn detect_drift(expected: &Snapshot, actual: &Snapshot) -> DriftReport {
    let mut report = DriftReport::default();

    for (key, record) in &expected.records {
        match actual.get(key) {
            None => report.push(DriftFinding {
                drift_type: DriftType::MissingRecord,
                severity: DriftSeverity::Warning,
                key: Some(key.clone()),
                message: format!("record `{key}` is logged but missing from the snapshot"),
            }),
            Some(found) if found != record => report.push(DriftFinding {
                drift_type: DriftType::StaleRecord,
                severity: DriftSeverity::Warning,
                key: Some(key.clone()),
                message: format!("record `{key}` differs from its last logged value"),
            }),
            Some(_) => {}
        }
    }

    for key in actual.records.keys() {
        if !expected.records.contains_key(key) {
            report.push(DriftFinding {
                drift_type: DriftType::UnexpectedRecord,
                severity: DriftSeverity::Critical,
                key: Some(key.clone()),
                message: format!("record `{key}` has no transaction in the log"),
            });
        }
    }

    report
}
