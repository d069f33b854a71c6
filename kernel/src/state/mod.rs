// Snapshot State
//
// The materialized record set. Derivable at any point by applying the
// transaction log, in order, to the empty snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::log::{Operation, UpsertRecord};

pub mod drift;
pub mod store;

pub use store::{FileSnapshotStore, SnapshotError, SnapshotStore};

/// A stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub address: String,
}

/// Full record set, persisted as a single document.
///
/// Keys are kept ordered so two equal snapshots always serialize to the
/// same bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub records: BTreeMap<String, Record>,
}

impl Snapshot {
    /// The initial state: no records.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Apply a single operation.
    pub fn apply(&mut self, operation: &Operation) {
        match operation {
            Operation::UpsertRecord(UpsertRecord { key, name, address }) => {
                self.records.insert(
                    key.clone(),
                    Record {
                        name: name.clone(),
                        address: address.clone(),
                    },
                );
            }
        }
    }
}
