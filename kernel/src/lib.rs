// Scribe Kernel
//
// Write-ahead logged record store: every mutation is logged before it is
// applied, and the snapshot can always be rebuilt by replaying the log.

pub mod config;
pub mod db;
pub mod log;
pub mod recovery;
pub mod replay;
pub mod state;
pub mod verify;

pub use config::StoreConfig;
pub use db::{Database, DbError};
pub use recovery::{RecoveryError, RecoveryReport};
pub use state::{Record, Snapshot, SnapshotError};
