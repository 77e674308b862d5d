//! Engine errors.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::origin::OriginError;
use crate::repository::DieselError;
use crate::storage::StorageError;

/// Errors that end or scope a synchronization run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No successful run or baseline exists to measure changes against.
    #[error("No successful run recorded; register a full mirror with `wikisync baseline` first")]
    FirstRunRequiresFullScrape,

    #[error("Run {run_id} is still running (started {started_at})")]
    RunInProgress {
        run_id: String,
        started_at: DateTime<Utc>,
    },

    #[error("Checkpoint is corrupt: {0}")]
    CorruptCheckpoint(String),

    #[error("Change feed unavailable: {0}")]
    ChangeFeed(#[source] OriginError),

    #[error("Origin error: {0}")]
    Origin(#[from] OriginError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DieselError),

    #[error("Run cancelled")]
    Cancelled,
}
