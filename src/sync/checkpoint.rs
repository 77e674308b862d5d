//! Durable resume position.

use chrono::Utc;

use super::{RunContext, ScrapeRunLedger, SyncError};
use crate::models::CheckpointState;
use crate::repository::{CheckpointRepository, DieselError};

/// Persists the run context's checkpoint and keeps the ledger heartbeat fresh.
#[derive(Clone)]
pub struct CheckpointStore {
    repo: CheckpointRepository,
    ledger: ScrapeRunLedger,
}

impl CheckpointStore {
    pub fn new(repo: CheckpointRepository, ledger: ScrapeRunLedger) -> Self {
        Self { repo, ledger }
    }

    /// The checkpoint of an unfinished run, if any.
    pub async fn load(&self) -> Result<Option<CheckpointState>, SyncError> {
        match self.repo.load().await {
            Ok(state) => Ok(state),
            Err(DieselError::DeserializationError(e)) => {
                Err(SyncError::CorruptCheckpoint(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the context's checkpoint and heartbeat its run.
    pub async fn save(&self, ctx: &mut RunContext) -> Result<(), SyncError> {
        ctx.checkpoint.updated_at = Utc::now();
        self.repo.save(&ctx.checkpoint).await?;
        self.ledger.heartbeat(&mut ctx.run).await
    }

    /// Drop the checkpoint. Returns whether one existed.
    pub async fn clear(&self) -> Result<bool, SyncError> {
        Ok(self.repo.clear().await?)
    }
}
