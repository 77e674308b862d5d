//! Scrape run ledger.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use super::SyncError;
use crate::models::{RunStatus, ScrapeRun};
use crate::repository::ScrapeRunRepository;

/// Append-only record of synchronization attempts.
#[derive(Clone)]
pub struct ScrapeRunLedger {
    repo: ScrapeRunRepository,
    stale_after: Duration,
}

impl ScrapeRunLedger {
    pub fn new(repo: ScrapeRunRepository, stale_after: Duration) -> Self {
        Self { repo, stale_after }
    }

    /// The latest successful run or baseline, if any.
    pub async fn last_success(&self) -> Result<Option<ScrapeRun>, SyncError> {
        Ok(self.repo.last_success().await?)
    }

    /// Open a new running record.
    ///
    /// Abandoned runs are closed as interrupted first. Any remaining
    /// running record blocks the open.
    pub async fn open(&self, resumed_from: Option<String>) -> Result<ScrapeRun, SyncError> {
        for stale in self.repo.close_stale(self.stale_after).await? {
            warn!(
                "Closed abandoned run {} (last heartbeat {})",
                stale.id, stale.heartbeat_at
            );
        }

        let run = ScrapeRun::start_incremental(resumed_from);
        if let Some(blocking) = self.repo.try_open(&run).await? {
            return Err(SyncError::RunInProgress {
                run_id: blocking.id,
                started_at: blocking.started_at,
            });
        }

        info!("Opened run {}", run.id);
        Ok(run)
    }

    /// Persist counters and failures of a running record.
    pub async fn save(&self, run: &ScrapeRun) -> Result<(), SyncError> {
        self.repo.save(run).await?;
        Ok(())
    }

    pub async fn heartbeat(&self, run: &mut ScrapeRun) -> Result<(), SyncError> {
        let now = Utc::now();
        run.heartbeat_at = now;
        self.repo.heartbeat(&run.id, now).await?;
        Ok(())
    }

    /// Close `run` with its final status. Closing twice is a no-op.
    pub async fn close(
        &self,
        run: &mut ScrapeRun,
        status: RunStatus,
        error_summary: Option<String>,
    ) -> Result<(), SyncError> {
        run.close(status, error_summary);
        self.repo.save(run).await?;
        info!("Closed run {} as {}", run.id, run.status.as_str());
        Ok(())
    }

    /// Register a full mirror produced outside the engine as of `at`.
    pub async fn record_baseline(&self, at: DateTime<Utc>) -> Result<ScrapeRun, SyncError> {
        if let Some(running) = self.repo.running().await?.into_iter().next() {
            return Err(SyncError::RunInProgress {
                run_id: running.id,
                started_at: running.started_at,
            });
        }
        let run = ScrapeRun::baseline(at);
        self.repo.insert(&run).await?;
        info!("Recorded baseline {} at {}", run.id, at);
        Ok(run)
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<ScrapeRun>, SyncError> {
        Ok(self.repo.recent(limit).await?)
    }
}
