//! Scrape run ledger repository.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::models::ScrapeRunRow;
use super::format_datetime;
use super::pool::{DbPool, DieselError};
use super::util::{enum_error, json_error};
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{RunMode, RunStatus, ScrapeRun};
use crate::schema::scrape_runs;
use crate::with_conn;

impl TryFrom<ScrapeRunRow> for ScrapeRun {
    type Error = diesel::result::Error;

    fn try_from(row: ScrapeRunRow) -> Result<Self, Self::Error> {
        Ok(ScrapeRun {
            mode: RunMode::from_str(&row.mode).ok_or_else(|| enum_error("run mode", &row.mode))?,
            status: RunStatus::from_str(&row.status)
                .ok_or_else(|| enum_error("run status", &row.status))?,
            started_at: parse_datetime(&row.started_at),
            finished_at: parse_datetime_opt(row.finished_at),
            heartbeat_at: parse_datetime(&row.heartbeat_at),
            window_start: parse_datetime_opt(row.window_start),
            window_end: parse_datetime_opt(row.window_end),
            host: row.host,
            resumed_from: row.resumed_from,
            counts: serde_json::from_str(&row.counts).map_err(|e| json_error("counts", e))?,
            failures: serde_json::from_str(&row.failures).map_err(|e| json_error("failures", e))?,
            error_summary: row.error_summary,
            integrity: serde_json::from_str(&row.integrity)
                .map_err(|e| json_error("integrity", e))?,
            carry_over: serde_json::from_str(&row.carry_over)
                .map_err(|e| json_error("carry_over", e))?,
            id: row.id,
        })
    }
}

impl From<&ScrapeRun> for ScrapeRunRow {
    fn from(run: &ScrapeRun) -> Self {
        ScrapeRunRow {
            id: run.id.clone(),
            mode: run.mode.as_str().to_string(),
            status: run.status.as_str().to_string(),
            started_at: format_datetime(&run.started_at),
            finished_at: run.finished_at.map(|dt| format_datetime(&dt)),
            heartbeat_at: format_datetime(&run.heartbeat_at),
            window_start: run.window_start.map(|dt| format_datetime(&dt)),
            window_end: run.window_end.map(|dt| format_datetime(&dt)),
            host: run.host.clone(),
            resumed_from: run.resumed_from.clone(),
            counts: serde_json::to_string(&run.counts).unwrap_or_else(|_| "{}".to_string()),
            failures: serde_json::to_string(&run.failures).unwrap_or_else(|_| "[]".to_string()),
            error_summary: run.error_summary.clone(),
            integrity: serde_json::to_string(&run.integrity).unwrap_or_else(|_| "[]".to_string()),
            carry_over: serde_json::to_string(&run.carry_over)
                .unwrap_or_else(|_| "{}".to_string()),
        }
    }
}

/// Diesel-based scrape run repository. Rows are append-only once closed.
#[derive(Clone)]
pub struct ScrapeRunRepository {
    pool: DbPool,
}

impl ScrapeRunRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<Option<ScrapeRun>, DieselError> {
        with_conn!(self.pool, conn, {
            scrape_runs::table
                .find(id)
                .select(ScrapeRunRow::as_select())
                .first::<ScrapeRunRow>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(ScrapeRun::try_from).transpose())
        })
    }

    /// Insert a closed or running record.
    pub async fn insert(&self, run: &ScrapeRun) -> Result<(), DieselError> {
        let row = ScrapeRunRow::from(run);
        with_conn!(self.pool, conn, {
            diesel::insert_into(scrape_runs::table)
                .values(&row)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Insert `run` unless another run is already `running`.
    ///
    /// Returns the blocking run when the insert was refused.
    pub async fn try_open(&self, run: &ScrapeRun) -> Result<Option<ScrapeRun>, DieselError> {
        let row = ScrapeRunRow::from(run);
        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let blocking = scrape_runs::table
                        .filter(scrape_runs::status.eq(RunStatus::Running.as_str()))
                        .select(ScrapeRunRow::as_select())
                        .first::<ScrapeRunRow>(conn)
                        .await
                        .optional()?;
                    if let Some(blocking) = blocking {
                        return ScrapeRun::try_from(blocking).map(Some);
                    }
                    diesel::insert_into(scrape_runs::table)
                        .values(&row)
                        .execute(conn)
                        .await?;
                    Ok(None)
                })
            })
            .await
        })
    }

    /// Write the full record. Closed rows are never rewritten.
    pub async fn save(&self, run: &ScrapeRun) -> Result<bool, DieselError> {
        let row = ScrapeRunRow::from(run);
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                scrape_runs::table
                    .find(&run.id)
                    .filter(scrape_runs::status.eq(RunStatus::Running.as_str())),
            )
            .set(&row)
            .execute(&mut conn)
            .await?;
            Ok(rows > 0)
        })
    }

    /// Refresh the heartbeat of a running record.
    pub async fn heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<(), DieselError> {
        let at = format_datetime(&at);
        with_conn!(self.pool, conn, {
            diesel::update(
                scrape_runs::table
                    .find(id)
                    .filter(scrape_runs::status.eq(RunStatus::Running.as_str())),
            )
            .set(scrape_runs::heartbeat_at.eq(&at))
            .execute(&mut conn)
            .await?;
            Ok(())
        })
    }

    /// The successful run with the latest window end, baselines included.
    pub async fn last_success(&self) -> Result<Option<ScrapeRun>, DieselError> {
        with_conn!(self.pool, conn, {
            scrape_runs::table
                .filter(scrape_runs::status.eq(RunStatus::Success.as_str()))
                .filter(scrape_runs::window_end.is_not_null())
                .order(scrape_runs::window_end.desc())
                .select(ScrapeRunRow::as_select())
                .first::<ScrapeRunRow>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(ScrapeRun::try_from).transpose())
        })
    }

    pub async fn running(&self) -> Result<Vec<ScrapeRun>, DieselError> {
        with_conn!(self.pool, conn, {
            scrape_runs::table
                .filter(scrape_runs::status.eq(RunStatus::Running.as_str()))
                .order(scrape_runs::started_at.asc())
                .select(ScrapeRunRow::as_select())
                .load::<ScrapeRunRow>(&mut conn)
                .await
                .and_then(|rows| rows.into_iter().map(ScrapeRun::try_from).collect())
        })
    }

    /// Most recent runs first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<ScrapeRun>, DieselError> {
        with_conn!(self.pool, conn, {
            scrape_runs::table
                .order(scrape_runs::started_at.desc())
                .limit(limit)
                .select(ScrapeRunRow::as_select())
                .load::<ScrapeRunRow>(&mut conn)
                .await
                .and_then(|rows| rows.into_iter().map(ScrapeRun::try_from).collect())
        })
    }

    /// Close `running` records whose heartbeat is older than `threshold` as interrupted.
    pub async fn close_stale(&self, threshold: Duration) -> Result<Vec<ScrapeRun>, DieselError> {
        let now = Utc::now();
        let mut closed = Vec::new();
        for mut run in self.running().await? {
            if !run.is_stale(now, threshold) {
                continue;
            }
            let summary = format!(
                "abandoned: no heartbeat since {}",
                format_datetime(&run.heartbeat_at)
            );
            run.close(RunStatus::Interrupted, Some(summary));
            if self.save(&run).await? {
                closed.push(run);
            }
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityFailure, RunCounts, SyncPhase};
    use crate::repository::test_support::setup_test_db;

    #[tokio::test]
    async fn test_try_open_refuses_second_running() {
        let (ctx, _dir) = setup_test_db().await;
        let repo = ctx.scrape_runs();

        let first = ScrapeRun::start_incremental(None);
        assert!(repo.try_open(&first).await.unwrap().is_none());

        let second = ScrapeRun::start_incremental(None);
        let blocking = repo.try_open(&second).await.unwrap().unwrap();
        assert_eq!(blocking.id, first.id);
        assert!(repo.get(&second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_persists_counts_and_is_final() {
        let (ctx, _dir) = setup_test_db().await;
        let repo = ctx.scrape_runs();

        let mut run = ScrapeRun::start_incremental(None);
        repo.insert(&run).await.unwrap();

        run.counts = RunCounts {
            new_pages: 1,
            revisions_added: 4,
            ..RunCounts::default()
        };
        run.failures.push(EntityFailure {
            entity: "7".to_string(),
            phase: SyncPhase::FetchingRevisions,
            error: "timeout".to_string(),
        });
        run.close(RunStatus::Success, None);
        assert!(repo.save(&run).await.unwrap());

        let stored = repo.get(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Success);
        assert_eq!(stored.counts.revisions_added, 4);
        assert_eq!(stored.failures.len(), 1);

        run.status = RunStatus::Failed;
        assert!(!repo.save(&run).await.unwrap());
        let stored = repo.get(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_last_success_uses_latest_window() {
        let (ctx, _dir) = setup_test_db().await;
        let repo = ctx.scrape_runs();
        assert!(repo.last_success().await.unwrap().is_none());

        let t0 = Utc::now() - Duration::days(2);
        let t1 = Utc::now() - Duration::days(1);
        repo.insert(&ScrapeRun::baseline(t0)).await.unwrap();

        let mut incremental = ScrapeRun::start_incremental(None);
        incremental.window_start = Some(t0);
        incremental.window_end = Some(t1);
        incremental.close(RunStatus::Success, None);
        repo.insert(&incremental).await.unwrap();

        let mut failed = ScrapeRun::start_incremental(None);
        failed.window_end = Some(Utc::now());
        failed.close(RunStatus::Failed, Some("boom".to_string()));
        repo.insert(&failed).await.unwrap();

        let last = repo.last_success().await.unwrap().unwrap();
        assert_eq!(last.id, incremental.id);
        assert_eq!(repo.recent(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_close_stale() {
        let (ctx, _dir) = setup_test_db().await;
        let repo = ctx.scrape_runs();

        let mut stale = ScrapeRun::start_incremental(None);
        stale.heartbeat_at = Utc::now() - Duration::hours(2);
        repo.insert(&stale).await.unwrap();

        let closed = repo.close_stale(Duration::minutes(30)).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status, RunStatus::Interrupted);
        assert!(repo.running().await.unwrap().is_empty());

        let fresh = ScrapeRun::start_incremental(None);
        repo.insert(&fresh).await.unwrap();
        assert!(repo.close_stale(Duration::minutes(30)).await.unwrap().is_empty());
        assert_eq!(repo.running().await.unwrap().len(), 1);
    }
}
