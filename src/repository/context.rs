//! Database context for repository access.

use std::path::Path;

use diesel::QueryableByName;
use diesel_async::RunQueryDsl;

use super::checkpoints::CheckpointRepository;
use super::files::FileRepository;
use super::integrity::IntegrityRepository;
use super::links::LinkRepository;
use super::pages::PageRepository;
use super::pool::{DbPool, DieselError};
use super::revisions::RevisionRepository;
use super::scrape_runs::ScrapeRunRepository;
use crate::with_conn;

/// Owns the connection factory and hands out repositories.
///
/// Create one context per command, then use it to access all repositories.
///
/// # Example
/// ```ignore
/// let ctx = DbContext::from_sqlite_path(&settings.database_path());
/// let last = ctx.scrape_runs().last_success().await?;
/// ```
#[derive(Clone)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    pub fn from_sqlite_path(db_path: &Path) -> Self {
        Self {
            pool: DbPool::from_path(db_path),
        }
    }

    pub fn with_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn pages(&self) -> PageRepository {
        PageRepository::new(self.pool.clone())
    }

    pub fn revisions(&self) -> RevisionRepository {
        RevisionRepository::new(self.pool.clone())
    }

    pub fn files(&self) -> FileRepository {
        FileRepository::new(self.pool.clone())
    }

    pub fn links(&self) -> LinkRepository {
        LinkRepository::new(self.pool.clone())
    }

    pub fn scrape_runs(&self) -> ScrapeRunRepository {
        ScrapeRunRepository::new(self.pool.clone())
    }

    pub fn checkpoints(&self) -> CheckpointRepository {
        CheckpointRepository::new(self.pool.clone())
    }

    pub fn integrity(&self) -> IntegrityRepository {
        IntegrityRepository::new(self.pool.clone())
    }

    /// Test that the database connection works.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn test_connection(&self) -> Result<(), DieselError> {
        with_conn!(self.pool, _conn, Ok(()))
    }

    /// User tables in the database, sorted by name.
    pub async fn list_tables(&self) -> Result<Vec<String>, DieselError> {
        #[derive(QueryableByName)]
        struct TableName {
            #[diesel(sql_type = diesel::sql_types::Text)]
            name: String,
        }

        with_conn!(self.pool, conn, {
            let rows: Vec<TableName> = diesel::sql_query(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .load(&mut conn)
            .await?;
            Ok(rows.into_iter().map(|r| r.name).collect())
        })
    }
}
