//! Raw consistency queries over the mirror.

use diesel::sql_types::BigInt;
use diesel::QueryableByName;
use diesel_async::RunQueryDsl;

use super::pool::{DbPool, DieselError};
use crate::with_conn;

/// A `(page, revision)` pair stored more than once.
#[derive(QueryableByName, Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRevisionRow {
    #[diesel(sql_type = BigInt)]
    pub page_id: i64,
    #[diesel(sql_type = BigInt)]
    pub revision_id: i64,
    #[diesel(sql_type = BigInt)]
    pub copies: i64,
}

/// Links whose source page is absent or deleted.
#[derive(QueryableByName, Debug, Clone, PartialEq, Eq)]
pub struct DanglingLinksRow {
    #[diesel(sql_type = BigInt)]
    pub source_page_id: i64,
    #[diesel(sql_type = BigInt)]
    pub link_count: i64,
}

/// A revision whose id is lower than the one preceding it in time.
#[derive(QueryableByName, Debug, Clone, PartialEq, Eq)]
pub struct OrderingRow {
    #[diesel(sql_type = BigInt)]
    pub page_id: i64,
    #[diesel(sql_type = BigInt)]
    pub revision_id: i64,
    #[diesel(sql_type = BigInt)]
    pub other_id: i64,
}

const DUPLICATE_REVISIONS: &str = "\
SELECT page_id, revision_id, COUNT(*) AS copies
FROM revisions
GROUP BY page_id, revision_id
HAVING COUNT(*) > 1
ORDER BY page_id, revision_id";

const DANGLING_LINKS: &str = "\
SELECT l.source_page_id AS source_page_id, COUNT(*) AS link_count
FROM links l
LEFT JOIN pages p ON p.page_id = l.source_page_id
WHERE p.page_id IS NULL OR p.deleted_at IS NOT NULL
GROUP BY l.source_page_id
ORDER BY l.source_page_id";

const NON_MONOTONIC: &str = "\
SELECT page_id, revision_id, prev_id AS other_id
FROM (
    SELECT page_id, revision_id,
           LAG(revision_id) OVER (PARTITION BY page_id ORDER BY timestamp, id) AS prev_id
    FROM revisions
)
WHERE prev_id IS NOT NULL AND revision_id < prev_id
ORDER BY page_id, revision_id";

const PARENT_NOT_OLDER: &str = "\
SELECT page_id, revision_id, parent_id AS other_id
FROM revisions
WHERE parent_id IS NOT NULL AND parent_id >= revision_id
ORDER BY page_id, revision_id";

/// Read-only integrity queries.
#[derive(Clone)]
pub struct IntegrityRepository {
    pool: DbPool,
}

impl IntegrityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn duplicate_revisions(&self) -> Result<Vec<DuplicateRevisionRow>, DieselError> {
        with_conn!(self.pool, conn, {
            diesel::sql_query(DUPLICATE_REVISIONS).load(&mut conn).await
        })
    }

    pub async fn dangling_links(&self) -> Result<Vec<DanglingLinksRow>, DieselError> {
        with_conn!(self.pool, conn, {
            diesel::sql_query(DANGLING_LINKS).load(&mut conn).await
        })
    }

    /// Revisions out of id order when sorted by timestamp. Gaps are fine.
    pub async fn non_monotonic_revisions(&self) -> Result<Vec<OrderingRow>, DieselError> {
        with_conn!(self.pool, conn, {
            diesel::sql_query(NON_MONOTONIC).load(&mut conn).await
        })
    }

    pub async fn parent_not_older(&self) -> Result<Vec<OrderingRow>, DieselError> {
        with_conn!(self.pool, conn, {
            diesel::sql_query(PARENT_NOT_OLDER).load(&mut conn).await
        })
    }
}
