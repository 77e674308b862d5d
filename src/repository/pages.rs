//! Page repository.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::models::{NewPageRow, PageRow};
use super::format_datetime;
use super::pool::{DbPool, DieselError, SqliteConn};
use super::util::BATCH_SIZE;
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{Page, PageId};
use crate::schema::{links, pages};
use crate::with_conn;

impl From<PageRow> for Page {
    fn from(row: PageRow) -> Self {
        Page {
            page_id: row.page_id,
            namespace: row.namespace,
            title: row.title,
            latest_revision_id: row.latest_revision_id,
            created_at: parse_datetime(&row.created_at),
            updated_at: parse_datetime(&row.updated_at),
            deleted_at: parse_datetime_opt(row.deleted_at),
        }
    }
}

/// Diesel-based page repository.
#[derive(Clone)]
pub struct PageRepository {
    pool: DbPool,
}

impl PageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, page_id: PageId) -> Result<Option<Page>, DieselError> {
        with_conn!(self.pool, conn, {
            pages::table
                .find(page_id)
                .first::<PageRow>(&mut conn)
                .await
                .optional()
                .map(|opt| opt.map(Page::from))
        })
    }

    /// Which of `ids` have a live (not deleted) page row, in batches of [`BATCH_SIZE`].
    pub async fn live_ids(&self, ids: &[PageId]) -> Result<HashSet<PageId>, DieselError> {
        self.select_ids(ids, true).await
    }

    /// Which of `ids` have any page row, deleted or not.
    pub async fn mirrored_ids(&self, ids: &[PageId]) -> Result<HashSet<PageId>, DieselError> {
        self.select_ids(ids, false).await
    }

    async fn select_ids(
        &self,
        ids: &[PageId],
        live_only: bool,
    ) -> Result<HashSet<PageId>, DieselError> {
        let mut found = HashSet::new();
        if ids.is_empty() {
            return Ok(found);
        }
        with_conn!(self.pool, conn, {
            for chunk in ids.chunks(BATCH_SIZE) {
                let mut query = pages::table
                    .filter(pages::page_id.eq_any(chunk))
                    .select(pages::page_id)
                    .into_boxed();
                if live_only {
                    query = query.filter(pages::deleted_at.is_null());
                }
                let rows: Vec<i64> = query.load(&mut conn).await?;
                found.extend(rows);
            }
            Ok(found)
        })
    }

    /// Insert or update a page row.
    pub async fn upsert(&self, page: &Page) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, { upsert_page(&mut conn, page).await })
    }

    /// Rename a page after a move. Returns false if the page is not mirrored.
    pub async fn rename(
        &self,
        page_id: PageId,
        namespace: i32,
        title: &str,
    ) -> Result<bool, DieselError> {
        let now = format_datetime(&Utc::now());
        with_conn!(self.pool, conn, {
            let rows = diesel::update(pages::table.find(page_id))
                .set((
                    pages::namespace.eq(namespace),
                    pages::title.eq(title),
                    pages::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
            Ok(rows > 0)
        })
    }

    /// Stamp a page as deleted and drop its outbound links in one transaction.
    ///
    /// An existing deletion stamp is kept. Returns false if the page is not mirrored.
    pub async fn mark_deleted(
        &self,
        page_id: PageId,
        at: DateTime<Utc>,
    ) -> Result<bool, DieselError> {
        let at = format_datetime(&at);
        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let rows = diesel::update(
                        pages::table
                            .find(page_id)
                            .filter(pages::deleted_at.is_null()),
                    )
                    .set((pages::deleted_at.eq(&at), pages::updated_at.eq(&at)))
                    .execute(conn)
                    .await?;
                    diesel::delete(links::table.filter(links::source_page_id.eq(page_id)))
                        .execute(conn)
                        .await?;
                    let exists: i64 = pages::table
                        .filter(pages::page_id.eq(page_id))
                        .count()
                        .get_result(conn)
                        .await?;
                    Ok(rows > 0 || exists > 0)
                })
            })
            .await
        })
    }

    /// Count live (not deleted) pages.
    pub async fn count_live(&self) -> Result<u64, DieselError> {
        use diesel::dsl::count_star;
        with_conn!(self.pool, conn, {
            let count: i64 = pages::table
                .filter(pages::deleted_at.is_null())
                .select(count_star())
                .first(&mut conn)
                .await?;
            Ok(count as u64)
        })
    }
}

/// Upsert a page on an open connection so callers can join a transaction.
pub(crate) async fn upsert_page(conn: &mut SqliteConn, page: &Page) -> Result<(), DieselError> {
    let created_at = format_datetime(&page.created_at);
    let updated_at = format_datetime(&page.updated_at);
    let deleted_at = page.deleted_at.map(|dt| format_datetime(&dt));

    let row = NewPageRow {
        page_id: page.page_id,
        namespace: page.namespace,
        title: &page.title,
        latest_revision_id: page.latest_revision_id,
        created_at: &created_at,
        updated_at: &updated_at,
        deleted_at: deleted_at.as_deref(),
    };

    diesel::insert_into(pages::table)
        .values(&row)
        .on_conflict(pages::page_id)
        .do_update()
        .set((
            pages::namespace.eq(page.namespace),
            pages::title.eq(&page.title),
            pages::updated_at.eq(&updated_at),
            pages::deleted_at.eq(deleted_at.as_deref()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}
