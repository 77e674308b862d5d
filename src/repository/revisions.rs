//! Revision repository.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::debug;

use super::models::{NewRevisionRow, RevisionRow};
use super::pages::upsert_page;
use super::format_datetime;
use super::pool::{DbPool, DieselError};
use super::util::{json_error, BATCH_SIZE};
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{Page, PageId, RevisionId, RevisionRecord, UpdateInfo};
use crate::schema::{pages, revisions};
use crate::with_conn;

impl TryFrom<RevisionRow> for RevisionRecord {
    type Error = diesel::result::Error;

    fn try_from(row: RevisionRow) -> Result<Self, Self::Error> {
        let tags = serde_json::from_str(&row.tags).map_err(|e| json_error("tags", e))?;
        Ok(RevisionRecord {
            revision_id: row.revision_id,
            page_id: row.page_id,
            parent_id: row.parent_id,
            timestamp: parse_datetime(&row.timestamp),
            user_id: row.user_id,
            user_name: row.user_name,
            comment: row.comment,
            content: row.content,
            content_hash: row.content_hash,
            size: row.size.max(0) as u64,
            minor: row.minor != 0,
            tags,
        })
    }
}

/// Outcome of a per-page revision insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    /// Revisions skipped because their id was already mirrored.
    pub duplicates: usize,
}

/// Diesel-based revision repository.
#[derive(Clone)]
pub struct RevisionRepository {
    pool: DbPool,
}

impl RevisionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// High-water marks for `page_ids` from one aggregate query per batch.
    ///
    /// Pages with no mirrored revisions are absent from the result.
    pub async fn update_info(
        &self,
        page_ids: &[PageId],
    ) -> Result<HashMap<PageId, UpdateInfo>, DieselError> {
        use diesel::dsl::{count_star, max};

        let mut infos = HashMap::new();
        if page_ids.is_empty() {
            return Ok(infos);
        }
        with_conn!(self.pool, conn, {
            for chunk in page_ids.chunks(BATCH_SIZE) {
                let rows: Vec<(i64, Option<i64>, Option<String>, i64)> = revisions::table
                    .filter(revisions::page_id.eq_any(chunk))
                    .group_by(revisions::page_id)
                    .select((
                        revisions::page_id,
                        max(revisions::revision_id),
                        max(revisions::timestamp),
                        count_star(),
                    ))
                    .load(&mut conn)
                    .await?;

                for (page_id, highest, highest_at, count) in rows {
                    infos.insert(
                        page_id,
                        UpdateInfo {
                            page_id,
                            highest_revision_id: highest,
                            highest_revision_at: parse_datetime_opt(highest_at),
                            revision_count: count.max(0) as u64,
                        },
                    );
                }
            }
            Ok(infos)
        })
    }

    /// Revision ids already mirrored for one page.
    pub async fn known_ids(&self, page_id: PageId) -> Result<HashSet<RevisionId>, DieselError> {
        with_conn!(self.pool, conn, {
            let ids: Vec<i64> = revisions::table
                .filter(revisions::page_id.eq(page_id))
                .select(revisions::revision_id)
                .load(&mut conn)
                .await?;
            Ok(ids.into_iter().collect())
        })
    }

    /// Insert fetched revisions for one page in a single transaction.
    ///
    /// When `page` is given its row is upserted in the same transaction.
    /// Ids already present mirror-wide are discarded, as are repeats within
    /// `records`. The page's `latest_revision_id` is advanced to the highest
    /// mirrored id.
    pub async fn insert_for_page(
        &self,
        page_id: PageId,
        page: Option<&Page>,
        records: &[RevisionRecord],
    ) -> Result<InsertOutcome, DieselError> {
        let inserted_at = format_datetime(&Utc::now());
        let fetched: Vec<i64> = records.iter().map(|r| r.revision_id).collect();

        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    if let Some(page) = page {
                        upsert_page(conn, page).await?;
                    }

                    let mut known: HashSet<i64> = HashSet::new();
                    for chunk in fetched.chunks(BATCH_SIZE) {
                        let ids: Vec<i64> = revisions::table
                            .filter(revisions::revision_id.eq_any(chunk))
                            .select(revisions::revision_id)
                            .load(conn)
                            .await?;
                        known.extend(ids);
                    }

                    let mut outcome = InsertOutcome::default();
                    let mut rows = Vec::with_capacity(records.len());
                    for record in records {
                        if !known.insert(record.revision_id) {
                            debug!(
                                "Discarding duplicate revision {} for page {}",
                                record.revision_id, page_id
                            );
                            outcome.duplicates += 1;
                            continue;
                        }
                        rows.push(NewRevisionRow {
                            revision_id: record.revision_id,
                            page_id,
                            parent_id: record.parent_id,
                            timestamp: format_datetime(&record.timestamp),
                            user_id: record.user_id,
                            user_name: record.user_name.as_deref(),
                            comment: record.comment.as_deref(),
                            content: record.content.as_deref(),
                            content_hash: &record.content_hash,
                            size: record.size as i64,
                            minor: i32::from(record.minor),
                            tags: serde_json::to_string(&record.tags)
                                .unwrap_or_else(|_| "[]".to_string()),
                            inserted_at: &inserted_at,
                        });
                    }

                    // SyncConnectionWrapper lacks diesel's SQLite multi-row
                    // insert support, so rows go one statement at a time
                    // inside the enclosing transaction.
                    for chunk in rows.chunks(BATCH_SIZE) {
                        for row in chunk {
                            outcome.inserted += diesel::insert_into(revisions::table)
                                .values(row)
                                .execute(conn)
                                .await?;
                        }
                    }

                    let latest: Option<i64> = revisions::table
                        .filter(revisions::page_id.eq(page_id))
                        .select(diesel::dsl::max(revisions::revision_id))
                        .first(conn)
                        .await?;
                    diesel::update(pages::table.find(page_id))
                        .set((
                            pages::latest_revision_id.eq(latest),
                            pages::updated_at.eq(&inserted_at),
                        ))
                        .execute(conn)
                        .await?;

                    Ok(outcome)
                })
            })
            .await
        })
    }

    /// All revisions of a page, ascending by revision id.
    pub async fn for_page(&self, page_id: PageId) -> Result<Vec<RevisionRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            revisions::table
                .filter(revisions::page_id.eq(page_id))
                .order((revisions::revision_id.asc(), revisions::id.asc()))
                .select(RevisionRow::as_select())
                .load::<RevisionRow>(&mut conn)
                .await
                .and_then(|rows| rows.into_iter().map(RevisionRecord::try_from).collect())
        })
    }

    /// Body of the newest mirrored revision of a page.
    pub async fn latest_content(&self, page_id: PageId) -> Result<Option<String>, DieselError> {
        with_conn!(self.pool, conn, {
            let content: Option<Option<String>> = revisions::table
                .filter(revisions::page_id.eq(page_id))
                .order(revisions::revision_id.desc())
                .select(revisions::content)
                .first(&mut conn)
                .await
                .optional()?;
            Ok(content.flatten())
        })
    }

    pub async fn count(&self) -> Result<u64, DieselError> {
        use diesel::dsl::count_star;
        with_conn!(self.pool, conn, {
            let count: i64 = revisions::table
                .select(count_star())
                .first(&mut conn)
                .await?;
            Ok(count as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{revision, setup_test_db};

    #[tokio::test]
    async fn test_insert_suppresses_duplicates() {
        let (ctx, _dir) = setup_test_db().await;
        let repo = ctx.revisions();
        let page = Page::new(1, 0, "Alpha");

        let first = repo
            .insert_for_page(1, Some(&page), &[revision(1, 10, None), revision(1, 11, Some(10))])
            .await
            .unwrap();
        assert_eq!(first, InsertOutcome { inserted: 2, duplicates: 0 });

        let second = repo
            .insert_for_page(
                1,
                None,
                &[revision(1, 11, Some(10)), revision(1, 12, Some(11)), revision(1, 12, Some(11))],
            )
            .await
            .unwrap();
        assert_eq!(second, InsertOutcome { inserted: 1, duplicates: 2 });

        assert_eq!(repo.count().await.unwrap(), 3);
        let stored = ctx.pages().get(1).await.unwrap().unwrap();
        assert_eq!(stored.latest_revision_id, Some(12));
    }

    #[tokio::test]
    async fn test_update_info_aggregates_per_page() {
        let (ctx, _dir) = setup_test_db().await;
        let repo = ctx.revisions();

        repo.insert_for_page(
            1,
            Some(&Page::new(1, 0, "A")),
            &[revision(1, 5, None), revision(1, 9, Some(5))],
        )
        .await
        .unwrap();
        repo.insert_for_page(2, Some(&Page::new(2, 0, "B")), &[revision(2, 7, None)])
            .await
            .unwrap();

        let infos = repo.update_info(&[1, 2, 3]).await.unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[&1].highest_revision_id, Some(9));
        assert_eq!(infos[&1].revision_count, 2);
        assert!(infos[&1].highest_revision_at.is_some());
        assert_eq!(infos[&2].highest_revision_id, Some(7));
        assert!(!infos.contains_key(&3));
    }

    #[tokio::test]
    async fn test_round_trip_fields_and_latest_content() {
        let (ctx, _dir) = setup_test_db().await;
        let repo = ctx.revisions();

        let mut rev = revision(4, 40, None);
        rev.tags = vec!["mobile edit".to_string()];
        rev.minor = true;
        let mut newer = revision(4, 41, Some(40));
        newer.content = Some("[[Target]]".to_string());
        repo.insert_for_page(4, Some(&Page::new(4, 0, "D")), &[rev.clone(), newer])
            .await
            .unwrap();

        let stored = repo.for_page(4).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0], rev);
        assert_eq!(
            repo.latest_content(4).await.unwrap().as_deref(),
            Some("[[Target]]")
        );
        assert_eq!(repo.latest_content(5).await.unwrap(), None);
        assert_eq!(repo.known_ids(4).await.unwrap(), HashSet::from([40, 41]));
    }
}
