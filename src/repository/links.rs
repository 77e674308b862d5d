//! Outbound link repository.

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::models::LinkRow;
use super::pool::{DbPool, DieselError};
use super::util::{enum_error, BATCH_SIZE};
use crate::models::{LinkKind, LinkRecord, PageId};
use crate::schema::links;
use crate::with_conn;

impl TryFrom<LinkRow> for LinkRecord {
    type Error = diesel::result::Error;

    fn try_from(row: LinkRow) -> Result<Self, Self::Error> {
        let kind = LinkKind::from_str(&row.kind).ok_or_else(|| enum_error("link kind", &row.kind))?;
        Ok(LinkRecord::new(row.source_page_id, row.target_title, kind))
    }
}

impl From<&LinkRecord> for LinkRow {
    fn from(link: &LinkRecord) -> Self {
        LinkRow {
            source_page_id: link.source_page_id,
            target_title: link.target_title.clone(),
            kind: link.kind.as_str().to_string(),
        }
    }
}

/// Diesel-based link repository.
#[derive(Clone)]
pub struct LinkRepository {
    pool: DbPool,
}

impl LinkRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Links whose source is `page_id`, ordered by kind then target.
    pub async fn for_source(&self, page_id: PageId) -> Result<Vec<LinkRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            links::table
                .filter(links::source_page_id.eq(page_id))
                .order((links::kind.asc(), links::target_title.asc()))
                .select(LinkRow::as_select())
                .load::<LinkRow>(&mut conn)
                .await
                .and_then(|rows| rows.into_iter().map(LinkRecord::try_from).collect())
        })
    }

    /// Replace the full link set of `page_id`: delete then insert in one transaction.
    ///
    /// Any insert failure rolls back the delete, leaving the old set in place.
    /// Returns the number of links inserted.
    pub async fn replace_for_source(
        &self,
        page_id: PageId,
        records: &[LinkRecord],
    ) -> Result<usize, DieselError> {
        let rows: Vec<LinkRow> = records.iter().map(LinkRow::from).collect();

        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    diesel::delete(links::table.filter(links::source_page_id.eq(page_id)))
                        .execute(conn)
                        .await?;

                    let mut inserted = 0;
                    // SyncConnectionWrapper lacks diesel's SQLite multi-row
                    // insert support, so rows go one statement at a time
                    // inside the enclosing transaction.
                    for chunk in rows.chunks(BATCH_SIZE) {
                        for row in chunk {
                            inserted += diesel::insert_into(links::table)
                                .values(row)
                                .execute(conn)
                                .await?;
                        }
                    }
                    Ok(inserted)
                })
            })
            .await
        })
    }

    pub async fn count(&self) -> Result<u64, DieselError> {
        use diesel::dsl::count_star;
        with_conn!(self.pool, conn, {
            let count: i64 = links::table.select(count_star()).first(&mut conn).await?;
            Ok(count as u64)
        })
    }
}
