//! Revision delta fetch and apply.

use std::sync::Arc;

use tracing::debug;

use super::SyncError;
use crate::models::{Page, RevisionRecord, UpdateInfo};
use crate::origin::{OriginClient, OriginError};
use crate::repository::{InsertOutcome, RevisionRepository};

/// Fetches revisions past a page's high-water mark and inserts them.
///
/// Fetching and applying are separate so fetches for several pages can
/// overlap while inserts stay in page order.
#[derive(Clone)]
pub struct RevisionDeltaFetcher {
    origin: Arc<dyn OriginClient>,
    revisions: RevisionRepository,
}

impl RevisionDeltaFetcher {
    pub fn new(origin: Arc<dyn OriginClient>, revisions: RevisionRepository) -> Self {
        Self { origin, revisions }
    }

    /// Revisions strictly newer than the mark, ascending.
    pub async fn fetch(&self, info: &UpdateInfo) -> Result<Vec<RevisionRecord>, OriginError> {
        self.origin
            .revisions_since(info.page_id, info.highest_revision_id)
            .await
    }

    /// Insert `records` for one page in a single transaction.
    ///
    /// `page` is upserted in the same transaction (new pages). Ids already
    /// known for the page are discarded before the insert.
    pub async fn apply(
        &self,
        info: &UpdateInfo,
        page: Option<&Page>,
        records: Vec<RevisionRecord>,
    ) -> Result<InsertOutcome, SyncError> {
        let known = self.revisions.known_ids(info.page_id).await?;
        let fetched = records.len();
        let fresh: Vec<RevisionRecord> = records
            .into_iter()
            .filter(|r| {
                let dup = known.contains(&r.revision_id);
                if dup {
                    debug!(
                        "Discarding already mirrored revision {} of page {}",
                        r.revision_id, info.page_id
                    );
                }
                !dup
            })
            .collect();
        let discarded = fetched - fresh.len();

        let mut outcome = self
            .revisions
            .insert_for_page(info.page_id, page, &fresh)
            .await?;
        outcome.duplicates += discarded;
        debug!(
            "Page {}: {} revisions inserted, {} duplicates",
            info.page_id, outcome.inserted, outcome.duplicates
        );
        Ok(outcome)
    }
}
