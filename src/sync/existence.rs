//! Existence verification for newly created pages.

use std::collections::BTreeMap;

use tracing::warn;

use super::SyncError;
use crate::models::{NewPage, PageId};
use crate::repository::PageRepository;

/// Re-checks "new" pages against the mirror before anything is fetched.
pub struct ExistenceVerifier {
    pages: PageRepository,
}

impl ExistenceVerifier {
    pub fn new(pages: PageRepository) -> Self {
        Self { pages }
    }

    /// Keep only the pages the mirror does not already hold.
    ///
    /// A page present in the mirror means another pass already picked it
    /// up; it is dropped with a warning. Deleted rows do not count, so
    /// restored pages pass.
    pub async fn verify(
        &self,
        new: BTreeMap<PageId, NewPage>,
    ) -> Result<BTreeMap<PageId, NewPage>, SyncError> {
        let ids: Vec<PageId> = new.keys().copied().collect();
        let present = self.pages.live_ids(&ids).await?;

        Ok(new
            .into_iter()
            .filter(|(id, page)| {
                let keep = !present.contains(id);
                if !keep {
                    warn!(
                        "Page {} ({}) is already mirrored; dropping from new",
                        id, page.title
                    );
                }
                keep
            })
            .collect())
    }
}
