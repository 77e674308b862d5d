//! High-water mark resolution for modified pages.

use tracing::warn;

use super::SyncError;
use crate::models::{PageId, UpdateInfo};
use crate::repository::RevisionRepository;

pub struct UpdateInfoResolver {
    revisions: RevisionRepository,
}

impl UpdateInfoResolver {
    pub fn new(revisions: RevisionRepository) -> Self {
        Self { revisions }
    }

    /// One `UpdateInfo` per id, in the order given.
    ///
    /// Pages without mirrored revisions get an empty mark and a warning;
    /// their whole history is fetched.
    pub async fn resolve(&self, page_ids: &[PageId]) -> Result<Vec<UpdateInfo>, SyncError> {
        let mut found = self.revisions.update_info(page_ids).await?;

        Ok(page_ids
            .iter()
            .map(|id| {
                found.remove(id).unwrap_or_else(|| {
                    warn!("Modified page {} has no mirrored revisions; fetching full history", id);
                    UpdateInfo::empty(*id)
                })
            })
            .collect())
    }
}
