//! Post-run consistency checks.

use tracing::{info, warn};

use super::SyncError;
use crate::models::{IntegrityViolation, ViolationKind};
use crate::repository::IntegrityRepository;

/// Read-only checks over the whole mirror. Findings are reported, never repaired.
#[derive(Clone)]
pub struct IntegrityVerifier {
    repo: IntegrityRepository,
}

impl IntegrityVerifier {
    pub fn new(repo: IntegrityRepository) -> Self {
        Self { repo }
    }

    /// Run one check.
    pub async fn check(&self, kind: ViolationKind) -> Result<Vec<IntegrityViolation>, SyncError> {
        let violations = match kind {
            ViolationKind::DuplicateRevision => self
                .repo
                .duplicate_revisions()
                .await?
                .into_iter()
                .map(|row| IntegrityViolation {
                    kind,
                    page_id: Some(row.page_id),
                    detail: format!(
                        "revision {} stored {} times",
                        row.revision_id, row.copies
                    ),
                })
                .collect(),
            ViolationKind::DanglingLinkSource => self
                .repo
                .dangling_links()
                .await?
                .into_iter()
                .map(|row| IntegrityViolation {
                    kind,
                    page_id: Some(row.source_page_id),
                    detail: format!(
                        "{} links from a page that is absent or deleted",
                        row.link_count
                    ),
                })
                .collect(),
            ViolationKind::NonMonotonicRevision => self
                .repo
                .non_monotonic_revisions()
                .await?
                .into_iter()
                .map(|row| IntegrityViolation {
                    kind,
                    page_id: Some(row.page_id),
                    detail: format!(
                        "revision {} follows revision {} in time",
                        row.revision_id, row.other_id
                    ),
                })
                .collect(),
            ViolationKind::ParentNotOlder => self
                .repo
                .parent_not_older()
                .await?
                .into_iter()
                .map(|row| IntegrityViolation {
                    kind,
                    page_id: Some(row.page_id),
                    detail: format!(
                        "revision {} has parent {}",
                        row.revision_id, row.other_id
                    ),
                })
                .collect(),
        };
        Ok(violations)
    }

    /// Run every check. A failing check is logged and does not hide the others.
    pub async fn verify(&self) -> Vec<IntegrityViolation> {
        let mut all = Vec::new();
        for kind in [
            ViolationKind::DuplicateRevision,
            ViolationKind::DanglingLinkSource,
            ViolationKind::NonMonotonicRevision,
            ViolationKind::ParentNotOlder,
        ] {
            match self.check(kind).await {
                Ok(found) => {
                    for v in &found {
                        warn!("Integrity: {} on page {:?}: {}", kind.as_str(), v.page_id, v.detail);
                    }
                    all.extend(found);
                }
                Err(e) => tracing::error!("Integrity check {} failed: {}", kind.as_str(), e),
            }
        }
        info!("Integrity verification found {} violations", all.len());
        all
    }
}
