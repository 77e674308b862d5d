//! Mirrored page rows and their revision high-water marks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PageId, RevisionId};

/// A page as stored in the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_id: PageId,
    pub namespace: i32,
    pub title: String,
    /// Highest revision applied to this page, if any.
    pub latest_revision_id: Option<RevisionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the origin deleted the page.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Page {
    /// Create a page row for a newly discovered title.
    pub fn new(page_id: PageId, namespace: i32, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            page_id,
            namespace,
            title: title.into(),
            latest_revision_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// The mirror's current high-water mark for one modified page.
///
/// Read fresh each run and never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub page_id: PageId,
    pub highest_revision_id: Option<RevisionId>,
    pub highest_revision_at: Option<DateTime<Utc>>,
    pub revision_count: u64,
}

impl UpdateInfo {
    /// High-water mark for a page with no local history.
    pub fn empty(page_id: PageId) -> Self {
        Self {
            page_id,
            highest_revision_id: None,
            highest_revision_at: None,
            revision_count: 0,
        }
    }

    /// Whether a delta fetch is possible or the full history must be fetched.
    pub fn requires_full_fetch(&self) -> bool {
        self.highest_revision_id.is_none()
    }
}
