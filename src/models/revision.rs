//! Revision records mirrored from the origin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{PageId, RevisionId};

/// A single immutable revision of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub revision_id: RevisionId,
    pub page_id: PageId,
    /// Absent for the first revision of a page.
    pub parent_id: Option<RevisionId>,
    pub timestamp: DateTime<Utc>,
    /// Absent when the origin anonymized or suppressed the author.
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub comment: Option<String>,
    /// Wikitext body. Absent when the origin hides the content.
    pub content: Option<String>,
    pub content_hash: String,
    pub size: u64,
    pub minor: bool,
    pub tags: Vec<String>,
}

impl RevisionRecord {
    /// Compute the SHA-256 hex digest used when the origin does not supply a hash.
    pub fn compute_hash(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_is_stable() {
        let a = RevisionRecord::compute_hash("hello");
        let b = RevisionRecord::compute_hash("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, RevisionRecord::compute_hash("hello!"));
    }
}
