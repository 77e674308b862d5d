//! Origin wiki access.
//!
//! The engine talks to the origin only through [`OriginClient`]. Responses
//! are typed at this edge; nothing past it sees raw JSON.

mod error;
mod mediawiki;
mod memory;
mod retry;
pub mod types;

pub use error::OriginError;
pub use mediawiki::MediaWikiClient;
pub use memory::InMemoryOrigin;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ChangeEntry, FileInfo, PageId, RevisionId, RevisionRecord};

/// Read-only view of the origin used by the synchronization engine.
#[async_trait]
pub trait OriginClient: Send + Sync {
    /// All change feed entries with timestamp at or after `since`, oldest first.
    async fn changes_since(&self, since: DateTime<Utc>) -> Result<Vec<ChangeEntry>, OriginError>;

    /// Revisions of `page_id` strictly newer than `after`, ascending.
    ///
    /// `None` fetches the full history.
    async fn revisions_since(
        &self,
        page_id: PageId,
        after: Option<RevisionId>,
    ) -> Result<Vec<RevisionRecord>, OriginError>;

    /// Metadata for every file the origin hosts.
    async fn all_file_metadata(&self) -> Result<Vec<FileInfo>, OriginError>;

    /// Raw bytes of one file.
    async fn download(&self, file: &FileInfo) -> Result<Vec<u8>, OriginError>;
}
