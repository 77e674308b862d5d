//! Data models for the wiki mirror and the synchronization engine.

mod change;
mod checkpoint;
mod file;
mod link;
mod page;
mod revision;
mod scrape_run;

pub use change::{ChangeEntry, ChangeKind, ChangeSet, MovedPage, NewPage};
pub use checkpoint::{CheckpointState, SyncPhase};
pub use file::{FileChangeSet, FileInfo, MirroredFile};
pub use link::{LinkKind, LinkRecord};
pub use page::{Page, UpdateInfo};
pub use revision::RevisionRecord;
pub use scrape_run::{
    EntityFailure, IntegrityViolation, RunCounts, RunMode, RunStatus, ScrapeRun, ViolationKind,
};

/// Stable origin-assigned identifier of a wiki page.
pub type PageId = i64;

/// Origin-assigned revision identifier, globally ordered per page.
pub type RevisionId = i64;
