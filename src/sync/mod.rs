//! Incremental synchronization engine.
//!
//! A run detects what changed on the origin since the last successful run,
//! fetches only that delta, applies it one page or file at a time, and
//! checkpoints after every entity so an interrupted run can resume.

mod checkpoint;
mod context;
mod detector;
mod error;
mod events;
mod existence;
mod files;
mod integrity;
mod ledger;
mod links;
mod orchestrator;
mod revisions;
mod update_info;

pub use checkpoint::CheckpointStore;
pub use context::RunContext;
pub use detector::{categorize, categorize_onto, ChangeDetector};
pub use error::SyncError;
pub use events::SyncEvent;
pub use existence::ExistenceVerifier;
pub use files::FileDeltaFetcher;
pub use integrity::IntegrityVerifier;
pub use ledger::ScrapeRunLedger;
pub use links::{extract_links, normalize_title, LinkDeltaApplier};
pub use orchestrator::{run_incremental_sync, IncrementalStats, SyncOptions, SyncOrchestrator};
pub use revisions::RevisionDeltaFetcher;
pub use update_info::UpdateInfoResolver;
