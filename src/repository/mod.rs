//! Repository layer for the mirror database.
//!
//! All database access uses Diesel with SQLite through diesel-async's
//! `SyncConnectionWrapper`. Timestamps are stored as RFC 3339 text.

pub mod checkpoints;
pub mod context;
pub mod files;
pub mod integrity;
pub mod links;
pub mod migrations;
pub mod models;
pub mod pages;
pub mod pool;
pub mod revisions;
pub mod scrape_runs;
pub mod util;

pub use checkpoints::CheckpointRepository;
pub use context::DbContext;
pub use files::FileRepository;
pub use integrity::IntegrityRepository;
pub use links::LinkRepository;
pub use pages::PageRepository;
pub use pool::{DbPool, DieselError};
pub use revisions::{InsertOutcome, RevisionRepository};
pub use scrape_runs::ScrapeRunRepository;

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for storage.
///
/// Fixed-width UTC with microseconds, so text ordering matches time ordering.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
