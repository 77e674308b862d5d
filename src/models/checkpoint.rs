//! Durable position of an in-progress synchronization run.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChangeSet, PageId};

/// Run phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Discovering,
    Resolving,
    FetchingRevisions,
    FetchingFiles,
    FetchingLinks,
    Verifying,
    Complete,
}

impl SyncPhase {
    pub const ALL: [SyncPhase; 7] = [
        Self::Discovering,
        Self::Resolving,
        Self::FetchingRevisions,
        Self::FetchingFiles,
        Self::FetchingLinks,
        Self::Verifying,
        Self::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovering => "discovering",
            Self::Resolving => "resolving",
            Self::FetchingRevisions => "fetching_revisions",
            Self::FetchingFiles => "fetching_files",
            Self::FetchingLinks => "fetching_links",
            Self::Verifying => "verifying",
            Self::Complete => "complete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }

    /// The phase after this one; `Complete` is terminal.
    pub fn next(&self) -> Self {
        match self {
            Self::Discovering => Self::Resolving,
            Self::Resolving => Self::FetchingRevisions,
            Self::FetchingRevisions => Self::FetchingFiles,
            Self::FetchingFiles => Self::FetchingLinks,
            Self::FetchingLinks => Self::Verifying,
            Self::Verifying | Self::Complete => Self::Complete,
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-row resume record. Absent when no run is in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub run_id: String,
    pub phase: SyncPhase,
    /// Last fully-processed entity key per phase (page id or file name).
    pub cursors: BTreeMap<SyncPhase, String>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Entity list the run committed to after discovery.
    pub change_set: ChangeSet,
    /// Pages that failed in any phase; carried into the next run.
    pub failed_pages: BTreeSet<PageId>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointState {
    pub fn new(
        run_id: impl Into<String>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        change_set: ChangeSet,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            phase: SyncPhase::Discovering,
            cursors: BTreeMap::new(),
            window_start,
            window_end,
            change_set,
            failed_pages: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn cursor(&self, phase: SyncPhase) -> Option<&str> {
        self.cursors.get(&phase).map(String::as_str)
    }

    /// Whether `phase` finished entirely in an earlier attempt.
    pub fn phase_done(&self, phase: SyncPhase) -> bool {
        self.phase > phase
    }

    /// Whether page `page_id` was already applied in `phase`.
    pub fn page_processed(&self, phase: SyncPhase, page_id: i64) -> bool {
        if self.phase_done(phase) {
            return true;
        }
        if self.phase != phase {
            return false;
        }
        self.cursor(phase)
            .and_then(|c| c.parse::<i64>().ok())
            .is_some_and(|last| page_id <= last)
    }

    /// Whether file `name` was already applied in `phase`. Names compare lexically.
    pub fn file_processed(&self, phase: SyncPhase, name: &str) -> bool {
        if self.phase_done(phase) {
            return true;
        }
        if self.phase != phase {
            return false;
        }
        self.cursor(phase).is_some_and(|last| name <= last)
    }

    pub fn advance(&mut self, phase: SyncPhase) {
        self.phase = phase;
        self.updated_at = Utc::now();
    }

    /// Failed pages as a change set to retry in the next run.
    pub fn carry_over(&self) -> ChangeSet {
        self.change_set.restrict(&self.failed_pages)
    }

    pub fn record(&mut self, phase: SyncPhase, key: impl Into<String>) {
        self.phase = phase;
        self.cursors.insert(phase, key.into());
        self.updated_at = Utc::now();
    }
}
