//! Scrape run ledger records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{ChangeSet, PageId, SyncPhase};

/// Lifecycle status of a synchronization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Interrupted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "interrupted" => Some(Self::Interrupted),
            _ => None,
        }
    }
}

/// What kind of run produced a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Incremental,
    /// Marker for a full mirror produced outside the engine.
    Baseline,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Baseline => "baseline",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "incremental" => Some(Self::Incremental),
            "baseline" => Some(Self::Baseline),
            _ => None,
        }
    }
}

/// Per-category counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub new_pages: u64,
    pub modified_pages: u64,
    pub deleted_pages: u64,
    pub moved_pages: u64,
    pub revisions_added: u64,
    pub files_downloaded: u64,
    pub files_unchanged: u64,
    pub links_replaced: u64,
    pub failed_entities: u64,
}

/// A recoverable failure scoped to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFailure {
    /// Page id or file name.
    pub entity: String,
    pub phase: SyncPhase,
    pub error: String,
}

/// Category of an integrity check finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    DuplicateRevision,
    DanglingLinkSource,
    NonMonotonicRevision,
    ParentNotOlder,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateRevision => "duplicate_revision",
            Self::DanglingLinkSource => "dangling_link_source",
            Self::NonMonotonicRevision => "non_monotonic_revision",
            Self::ParentNotOlder => "parent_not_older",
        }
    }
}

/// One finding from the integrity verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    pub kind: ViolationKind,
    pub page_id: Option<PageId>,
    pub detail: String,
}

/// One synchronization attempt in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRun {
    /// Unique run identifier (UUID v4).
    pub id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    /// Absent while running.
    pub finished_at: Option<DateTime<Utc>>,
    /// Refreshed on every checkpoint write.
    pub heartbeat_at: DateTime<Utc>,
    /// Lower bound of the change window (last success).
    pub window_start: Option<DateTime<Utc>>,
    /// Upper bound of the change window; the next run starts here on success.
    pub window_end: Option<DateTime<Utc>>,
    pub host: Option<String>,
    /// Run whose checkpoint this run picked up.
    pub resumed_from: Option<String>,
    pub counts: RunCounts,
    pub failures: Vec<EntityFailure>,
    pub error_summary: Option<String>,
    pub integrity: Vec<IntegrityViolation>,
    /// Failed pages the next run must process again.
    pub carry_over: ChangeSet,
}

impl ScrapeRun {
    /// Open a new incremental run.
    pub fn start_incremental(resumed_from: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mode: RunMode::Incremental,
            status: RunStatus::Running,
            started_at: now,
            finished_at: None,
            heartbeat_at: now,
            window_start: None,
            window_end: None,
            host: get_hostname(),
            resumed_from,
            counts: RunCounts::default(),
            failures: Vec::new(),
            error_summary: None,
            integrity: Vec::new(),
            carry_over: ChangeSet::default(),
        }
    }

    /// A closed, successful baseline entry marking a full mirror as of `at`.
    pub fn baseline(at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mode: RunMode::Baseline,
            status: RunStatus::Success,
            started_at: now,
            finished_at: Some(now),
            heartbeat_at: now,
            window_start: None,
            window_end: Some(at),
            host: get_hostname(),
            resumed_from: None,
            counts: RunCounts::default(),
            failures: Vec::new(),
            error_summary: None,
            integrity: Vec::new(),
            carry_over: ChangeSet::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status != RunStatus::Running
    }

    /// A running record whose owner stopped heartbeating.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.status == RunStatus::Running && now - self.heartbeat_at > threshold
    }

    /// Close the run. Closed runs are never reopened.
    pub fn close(&mut self, status: RunStatus, error_summary: Option<String>) {
        if self.is_closed() {
            return;
        }
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.heartbeat_at = now;
        self.error_summary = error_summary;
    }

    /// Wall-clock duration, if the run has finished.
    pub fn duration(&self) -> Option<Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Get the hostname (container ID in Docker).
fn get_hostname() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}
