//! Progress events emitted during a run.

use crate::models::{RunStatus, SyncPhase};

/// Events emitted by the orchestrator for progress display.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A run was opened in the ledger.
    RunOpened {
        run_id: String,
        resumed_from: Option<String>,
    },
    /// A phase began with `total` entities to process.
    PhaseStarted { phase: SyncPhase, total: usize },
    /// One entity was applied (page id or file name).
    EntityApplied { phase: SyncPhase, entity: String },
    /// One entity failed and was skipped.
    EntityFailed {
        phase: SyncPhase,
        entity: String,
        error: String,
    },
    PhaseCompleted { phase: SyncPhase },
    /// The run was closed.
    Finished { status: RunStatus },
}
