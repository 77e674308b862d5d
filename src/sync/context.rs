//! Per-run state threaded through every engine component.

use std::fmt::Display;

use tokio::sync::{mpsc, watch};
use tracing::warn;

use super::SyncEvent;
use crate::models::{CheckpointState, EntityFailure, PageId, ScrapeRun, SyncPhase};

/// Everything one run owns: its ledger record, its resume position, and
/// the channels connecting it to the caller.
pub struct RunContext {
    pub run: ScrapeRun,
    pub checkpoint: CheckpointState,
    /// Revisions discarded as already mirrored.
    pub duplicates: u64,
    cancel: watch::Receiver<bool>,
    events: Option<mpsc::Sender<SyncEvent>>,
}

impl RunContext {
    pub fn new(
        run: ScrapeRun,
        checkpoint: CheckpointState,
        cancel: watch::Receiver<bool>,
        events: Option<mpsc::Sender<SyncEvent>>,
    ) -> Self {
        Self {
            run,
            checkpoint,
            duplicates: 0,
            cancel,
            events,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub async fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Record an entity-scoped failure and keep going.
    ///
    /// Failed pages are remembered so the next run retries them.
    pub async fn record_failure(
        &mut self,
        phase: SyncPhase,
        entity: impl Into<String>,
        page_id: Option<PageId>,
        error: impl Display,
    ) {
        let entity = entity.into();
        let error = error.to_string();
        warn!("{} failed during {}: {}", entity, phase, error);

        if let Some(id) = page_id {
            self.checkpoint.failed_pages.insert(id);
        }
        self.run.counts.failed_entities += 1;
        self.run.failures.push(EntityFailure {
            entity: entity.clone(),
            phase,
            error: error.clone(),
        });
        self.emit(SyncEvent::EntityFailed {
            phase,
            entity,
            error,
        })
        .await;
    }
}
