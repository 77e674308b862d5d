//! The incremental synchronization run.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::{
    ChangeDetector, CheckpointStore, ExistenceVerifier, FileDeltaFetcher, IntegrityVerifier,
    LinkDeltaApplier, RevisionDeltaFetcher, RunContext, ScrapeRunLedger, SyncError, SyncEvent,
    UpdateInfoResolver,
};
use crate::models::{
    ChangeSet, CheckpointState, EntityFailure, IntegrityViolation, NewPage, Page, PageId,
    RunStatus, ScrapeRun, SyncPhase, UpdateInfo,
};
use crate::origin::{OriginClient, OriginError};
use crate::repository::{DbContext, PageRepository};
use crate::storage::FileStore;

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Concurrent origin fetches within a phase.
    pub workers: usize,
    pub sync_files: bool,
    /// Discard any checkpoint instead of resuming it.
    pub fresh: bool,
    /// Running records without a heartbeat for this long are abandoned.
    pub stale_after: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            sync_files: true,
            fresh: false,
            stale_after: Duration::minutes(30),
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct IncrementalStats {
    pub run_id: String,
    pub status: RunStatus,
    pub resumed_from: Option<String>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub new_pages: u64,
    pub modified_pages: u64,
    pub deleted_pages: u64,
    pub moved_pages: u64,
    pub revisions_added: u64,
    pub duplicates_discarded: u64,
    pub files_downloaded: u64,
    pub files_unchanged: u64,
    pub links_replaced: u64,
    pub duration: std::time::Duration,
    pub failures: Vec<EntityFailure>,
    pub integrity: Vec<IntegrityViolation>,
}

impl IncrementalStats {
    fn from_context(ctx: &RunContext, duration: std::time::Duration) -> Self {
        let run = &ctx.run;
        Self {
            run_id: run.id.clone(),
            status: run.status,
            resumed_from: run.resumed_from.clone(),
            window_start: run.window_start,
            window_end: run.window_end,
            new_pages: run.counts.new_pages,
            modified_pages: run.counts.modified_pages,
            deleted_pages: run.counts.deleted_pages,
            moved_pages: run.counts.moved_pages,
            revisions_added: run.counts.revisions_added,
            duplicates_discarded: ctx.duplicates,
            files_downloaded: run.counts.files_downloaded,
            files_unchanged: run.counts.files_unchanged,
            links_replaced: run.counts.links_replaced,
            duration,
            failures: run.failures.clone(),
            integrity: run.integrity.clone(),
        }
    }
}

/// One unit of revision work.
struct RevisionTask {
    info: UpdateInfo,
    page: Option<Page>,
}

/// Composes the engine components into a single run.
pub struct SyncOrchestrator {
    pages: PageRepository,
    ledger: ScrapeRunLedger,
    checkpoints: CheckpointStore,
    detector: ChangeDetector,
    existence: ExistenceVerifier,
    resolver: UpdateInfoResolver,
    revisions: RevisionDeltaFetcher,
    files: FileDeltaFetcher,
    links: LinkDeltaApplier,
    integrity: IntegrityVerifier,
    options: SyncOptions,
    cancel: watch::Receiver<bool>,
    events: Option<mpsc::Sender<SyncEvent>>,
}

impl SyncOrchestrator {
    pub fn new(
        db: &DbContext,
        origin: Arc<dyn OriginClient>,
        store: FileStore,
        options: SyncOptions,
    ) -> Self {
        let ledger = ScrapeRunLedger::new(db.scrape_runs(), options.stale_after);
        // Nobody can cancel through this sender once it is dropped.
        let (_never, cancel) = watch::channel(false);

        Self {
            pages: db.pages(),
            checkpoints: CheckpointStore::new(db.checkpoints(), ledger.clone()),
            ledger,
            detector: ChangeDetector::new(origin.clone()),
            existence: ExistenceVerifier::new(db.pages()),
            resolver: UpdateInfoResolver::new(db.revisions()),
            revisions: RevisionDeltaFetcher::new(origin.clone(), db.revisions()),
            files: FileDeltaFetcher::new(origin, db.files(), store),
            links: LinkDeltaApplier::new(db.revisions(), db.links()),
            integrity: IntegrityVerifier::new(db.integrity()),
            options,
            cancel,
            events: None,
        }
    }

    /// Cancel cooperatively when the receiver flips to `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn ledger(&self) -> &ScrapeRunLedger {
        &self.ledger
    }

    /// Run one incremental pass.
    ///
    /// Cancellation is not an error: the run closes as interrupted and the
    /// returned stats say so. Fatal errors close the run as failed and are
    /// returned after the integrity checks ran.
    pub async fn run(&self) -> Result<IncrementalStats, SyncError> {
        let started = Instant::now();

        let (last, since) = match self.ledger.last_success().await? {
            Some(run) => match run.window_end {
                Some(since) => (run, since),
                None => return self.no_baseline(Some(&run)).await,
            },
            None => return self.no_baseline(None).await,
        };

        let run = self.ledger.open(None).await?;
        let checkpoint = CheckpointState::new(&run.id, since, Utc::now(), ChangeSet::default());
        let mut ctx = RunContext::new(run, checkpoint, self.cancel.clone(), self.events.clone());

        let result = self.drive(&mut ctx, &last).await;
        self.finish(ctx, result, started).await
    }

    /// Without a usable baseline the detector answers with a full-scrape
    /// marker and never reaches the origin; nothing is written.
    async fn no_baseline(&self, last: Option<&ScrapeRun>) -> Result<IncrementalStats, SyncError> {
        let changes = self.detector.detect(last).await?;
        debug_assert!(changes.requires_full_scrape);
        warn!("No successful run with a window end; a full scrape is required");
        Err(SyncError::FirstRunRequiresFullScrape)
    }

    async fn drive(&self, ctx: &mut RunContext, last: &ScrapeRun) -> Result<(), SyncError> {
        self.prepare(ctx).await?;
        ctx.emit(SyncEvent::RunOpened {
            run_id: ctx.run.id.clone(),
            resumed_from: ctx.run.resumed_from.clone(),
        })
        .await;

        if !ctx.checkpoint.phase_done(SyncPhase::Discovering) {
            self.discover(ctx, last).await?;
        }
        if !ctx.checkpoint.phase_done(SyncPhase::Resolving) {
            self.resolve(ctx).await?;
        }
        self.record_counts(ctx);

        if !ctx.checkpoint.phase_done(SyncPhase::FetchingRevisions) {
            self.fetch_revisions(ctx).await?;
        }
        if !ctx.checkpoint.phase_done(SyncPhase::FetchingFiles) {
            if self.options.sync_files {
                self.fetch_files(ctx).await?;
            }
            self.enter(ctx, SyncPhase::FetchingLinks).await?;
        }
        if !ctx.checkpoint.phase_done(SyncPhase::FetchingLinks) {
            self.fetch_links(ctx).await?;
        }

        self.enter(ctx, SyncPhase::Verifying).await?;
        Ok(())
    }

    /// Resume from a checkpoint or start a new window.
    async fn prepare(&self, ctx: &mut RunContext) -> Result<(), SyncError> {
        if self.options.fresh {
            if self.checkpoints.clear().await? {
                info!("Discarded existing checkpoint; starting fresh");
            }
        } else if let Some(previous) = self.checkpoints.load().await? {
            info!(
                "Resuming run {} at {} ({} pages in change set)",
                previous.run_id,
                previous.phase,
                previous.change_set.len()
            );
            ctx.run.resumed_from = Some(previous.run_id.clone());
            ctx.checkpoint = CheckpointState {
                run_id: ctx.run.id.clone(),
                ..previous
            };
        }

        ctx.run.window_start = Some(ctx.checkpoint.window_start);
        ctx.run.window_end = Some(ctx.checkpoint.window_end);
        self.ledger.save(&ctx.run).await?;
        self.checkpoints.save(ctx).await
    }

    async fn enter(&self, ctx: &mut RunContext, phase: SyncPhase) -> Result<(), SyncError> {
        ctx.checkpoint.advance(phase);
        self.checkpoints.save(ctx).await?;
        self.ledger.save(&ctx.run).await?;
        debug!("Entered phase {}", phase);
        Ok(())
    }

    async fn checkpoint_entity(
        &self,
        ctx: &mut RunContext,
        phase: SyncPhase,
        key: String,
    ) -> Result<(), SyncError> {
        ctx.checkpoint.record(phase, key.clone());
        self.checkpoints.save(ctx).await?;
        ctx.emit(SyncEvent::EntityApplied { phase, entity: key }).await;
        if ctx.is_cancelled() {
            info!("Cancellation requested; stopping after {}", phase);
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    async fn discover(&self, ctx: &mut RunContext, last: &ScrapeRun) -> Result<(), SyncError> {
        ctx.emit(SyncEvent::PhaseStarted {
            phase: SyncPhase::Discovering,
            total: 0,
        })
        .await;

        let changes = self.detector.detect(Some(last)).await?;
        if changes.requires_full_scrape {
            return Err(SyncError::FirstRunRequiresFullScrape);
        }
        ctx.checkpoint.change_set = changes;

        ctx.emit(SyncEvent::PhaseCompleted {
            phase: SyncPhase::Discovering,
        })
        .await;
        self.enter(ctx, SyncPhase::Resolving).await
    }

    /// Existence verification, then moves and deletions as metadata updates.
    async fn resolve(&self, ctx: &mut RunContext) -> Result<(), SyncError> {
        let phase = SyncPhase::Resolving;

        if ctx.checkpoint.cursor(phase).is_none() {
            let candidates = std::mem::take(&mut ctx.checkpoint.change_set.new);
            ctx.checkpoint.change_set.new = self.existence.verify(candidates).await?;
            self.checkpoints.save(ctx).await?;
        }

        let set = &ctx.checkpoint.change_set;
        let targets: BTreeSet<PageId> = set
            .moved
            .keys()
            .chain(set.deleted.iter())
            .copied()
            .collect();
        ctx.emit(SyncEvent::PhaseStarted {
            phase,
            total: targets.len(),
        })
        .await;

        let deleted_at = ctx.checkpoint.window_end;
        for page_id in targets {
            if ctx.checkpoint.page_processed(phase, page_id) {
                continue;
            }

            if ctx.checkpoint.change_set.deleted.contains(&page_id) {
                match self.pages.mark_deleted(page_id, deleted_at).await {
                    Ok(true) => debug!("Marked page {} deleted", page_id),
                    Ok(false) => debug!("Deleted page {} was never mirrored", page_id),
                    Err(e) => {
                        ctx.record_failure(phase, page_id.to_string(), Some(page_id), e)
                            .await
                    }
                }
            } else if let Some(moved) = ctx.checkpoint.change_set.moved.get(&page_id).cloned() {
                match self
                    .pages
                    .rename(page_id, moved.namespace, &moved.new_title)
                    .await
                {
                    Ok(true) => debug!(
                        "Renamed page {}: {} -> {}",
                        page_id, moved.old_title, moved.new_title
                    ),
                    Ok(false) => {
                        info!(
                            "Moved page {} ({}) is not mirrored; treating as new",
                            page_id, moved.new_title
                        );
                        ctx.checkpoint.change_set.moved.remove(&page_id);
                        ctx.checkpoint.change_set.new.insert(
                            page_id,
                            NewPage {
                                namespace: moved.namespace,
                                title: moved.new_title,
                            },
                        );
                    }
                    Err(e) => {
                        ctx.record_failure(phase, page_id.to_string(), Some(page_id), e)
                            .await
                    }
                }
            }

            self.checkpoint_entity(ctx, phase, page_id.to_string()).await?;
        }

        ctx.emit(SyncEvent::PhaseCompleted { phase }).await;
        self.enter(ctx, SyncPhase::FetchingRevisions).await
    }

    fn record_counts(&self, ctx: &mut RunContext) {
        let set = &ctx.checkpoint.change_set;
        ctx.run.counts.new_pages = set.new.len() as u64;
        ctx.run.counts.modified_pages = set.modified.len() as u64;
        ctx.run.counts.deleted_pages = set.deleted.len() as u64;
        ctx.run.counts.moved_pages = set.moved.len() as u64;
    }

    async fn revision_tasks(&self, ctx: &RunContext) -> Result<Vec<RevisionTask>, SyncError> {
        let phase = SyncPhase::FetchingRevisions;
        let set = &ctx.checkpoint.change_set;
        let pending: Vec<PageId> = set
            .content_targets()
            .into_iter()
            .filter(|id| !ctx.checkpoint.page_processed(phase, *id))
            .collect();

        let existing: Vec<PageId> = pending
            .iter()
            .copied()
            .filter(|id| !set.new.contains_key(id))
            .collect();
        let mut infos = self.resolver.resolve(&existing).await?.into_iter();
        let mirrored = self.pages.mirrored_ids(&existing).await?;

        let mut tasks = Vec::with_capacity(pending.len());
        for page_id in pending {
            let task = match set.new.get(&page_id) {
                Some(new) => RevisionTask {
                    info: UpdateInfo::empty(page_id),
                    page: Some(Page::new(page_id, new.namespace, new.title.clone())),
                },
                None => RevisionTask {
                    info: infos.next().unwrap_or_else(|| UpdateInfo::empty(page_id)),
                    page: if mirrored.contains(&page_id) {
                        None
                    } else {
                        Self::missing_page(set, page_id)
                    },
                },
            };
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Row for a changed page the mirror has never seen, written with its
    /// first revisions.
    fn missing_page(set: &ChangeSet, page_id: PageId) -> Option<Page> {
        let (namespace, title) = match (set.modified_titles.get(&page_id), set.moved.get(&page_id)) {
            (Some(page), _) => (page.namespace, page.title.clone()),
            (None, Some(moved)) => (moved.namespace, moved.new_title.clone()),
            (None, None) => {
                warn!("Page {} is not mirrored and has no known title", page_id);
                return None;
            }
        };
        info!("Modified page {} ({}) is not mirrored; adding it", page_id, title);
        Some(Page::new(page_id, namespace, title))
    }

    async fn fetch_revisions(&self, ctx: &mut RunContext) -> Result<(), SyncError> {
        let phase = SyncPhase::FetchingRevisions;
        let tasks = self.revision_tasks(ctx).await?;
        ctx.emit(SyncEvent::PhaseStarted {
            phase,
            total: tasks.len(),
        })
        .await;
        info!("Fetching revisions for {} pages", tasks.len());

        let mut fetched = stream::iter(tasks.into_iter().map(|task| {
            let fetcher = self.revisions.clone();
            async move {
                let result = fetcher.fetch(&task.info).await;
                (task, result)
            }
        }))
        .buffered(self.options.workers.max(1));

        while let Some((task, result)) = fetched.next().await {
            let page_id = task.info.page_id;
            let applied = match result {
                Ok(records) => self.revisions.apply(&task.info, task.page.as_ref(), records).await,
                Err(OriginError::NotFound(_)) => {
                    warn!("Page {} no longer exists on the origin; skipping", page_id);
                    Ok(Default::default())
                }
                Err(e) => Err(e.into()),
            };
            match applied {
                Ok(outcome) => {
                    ctx.run.counts.revisions_added += outcome.inserted as u64;
                    ctx.duplicates += outcome.duplicates as u64;
                }
                Err(e) => {
                    ctx.record_failure(phase, page_id.to_string(), Some(page_id), e)
                        .await
                }
            }
            self.checkpoint_entity(ctx, phase, page_id.to_string()).await?;
        }

        ctx.emit(SyncEvent::PhaseCompleted { phase }).await;
        self.enter(ctx, SyncPhase::FetchingFiles).await
    }

    async fn fetch_files(&self, ctx: &mut RunContext) -> Result<(), SyncError> {
        let phase = SyncPhase::FetchingFiles;
        let plan = match self.files.plan().await {
            Ok(plan) => plan,
            Err(e) => {
                ctx.record_failure(phase, "*", None, e).await;
                return Ok(());
            }
        };
        ctx.run.counts.files_unchanged = plan.unchanged.len() as u64;

        let pending: Vec<_> = plan
            .to_download
            .into_iter()
            .filter(|f| !ctx.checkpoint.file_processed(phase, &f.name))
            .collect();
        ctx.emit(SyncEvent::PhaseStarted {
            phase,
            total: pending.len(),
        })
        .await;
        info!("Downloading {} changed files", pending.len());

        let mut fetched = stream::iter(pending.into_iter().map(|info| {
            let fetcher = self.files.clone();
            async move {
                let result = fetcher.fetch(&info).await;
                (info, result)
            }
        }))
        .buffered(self.options.workers.max(1));

        while let Some((info, result)) = fetched.next().await {
            let applied = match result {
                Ok(bytes) => self.files.apply(&info, bytes).await,
                Err(e) => Err(e.into()),
            };
            match applied {
                Ok(_) => ctx.run.counts.files_downloaded += 1,
                Err(e) => ctx.record_failure(phase, info.name.clone(), None, e).await,
            }
            self.checkpoint_entity(ctx, phase, info.name).await?;
        }

        ctx.emit(SyncEvent::PhaseCompleted { phase }).await;
        Ok(())
    }

    async fn fetch_links(&self, ctx: &mut RunContext) -> Result<(), SyncError> {
        let phase = SyncPhase::FetchingLinks;
        let pending: Vec<PageId> = ctx
            .checkpoint
            .change_set
            .content_targets()
            .into_iter()
            .filter(|id| !ctx.checkpoint.failed_pages.contains(id))
            .filter(|id| !ctx.checkpoint.page_processed(phase, *id))
            .collect();
        ctx.emit(SyncEvent::PhaseStarted {
            phase,
            total: pending.len(),
        })
        .await;

        for page_id in pending {
            match self.links.apply(page_id).await {
                Ok(Some(_)) => ctx.run.counts.links_replaced += 1,
                Ok(None) => {}
                Err(e) => {
                    ctx.record_failure(phase, page_id.to_string(), Some(page_id), e)
                        .await
                }
            }
            self.checkpoint_entity(ctx, phase, page_id.to_string()).await?;
        }

        ctx.emit(SyncEvent::PhaseCompleted { phase }).await;
        Ok(())
    }

    /// Pages the next run must retry.
    ///
    /// A failed new page whose row now exists (its links failed) is retried
    /// as modified, since the existence check would otherwise drop it.
    async fn carry_over(&self, checkpoint: &CheckpointState) -> Result<ChangeSet, SyncError> {
        let mut carry = checkpoint.carry_over();
        let ids: Vec<PageId> = carry.new.keys().copied().collect();
        for id in self.pages.live_ids(&ids).await? {
            let page = carry.new.remove(&id);
            carry.insert_modified(id, page);
        }
        Ok(carry)
    }

    async fn finish(
        &self,
        mut ctx: RunContext,
        mut result: Result<(), SyncError>,
        started: Instant,
    ) -> Result<IncrementalStats, SyncError> {
        ctx.run.integrity = self.integrity.verify().await;

        let (mut status, mut summary) = match &result {
            Ok(()) => (RunStatus::Success, None),
            Err(SyncError::Cancelled) => {
                (RunStatus::Interrupted, Some("cancelled by user".to_string()))
            }
            Err(e) => {
                error!("Run {} failed: {}", ctx.run.id, e);
                (RunStatus::Failed, Some(e.to_string()))
            }
        };

        if status == RunStatus::Success {
            match self.carry_over(&ctx.checkpoint).await {
                Ok(carry) => {
                    ctx.run.carry_over = carry;
                    ctx.checkpoint.advance(SyncPhase::Complete);
                }
                Err(e) => {
                    error!("Run {} could not record carry-over: {}", ctx.run.id, e);
                    status = RunStatus::Failed;
                    summary = Some(e.to_string());
                    result = Err(e);
                }
            }
        }

        let closed = self.ledger.close(&mut ctx.run, status, summary).await;
        if status == RunStatus::Success {
            closed?;
            self.checkpoints.clear().await?;
        } else if let Err(e) = closed {
            error!("Could not close run {}: {}", ctx.run.id, e);
        }

        ctx.emit(SyncEvent::Finished { status }).await;
        let stats = IncrementalStats::from_context(&ctx, started.elapsed());
        info!(
            "Run {} {}: {} new, {} modified, {} deleted, {} moved, {} revisions, {} files, {} failures, {} integrity findings",
            stats.run_id,
            stats.status.as_str(),
            stats.new_pages,
            stats.modified_pages,
            stats.deleted_pages,
            stats.moved_pages,
            stats.revisions_added,
            stats.files_downloaded,
            stats.failures.len(),
            stats.integrity.len()
        );

        match result {
            Ok(()) | Err(SyncError::Cancelled) => Ok(stats),
            Err(e) => Err(e),
        }
    }
}

/// Run one incremental pass with default wiring.
pub async fn run_incremental_sync(
    db: &DbContext,
    origin: Arc<dyn OriginClient>,
    store: FileStore,
    options: SyncOptions,
) -> Result<IncrementalStats, SyncError> {
    SyncOrchestrator::new(db, origin, store, options).run().await
}
