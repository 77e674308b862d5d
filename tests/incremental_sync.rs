//! End-to-end incremental sync scenarios against an in-memory origin.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::watch;

use wikisync::models::{
    ChangeEntry, ChangeKind, FileInfo, Page, PageId, RevisionId, RevisionRecord, RunStatus,
    ScrapeRun,
};
use wikisync::origin::InMemoryOrigin;
use wikisync::repository::{migrations, DbContext};
use wikisync::storage::FileStore;
use wikisync::sync::{
    categorize, run_incremental_sync, IncrementalStats, ScrapeRunLedger, SyncError,
    SyncOptions, SyncOrchestrator, UpdateInfoResolver,
};

const PNG_V1: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR first";
const PNG_V2: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR second version";

struct Harness {
    _dir: TempDir,
    db: DbContext,
    store: FileStore,
    origin: Arc<InMemoryOrigin>,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("mirror.db");
    migrations::run_migrations(&format!("sqlite:{}", db_path.display()))
        .await
        .unwrap();

    Harness {
        db: DbContext::from_sqlite_path(&db_path),
        store: FileStore::new(dir.path().join("files")),
        origin: Arc::new(InMemoryOrigin::new()),
        _dir: dir,
    }
}

impl Harness {
    async fn sync(&self, options: SyncOptions) -> Result<IncrementalStats, SyncError> {
        run_incremental_sync(&self.db, self.origin.clone(), self.store.clone(), options).await
    }

    fn ledger(&self) -> ScrapeRunLedger {
        ScrapeRunLedger::new(self.db.scrape_runs(), Duration::minutes(30))
    }

    /// Seed a page that the full mirror already holds, and the origin too.
    async fn mirrored(&self, page_id: PageId, title: &str, revisions: &[RevisionId]) {
        let records = history(page_id, revisions);
        self.db
            .revisions()
            .insert_for_page(page_id, Some(&Page::new(page_id, 0, title)), &records)
            .await
            .unwrap();
        for record in records {
            self.origin.add_revision(record);
        }
    }

    async fn revision_ids(&self, page_id: PageId) -> Vec<RevisionId> {
        self.db
            .revisions()
            .for_page(page_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.revision_id)
            .collect()
    }
}

fn t(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
}

fn revision(page_id: PageId, revision_id: RevisionId, parent_id: Option<RevisionId>) -> RevisionRecord {
    let content = format!(
        "Revision {revision_id} of page {page_id} links [[Page {}]] and {{{{Infobox}}}}",
        revision_id % 3
    );
    RevisionRecord {
        revision_id,
        page_id,
        parent_id,
        timestamp: t(revision_id),
        user_id: Some(7),
        user_name: Some("Editor".to_string()),
        comment: Some("edit".to_string()),
        content_hash: RevisionRecord::compute_hash(&content),
        size: content.len() as u64,
        content: Some(content),
        minor: false,
        tags: Vec::new(),
    }
}

fn history(page_id: PageId, ids: &[RevisionId]) -> Vec<RevisionRecord> {
    let mut parent = None;
    ids.iter()
        .map(|&id| {
            let record = revision(page_id, id, parent);
            parent = Some(id);
            record
        })
        .collect()
}

fn options(workers: usize) -> SyncOptions {
    SyncOptions {
        workers,
        ..Default::default()
    }
}

fn icon(hash: &str, bytes: &[u8]) -> FileInfo {
    FileInfo {
        name: "icon.png".to_string(),
        content_hash: hash.to_string(),
        size: bytes.len() as u64,
        mime_type: "image/png".to_string(),
        uploaded_at: t(5),
        url: "https://wiki.example/images/icon.png".to_string(),
    }
}

/// Last success at T0; A created at T1, B edited at T2 (revision 42), C deleted at T3.
async fn seed_scenario(h: &Harness) {
    h.mirrored(2, "Beta", &[40, 41]).await;
    h.mirrored(3, "Gamma", &[30]).await;
    h.ledger().record_baseline(t(0)).await.unwrap();

    for record in history(1, &[10, 11]) {
        h.origin.add_revision(record);
    }
    h.origin.add_revision(revision(2, 42, Some(41)));
    h.origin.remove_page(3);

    h.origin
        .push_change(ChangeEntry::new(1, 0, "Alpha", ChangeKind::Create, t(1)).with_revision(10));
    h.origin
        .push_change(ChangeEntry::new(2, 0, "Beta", ChangeKind::Edit, t(2)).with_revision(42));
    h.origin
        .push_change(ChangeEntry::new(3, 0, "Gamma", ChangeKind::Delete, t(3)));
}

#[tokio::test]
async fn test_first_run_requires_full_scrape() {
    let h = harness().await;
    h.origin
        .push_change(ChangeEntry::new(1, 0, "Alpha", ChangeKind::Create, t(1)));

    let result = h.sync(options(2)).await;
    assert!(matches!(result, Err(SyncError::FirstRunRequiresFullScrape)));

    assert!(h.db.scrape_runs().recent(10).await.unwrap().is_empty());
    assert!(h.db.checkpoints().load().await.unwrap().is_none());
    assert_eq!(h.db.pages().count_live().await.unwrap(), 0);
    assert!(h.origin.revision_requests().is_empty());
}

#[tokio::test]
async fn test_created_edited_deleted_scenario() {
    let h = harness().await;
    seed_scenario(&h).await;

    let feed = vec![
        ChangeEntry::new(3, 0, "Gamma", ChangeKind::Delete, t(3)),
        ChangeEntry::new(1, 0, "Alpha", ChangeKind::Create, t(1)),
        ChangeEntry::new(2, 0, "Beta", ChangeKind::Edit, t(2)),
    ];
    let set = categorize(feed);
    assert_eq!(set.new.keys().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(set.modified.iter().copied().collect::<Vec<_>>(), vec![2]);
    assert_eq!(set.deleted.iter().copied().collect::<Vec<_>>(), vec![3]);
    assert!(set.moved.is_empty());

    let before = UpdateInfoResolver::new(h.db.revisions())
        .resolve(&[2])
        .await
        .unwrap();
    assert_eq!(before[0].highest_revision_id, Some(41));
    assert_eq!(before[0].revision_count, 2);

    let stats = h.sync(options(2)).await.unwrap();
    assert_eq!(stats.status, RunStatus::Success);
    assert_eq!(
        (stats.new_pages, stats.modified_pages, stats.deleted_pages),
        (1, 1, 1)
    );
    assert_eq!(stats.revisions_added, 3);
    assert!(stats.failures.is_empty());
    assert!(stats.integrity.is_empty());

    assert_eq!(h.revision_ids(1).await, vec![10, 11]);
    assert_eq!(h.revision_ids(2).await, vec![40, 41, 42]);

    let mut requests = h.origin.revision_requests();
    requests.sort();
    assert_eq!(requests, vec![(1, None), (2, Some(41))]);

    let gamma = h.db.pages().get(3).await.unwrap().unwrap();
    assert!(gamma.is_deleted());
    assert!(h.db.links().for_source(3).await.unwrap().is_empty());
    assert!(!h.db.links().for_source(1).await.unwrap().is_empty());

    let alpha = h.db.pages().get(1).await.unwrap().unwrap();
    assert_eq!(alpha.title, "Alpha");
    assert_eq!(alpha.latest_revision_id, Some(11));

    let run = h.ledger().last_success().await.unwrap().unwrap();
    assert_eq!(run.id, stats.run_id);
    assert!(h.db.checkpoints().load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_refetch_without_origin_change_adds_nothing() {
    let h = harness().await;
    seed_scenario(&h).await;

    let first = h.sync(options(2)).await.unwrap();
    assert_eq!(first.revisions_added, 3);
    let count = h.db.revisions().count().await.unwrap();

    // The feed reports both pages again although nothing new was saved.
    let now = Utc::now();
    h.origin
        .push_change(ChangeEntry::new(1, 0, "Alpha", ChangeKind::Edit, now));
    h.origin
        .push_change(ChangeEntry::new(2, 0, "Beta", ChangeKind::Edit, now));
    h.origin.clear_log();

    let second = h.sync(options(2)).await.unwrap();
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.modified_pages, 2);
    assert_eq!(second.revisions_added, 0);
    assert_eq!(h.db.revisions().count().await.unwrap(), count);

    let mut requests = h.origin.revision_requests();
    requests.sort();
    assert_eq!(requests, vec![(1, Some(11)), (2, Some(42))]);
}

#[tokio::test]
async fn test_edited_page_missing_from_mirror_gets_a_row() {
    let h = harness().await;
    h.ledger().record_baseline(t(0)).await.unwrap();

    let mut record = revision(7, 70, None);
    let content = "Links to [[Target]]".to_string();
    record.content_hash = RevisionRecord::compute_hash(&content);
    record.size = content.len() as u64;
    record.content = Some(content);
    h.origin.add_revision(record);
    h.origin
        .push_change(ChangeEntry::new(7, 0, "Seven", ChangeKind::Edit, t(1)).with_revision(70));

    let stats = h.sync(options(2)).await.unwrap();
    assert_eq!(stats.status, RunStatus::Success);
    assert_eq!(stats.revisions_added, 1);
    assert!(stats.integrity.is_empty(), "{:?}", stats.integrity);

    let page = h.db.pages().get(7).await.unwrap().unwrap();
    assert_eq!(page.title, "Seven");
    assert_eq!(page.latest_revision_id, Some(70));
    assert!(!page.is_deleted());
    assert_eq!(h.db.links().for_source(7).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_created_then_deleted_in_one_window_is_only_deleted() {
    let h = harness().await;
    h.ledger().record_baseline(t(0)).await.unwrap();
    h.origin.add_revision(revision(9, 90, None));
    h.origin
        .push_change(ChangeEntry::new(9, 0, "Ephemeral", ChangeKind::Create, t(1)));
    h.origin
        .push_change(ChangeEntry::new(9, 0, "Ephemeral", ChangeKind::Delete, t(2)));

    let stats = h.sync(options(2)).await.unwrap();
    assert_eq!((stats.new_pages, stats.deleted_pages), (0, 1));
    assert!(h.origin.revision_requests().is_empty());
    assert!(h.db.pages().get(9).await.unwrap().is_none());
    assert_eq!(h.db.revisions().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_move_renames_without_refetch() {
    let h = harness().await;
    h.mirrored(4, "Delta", &[50]).await;
    h.ledger().record_baseline(t(0)).await.unwrap();
    h.origin.push_change(
        ChangeEntry::new(4, 0, "Delta", ChangeKind::Move, t(1)).moved_to(4, "Project:Delta"),
    );

    let stats = h.sync(options(2)).await.unwrap();
    assert_eq!(stats.moved_pages, 1);
    assert_eq!(stats.revisions_added, 0);
    assert!(h.origin.revision_requests().is_empty());

    let page = h.db.pages().get(4).await.unwrap().unwrap();
    assert_eq!((page.namespace, page.title.as_str()), (4, "Project:Delta"));
}

async fn mirror_snapshot(h: &Harness, ids: &[PageId]) -> Vec<String> {
    let mut snapshot = Vec::new();
    for &id in ids {
        let page = h.db.pages().get(id).await.unwrap();
        let links = h.db.links().for_source(id).await.unwrap();
        snapshot.push(format!(
            "{:?} {:?} {:?} {:?}",
            page.map(|p| (p.is_deleted(), p.namespace, p.latest_revision_id, p.title)),
            h.revision_ids(id).await,
            h.db.revisions().latest_content(id).await.unwrap(),
            links
        ));
    }
    snapshot
}

async fn seed_busy_window(h: &Harness) {
    seed_scenario(h).await;
    h.mirrored(5, "Epsilon", &[60]).await;
    h.origin.add_revision(revision(5, 61, Some(60)));
    h.origin.add_revision(revision(5, 62, Some(61)));
    for record in history(6, &[70, 71]) {
        h.origin.add_revision(record);
    }
    h.origin
        .push_change(ChangeEntry::new(5, 0, "Epsilon", ChangeKind::Edit, t(4)).with_revision(61));
    h.origin
        .push_change(ChangeEntry::new(5, 0, "Epsilon", ChangeKind::Edit, t(5)).with_revision(62));
    h.origin
        .push_change(ChangeEntry::new(6, 0, "Zeta", ChangeKind::Create, t(6)).with_revision(70));
    h.origin.put_file(icon("aaa", PNG_V1), PNG_V1.to_vec());
}

#[tokio::test]
async fn test_interrupted_run_resumes_to_same_mirror() {
    let pages = [1, 2, 3, 5, 6];

    let straight = harness().await;
    seed_busy_window(&straight).await;
    let stats = straight.sync(options(1)).await.unwrap();
    assert_eq!(stats.status, RunStatus::Success);
    let expected = mirror_snapshot(&straight, &pages).await;

    let h = harness().await;
    seed_busy_window(&h).await;
    let (cancel_tx, cancel_rx) = watch::channel(false);
    h.origin.cancel_after(2, cancel_tx);

    let interrupted = SyncOrchestrator::new(&h.db, h.origin.clone(), h.store.clone(), options(1))
        .with_cancel(cancel_rx)
        .run()
        .await
        .unwrap();
    assert_eq!(interrupted.status, RunStatus::Interrupted);
    assert!(interrupted.revisions_added < stats.revisions_added);

    let checkpoint = h.db.checkpoints().load().await.unwrap().unwrap();
    assert_eq!(checkpoint.run_id, interrupted.run_id);
    let closed = h.db.scrape_runs().get(&interrupted.run_id).await.unwrap().unwrap();
    assert_eq!(closed.status, RunStatus::Interrupted);

    h.origin.clear_log();
    let resumed = h.sync(options(1)).await.unwrap();
    assert_eq!(resumed.status, RunStatus::Success);
    assert_eq!(resumed.resumed_from.as_deref(), Some(interrupted.run_id.as_str()));
    assert_eq!(
        interrupted.revisions_added + resumed.revisions_added,
        stats.revisions_added
    );
    assert_eq!(
        resumed.window_end.map(|t| t.timestamp_micros()),
        interrupted.window_end.map(|t| t.timestamp_micros())
    );

    // Pages finished before the interruption are not fetched again.
    assert_eq!(h.origin.revision_requests().len(), 4 - 2);

    assert_eq!(mirror_snapshot(&h, &pages).await, expected);
    assert!(h.db.checkpoints().load().await.unwrap().is_none());
    assert_eq!(h.db.files().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_second_run_refuses_while_one_is_running() {
    let h = harness().await;
    h.ledger().record_baseline(t(0)).await.unwrap();

    let running = ScrapeRun::start_incremental(None);
    h.db.scrape_runs().insert(&running).await.unwrap();

    match h.sync(options(2)).await {
        Err(SyncError::RunInProgress { run_id, .. }) => assert_eq!(run_id, running.id),
        other => panic!("expected RunInProgress, got {:?}", other.map(|s| s.status)),
    }
    assert!(matches!(
        h.ledger().record_baseline(t(1)).await,
        Err(SyncError::RunInProgress { .. })
    ));
}

#[tokio::test]
async fn test_abandoned_run_is_closed_before_starting() {
    let h = harness().await;
    h.ledger().record_baseline(t(0)).await.unwrap();

    let mut crashed = ScrapeRun::start_incremental(None);
    crashed.heartbeat_at = Utc::now() - Duration::hours(2);
    h.db.scrape_runs().insert(&crashed).await.unwrap();

    let stats = h.sync(options(2)).await.unwrap();
    assert_eq!(stats.status, RunStatus::Success);

    let closed = h.db.scrape_runs().get(&crashed.id).await.unwrap().unwrap();
    assert_eq!(closed.status, RunStatus::Interrupted);
}

#[tokio::test]
async fn test_failed_page_is_carried_to_next_run() {
    let h = harness().await;
    seed_scenario(&h).await;
    h.origin.fail_page(2);

    let first = h.sync(options(2)).await.unwrap();
    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.failures[0].entity, "2");
    assert_eq!(h.revision_ids(2).await, vec![40, 41]);

    let run = h.db.scrape_runs().get(&first.run_id).await.unwrap().unwrap();
    assert!(run.carry_over.modified.contains(&2));
    assert_eq!(run.counts.failed_entities, 1);

    h.origin.heal_page(2);
    h.origin.clear_log();
    let second = h.sync(options(2)).await.unwrap();
    assert_eq!(second.modified_pages, 1);
    assert_eq!(second.revisions_added, 1);
    assert_eq!(h.origin.revision_requests(), vec![(2, Some(41))]);
    assert_eq!(h.revision_ids(2).await, vec![40, 41, 42]);
}

#[tokio::test]
async fn test_unreachable_feed_fails_run() {
    let h = harness().await;
    h.ledger().record_baseline(t(0)).await.unwrap();
    h.origin.set_feed_down(true);

    assert!(matches!(
        h.sync(options(2)).await,
        Err(SyncError::ChangeFeed(_))
    ));

    let runs = h.db.scrape_runs().recent(1).await.unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].error_summary.is_some());
    assert!(h.db.checkpoints().load().await.unwrap().is_some());

    // The baseline is still the last success, so the window is retried.
    let last = h.ledger().last_success().await.unwrap().unwrap();
    assert_eq!(last.window_end, Some(t(0)));
}

#[tokio::test]
async fn test_icon_downloaded_only_when_hash_changes() {
    let h = harness().await;
    h.ledger().record_baseline(t(0)).await.unwrap();
    h.origin.put_file(icon("aaa", PNG_V1), PNG_V1.to_vec());

    let first = h.sync(options(2)).await.unwrap();
    assert_eq!(first.files_downloaded, 1);
    let stored = h.db.files().get("icon.png").await.unwrap().unwrap();
    assert_eq!(std::fs::read(&stored.local_path).unwrap(), PNG_V1);

    h.origin.clear_log();
    let unchanged = h.sync(options(2)).await.unwrap();
    assert_eq!((unchanged.files_downloaded, unchanged.files_unchanged), (0, 1));
    assert!(h.origin.downloads().is_empty());

    h.origin.put_file(icon("bbb", PNG_V2), PNG_V2.to_vec());
    let changed = h.sync(options(2)).await.unwrap();
    assert_eq!(changed.files_downloaded, 1);
    assert_eq!(h.origin.downloads(), vec!["icon.png".to_string()]);

    assert_eq!(h.db.files().count().await.unwrap(), 1);
    let replaced = h.db.files().get("icon.png").await.unwrap().unwrap();
    assert_eq!(replaced.content_hash, "bbb");
    assert_eq!(replaced.mime_type, "image/png");
    assert_eq!(std::fs::read(&replaced.local_path).unwrap(), PNG_V2);
    assert!(!stored.local_path.exists());
}
