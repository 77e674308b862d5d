//! In-memory origin for tests and dry runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::{OriginClient, OriginError};
use crate::models::{ChangeEntry, FileInfo, PageId, RevisionId, RevisionRecord};

#[derive(Default)]
struct State {
    changes: Vec<ChangeEntry>,
    revisions: BTreeMap<PageId, Vec<RevisionRecord>>,
    files: BTreeMap<String, (FileInfo, Vec<u8>)>,
    feed_down: bool,
    listing_down: bool,
    failing_pages: HashSet<PageId>,
    failing_files: HashSet<String>,
    revision_requests: Vec<(PageId, Option<RevisionId>)>,
    downloads: Vec<String>,
    cancel: Option<(usize, watch::Sender<bool>)>,
}

/// Scriptable [`OriginClient`] holding the whole origin in memory.
///
/// Every revision fetch and download is logged so callers can assert
/// exactly what was requested.
#[derive(Default)]
pub struct InMemoryOrigin {
    state: Mutex<State>,
}

impl InMemoryOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_change(&self, entry: ChangeEntry) {
        self.state().changes.push(entry);
    }

    /// Add a revision to the page's history, keeping it ordered by id.
    pub fn add_revision(&self, record: RevisionRecord) {
        let mut state = self.state();
        let history = state.revisions.entry(record.page_id).or_default();
        history.retain(|r| r.revision_id != record.revision_id);
        history.push(record);
        history.sort_by_key(|r| r.revision_id);
    }

    /// Drop a page's history, as after a deletion.
    pub fn remove_page(&self, page_id: PageId) {
        self.state().revisions.remove(&page_id);
    }

    pub fn put_file(&self, info: FileInfo, bytes: Vec<u8>) {
        self.state().files.insert(info.name.clone(), (info, bytes));
    }

    pub fn set_feed_down(&self, down: bool) {
        self.state().feed_down = down;
    }

    pub fn set_listing_down(&self, down: bool) {
        self.state().listing_down = down;
    }

    pub fn fail_page(&self, page_id: PageId) {
        self.state().failing_pages.insert(page_id);
    }

    pub fn heal_page(&self, page_id: PageId) {
        self.state().failing_pages.remove(&page_id);
    }

    pub fn fail_file(&self, name: &str) {
        self.state().failing_files.insert(name.to_string());
    }

    pub fn heal_file(&self, name: &str) {
        self.state().failing_files.remove(name);
    }

    /// Flip `cancel` to true once `fetches` revision fetches have been served.
    pub fn cancel_after(&self, fetches: usize, cancel: watch::Sender<bool>) {
        self.state().cancel = Some((fetches, cancel));
    }

    /// `(page, after)` pairs passed to `revisions_since`, in call order.
    pub fn revision_requests(&self) -> Vec<(PageId, Option<RevisionId>)> {
        self.state().revision_requests.clone()
    }

    /// File names passed to `download`, in call order.
    pub fn downloads(&self) -> Vec<String> {
        self.state().downloads.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state();
        state.revision_requests.clear();
        state.downloads.clear();
    }
}

#[async_trait]
impl OriginClient for InMemoryOrigin {
    async fn changes_since(&self, since: DateTime<Utc>) -> Result<Vec<ChangeEntry>, OriginError> {
        let state = self.state();
        if state.feed_down {
            return Err(OriginError::Unavailable("change feed".to_string()));
        }
        let mut entries: Vec<ChangeEntry> = state
            .changes
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    async fn revisions_since(
        &self,
        page_id: PageId,
        after: Option<RevisionId>,
    ) -> Result<Vec<RevisionRecord>, OriginError> {
        let mut state = self.state();
        state.revision_requests.push((page_id, after));

        let served = state.revision_requests.len();
        if let Some((limit, cancel)) = &state.cancel {
            if served >= *limit {
                let _ = cancel.send(true);
            }
        }

        if state.failing_pages.contains(&page_id) {
            return Err(OriginError::Unavailable(format!("page {}", page_id)));
        }

        let history = state
            .revisions
            .get(&page_id)
            .ok_or_else(|| OriginError::NotFound(format!("page {}", page_id)))?;

        Ok(history
            .iter()
            .filter(|r| after.map_or(true, |a| r.revision_id > a))
            .cloned()
            .collect())
    }

    async fn all_file_metadata(&self) -> Result<Vec<FileInfo>, OriginError> {
        let state = self.state();
        if state.listing_down {
            return Err(OriginError::Unavailable("file listing".to_string()));
        }
        Ok(state.files.values().map(|(info, _)| info.clone()).collect())
    }

    async fn download(&self, file: &FileInfo) -> Result<Vec<u8>, OriginError> {
        let mut state = self.state();
        state.downloads.push(file.name.clone());

        if state.failing_files.contains(&file.name) {
            return Err(OriginError::Unavailable(file.url.clone()));
        }
        state
            .files
            .get(&file.name)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| OriginError::NotFound(file.name.clone()))
    }
}
