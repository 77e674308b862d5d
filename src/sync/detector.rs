//! Change detection and categorization.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::SyncError;
use crate::models::{ChangeEntry, ChangeKind, ChangeSet, MovedPage, NewPage, PageId, ScrapeRun};
use crate::origin::OriginClient;

/// Where one page stands after the events seen so far.
#[derive(Debug, Clone)]
enum Category {
    New(NewPage),
    Modified(Option<NewPage>),
    Deleted,
    Moved(MovedPage),
}

impl Category {
    fn created(entry: &ChangeEntry) -> Self {
        Category::New(titled(entry))
    }

    fn modified(entry: &ChangeEntry) -> Self {
        Category::Modified(Some(titled(entry)))
    }

    fn moved(entry: &ChangeEntry, content_changed: bool) -> Self {
        Category::Moved(MovedPage {
            namespace: entry.current_namespace(),
            old_title: entry.title.clone(),
            new_title: entry.current_title().to_string(),
            content_changed,
        })
    }

    /// Fold one later event into the current category.
    ///
    /// Only a creation revives a deleted page; later edits or moves of it
    /// leave it deleted.
    fn apply(self, entry: &ChangeEntry) -> Self {
        use ChangeKind::*;
        match (self, entry.kind) {
            (_, Delete) => Category::Deleted,
            (Category::Deleted, Create) => Category::created(entry),
            (Category::Deleted, Edit | Move) => Category::Deleted,
            (Category::New(_), Create | Edit | Move) => Category::created(entry),
            (Category::Modified(_), Edit) => Category::modified(entry),
            (Category::Modified(_), Move) => Category::moved(entry, true),
            (Category::Modified(_) | Category::Moved(_), Create) => Category::created(entry),
            (Category::Moved(mut moved), Edit) => {
                moved.content_changed = true;
                Category::Moved(moved)
            }
            (Category::Moved(mut moved), Move) => {
                moved.namespace = entry.current_namespace();
                moved.new_title = entry.current_title().to_string();
                Category::Moved(moved)
            }
        }
    }

    fn first(entry: &ChangeEntry) -> Self {
        match entry.kind {
            ChangeKind::Create => Category::created(entry),
            ChangeKind::Edit => Category::modified(entry),
            ChangeKind::Delete => Category::Deleted,
            ChangeKind::Move => Category::moved(entry, false),
        }
    }
}

fn titled(entry: &ChangeEntry) -> NewPage {
    NewPage {
        namespace: entry.current_namespace(),
        title: entry.current_title().to_string(),
    }
}

fn seed(carry_over: &ChangeSet) -> BTreeMap<PageId, Category> {
    let mut state = BTreeMap::new();
    for (id, page) in &carry_over.new {
        state.insert(*id, Category::New(page.clone()));
    }
    for id in &carry_over.modified {
        let title = carry_over.modified_titles.get(id).cloned();
        state.insert(*id, Category::Modified(title));
    }
    for id in &carry_over.deleted {
        state.insert(*id, Category::Deleted);
    }
    for (id, moved) in &carry_over.moved {
        state.insert(*id, Category::Moved(moved.clone()));
    }
    state
}

/// Partition change feed entries into disjoint categories.
///
/// Entries are folded per page in timestamp order, so the latest event
/// decides: created then deleted is only deleted, created then edited is
/// only new, repeated edits collapse into one modified entry.
pub fn categorize(entries: impl IntoIterator<Item = ChangeEntry>) -> ChangeSet {
    categorize_onto(&ChangeSet::default(), entries)
}

/// Like [`categorize`], treating `carry_over` as events that precede the feed.
pub fn categorize_onto(
    carry_over: &ChangeSet,
    entries: impl IntoIterator<Item = ChangeEntry>,
) -> ChangeSet {
    let mut entries: Vec<ChangeEntry> = entries.into_iter().collect();
    entries.sort_by_key(|e| e.timestamp);

    let mut state = seed(carry_over);
    for entry in &entries {
        let next = match state.remove(&entry.page_id) {
            Some(current) => current.apply(entry),
            None => Category::first(entry),
        };
        state.insert(entry.page_id, next);
    }

    let mut set = ChangeSet::default();
    for (id, category) in state {
        match category {
            Category::New(page) => {
                set.new.insert(id, page);
            }
            Category::Modified(title) => set.insert_modified(id, title),
            Category::Deleted => {
                set.deleted.insert(id);
            }
            Category::Moved(moved) => {
                set.moved.insert(id, moved);
            }
        }
    }
    set
}

/// Reads the origin's change feed and categorizes it.
pub struct ChangeDetector {
    origin: Arc<dyn OriginClient>,
}

impl ChangeDetector {
    pub fn new(origin: Arc<dyn OriginClient>) -> Self {
        Self { origin }
    }

    /// Changes since `last_success`'s window end.
    ///
    /// Without a prior success this returns a full-scrape marker without
    /// contacting the origin. Feed errors are returned whole; no partial
    /// change set is ever produced.
    pub async fn detect(&self, last_success: Option<&ScrapeRun>) -> Result<ChangeSet, SyncError> {
        let Some(since) = last_success.and_then(|run| run.window_end) else {
            return Ok(ChangeSet::full_scrape_required());
        };
        let carry_over = last_success
            .map(|run| run.carry_over.clone())
            .unwrap_or_default();
        self.detect_since(since, &carry_over).await
    }

    pub async fn detect_since(
        &self,
        since: DateTime<Utc>,
        carry_over: &ChangeSet,
    ) -> Result<ChangeSet, SyncError> {
        let entries = self
            .origin
            .changes_since(since)
            .await
            .map_err(SyncError::ChangeFeed)?;
        debug!("Change feed returned {} entries since {}", entries.len(), since);

        let set = categorize_onto(carry_over, entries);
        info!(
            "Detected {} new, {} modified, {} deleted, {} moved",
            set.new.len(),
            set.modified.len(),
            set.deleted.len(),
            set.moved.len()
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::InMemoryOrigin;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    fn entry(page_id: PageId, kind: ChangeKind, minute: u32) -> ChangeEntry {
        ChangeEntry::new(page_id, 0, format!("Page {page_id}"), kind, at(minute))
    }

    #[test]
    fn test_basic_partition() {
        let set = categorize(vec![
            entry(1, ChangeKind::Create, 1),
            entry(2, ChangeKind::Edit, 2).with_revision(42),
            entry(3, ChangeKind::Delete, 3),
        ]);
        assert_eq!(set.new.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(set.modified, BTreeSet::from([2]));
        assert_eq!(set.deleted, BTreeSet::from([3]));
        assert!(set.moved.is_empty());
        assert!(set.is_disjoint());
    }

    #[test]
    fn test_created_then_deleted_is_only_deleted() {
        let set = categorize(vec![
            entry(1, ChangeKind::Delete, 5),
            entry(1, ChangeKind::Create, 1),
        ]);
        assert!(set.new.is_empty());
        assert_eq!(set.deleted, BTreeSet::from([1]));
    }

    #[test]
    fn test_created_then_edited_is_only_new() {
        let set = categorize(vec![
            entry(1, ChangeKind::Create, 1),
            entry(1, ChangeKind::Edit, 2),
            entry(1, ChangeKind::Edit, 3),
        ]);
        assert!(set.new.contains_key(&1));
        assert!(set.modified.is_empty());
    }

    #[test]
    fn test_repeated_edits_collapse() {
        let set = categorize((1..=5).map(|m| entry(9, ChangeKind::Edit, m)));
        assert_eq!(set.modified, BTreeSet::from([9]));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_edit_then_delete_leaves_modified() {
        let set = categorize(vec![
            entry(4, ChangeKind::Edit, 1),
            entry(4, ChangeKind::Delete, 2),
        ]);
        assert!(set.modified.is_empty());
        assert_eq!(set.deleted, BTreeSet::from([4]));
    }

    #[test]
    fn test_deleted_then_recreated_is_new() {
        let set = categorize(vec![
            entry(4, ChangeKind::Delete, 1),
            entry(4, ChangeKind::Create, 2),
        ]);
        assert!(set.deleted.is_empty());
        assert!(set.new.contains_key(&4));
    }

    #[test]
    fn test_deleted_then_edited_stays_deleted() {
        let moved = entry(5, ChangeKind::Move, 3).moved_to(0, "Elsewhere");
        let set = categorize(vec![
            entry(4, ChangeKind::Delete, 1),
            entry(4, ChangeKind::Edit, 2),
            entry(5, ChangeKind::Delete, 1),
            moved,
        ]);
        assert!(set.new.is_empty());
        assert!(set.modified.is_empty());
        assert!(set.moved.is_empty());
        assert_eq!(set.deleted, BTreeSet::from([4, 5]));
    }

    #[test]
    fn test_modified_keeps_latest_title() {
        let set = categorize(vec![
            entry(6, ChangeKind::Edit, 1),
            ChangeEntry::new(6, 4, "Project:Six", ChangeKind::Edit, at(2)),
        ]);
        assert_eq!(set.modified, BTreeSet::from([6]));
        assert_eq!(set.modified_titles[&6].namespace, 4);
        assert_eq!(set.modified_titles[&6].title, "Project:Six");
    }

    #[test]
    fn test_move_combinations() {
        let moved = |id, minute| entry(id, ChangeKind::Move, minute).moved_to(0, format!("Renamed {id}"));

        let set = categorize(vec![
            entry(1, ChangeKind::Create, 1),
            moved(1, 2),
            moved(2, 1),
            entry(2, ChangeKind::Edit, 3),
            moved(3, 1),
            entry(3, ChangeKind::Delete, 4),
            moved(4, 1),
        ]);

        assert_eq!(set.new[&1].title, "Renamed 1");
        assert!(set.moved[&2].content_changed);
        assert_eq!(set.moved[&2].old_title, "Page 2");
        assert_eq!(set.moved[&2].new_title, "Renamed 2");
        assert_eq!(set.deleted, BTreeSet::from([3]));
        assert!(!set.moved[&4].content_changed);
        assert!(set.is_disjoint());
    }

    #[test]
    fn test_carry_over_precedes_feed() {
        let mut carry = ChangeSet::default();
        carry.modified.insert(7);
        carry.new.insert(
            8,
            NewPage {
                namespace: 0,
                title: "Eight".to_string(),
            },
        );

        let set = categorize_onto(&carry, vec![entry(7, ChangeKind::Delete, 1)]);
        assert_eq!(set.deleted, BTreeSet::from([7]));
        assert!(set.new.contains_key(&8));
    }

    #[tokio::test]
    async fn test_no_baseline_skips_origin() {
        let origin = Arc::new(InMemoryOrigin::new());
        origin.set_feed_down(true);
        let detector = ChangeDetector::new(origin);

        let set = detector.detect(None).await.unwrap();
        assert!(set.requires_full_scrape);
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_feed_failure_is_surfaced() {
        let origin = Arc::new(InMemoryOrigin::new());
        origin.set_feed_down(true);
        let detector = ChangeDetector::new(origin);

        let result = detector.detect_since(at(0), &ChangeSet::default()).await;
        assert!(matches!(result, Err(SyncError::ChangeFeed(_))));
    }
}
