//! Change feed entries and the categorized change set for one run.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PageId, RevisionId};

/// What happened to a page in a single change feed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Edit,
    Delete,
    Move,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Move => "move",
        }
    }
}

/// One entry of the origin's change feed, already typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub page_id: PageId,
    pub namespace: i32,
    /// Title at the time of the change. For moves, the old title.
    pub title: String,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
    /// Destination namespace for moves.
    pub new_namespace: Option<i32>,
    /// Destination title for moves.
    pub new_title: Option<String>,
    /// Revision created by the change, if any.
    pub revision_id: Option<RevisionId>,
}

impl ChangeEntry {
    pub fn new(
        page_id: PageId,
        namespace: i32,
        title: impl Into<String>,
        kind: ChangeKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            page_id,
            namespace,
            title: title.into(),
            kind,
            timestamp,
            new_namespace: None,
            new_title: None,
            revision_id: None,
        }
    }

    pub fn with_revision(mut self, revision_id: RevisionId) -> Self {
        self.revision_id = Some(revision_id);
        self
    }

    pub fn moved_to(mut self, namespace: i32, title: impl Into<String>) -> Self {
        self.new_namespace = Some(namespace);
        self.new_title = Some(title.into());
        self
    }

    /// Title the page carries after this change.
    pub fn current_title(&self) -> &str {
        self.new_title.as_deref().unwrap_or(&self.title)
    }

    /// Namespace the page is in after this change.
    pub fn current_namespace(&self) -> i32 {
        self.new_namespace.unwrap_or(self.namespace)
    }
}

/// A page first seen in this window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPage {
    pub namespace: i32,
    pub title: String,
}

/// A page renamed in this window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedPage {
    pub namespace: i32,
    pub old_title: String,
    pub new_title: String,
    /// Also edited in the window; revisions and links must be refreshed.
    pub content_changed: bool,
}

/// Disjoint partition of the page ids touched in one change window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeSet {
    pub new: BTreeMap<PageId, NewPage>,
    pub modified: BTreeSet<PageId>,
    pub deleted: BTreeSet<PageId>,
    pub moved: BTreeMap<PageId, MovedPage>,
    /// Last title the feed reported for each modified page.
    pub modified_titles: BTreeMap<PageId, NewPage>,
    /// No baseline exists; the engine cannot run incrementally.
    pub requires_full_scrape: bool,
}

impl ChangeSet {
    pub fn full_scrape_required() -> Self {
        Self {
            requires_full_scrape: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.moved.is_empty()
    }

    /// Total number of distinct page ids.
    pub fn len(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len() + self.moved.len()
    }

    /// Ids whose revision history must be refreshed, ascending.
    pub fn content_targets(&self) -> Vec<PageId> {
        let mut ids: BTreeSet<PageId> = self.new.keys().copied().collect();
        ids.extend(self.modified.iter().copied());
        ids.extend(
            self.moved
                .iter()
                .filter(|(_, m)| m.content_changed)
                .map(|(id, _)| *id),
        );
        ids.into_iter().collect()
    }

    /// The subset of this change set covering only `ids`.
    pub fn restrict(&self, ids: &BTreeSet<PageId>) -> ChangeSet {
        ChangeSet {
            new: self
                .new
                .iter()
                .filter(|(id, _)| ids.contains(id))
                .map(|(id, p)| (*id, p.clone()))
                .collect(),
            modified: self.modified.intersection(ids).copied().collect(),
            deleted: self.deleted.intersection(ids).copied().collect(),
            moved: self
                .moved
                .iter()
                .filter(|(id, _)| ids.contains(id))
                .map(|(id, m)| (*id, m.clone()))
                .collect(),
            modified_titles: self
                .modified_titles
                .iter()
                .filter(|(id, _)| ids.contains(id))
                .map(|(id, p)| (*id, p.clone()))
                .collect(),
            requires_full_scrape: false,
        }
    }

    /// Mark `page_id` modified, remembering its title when known.
    pub fn insert_modified(&mut self, page_id: PageId, title: Option<NewPage>) {
        self.modified.insert(page_id);
        if let Some(title) = title {
            self.modified_titles.insert(page_id, title);
        }
    }

    /// Check that no id appears in more than one category.
    pub fn is_disjoint(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.new
            .keys()
            .chain(self.modified.iter())
            .chain(self.deleted.iter())
            .chain(self.moved.keys())
            .all(|id| seen.insert(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_targets_include_edited_moves() {
        let mut set = ChangeSet::default();
        set.new.insert(
            5,
            NewPage {
                namespace: 0,
                title: "Five".to_string(),
            },
        );
        set.insert_modified(
            2,
            Some(NewPage {
                namespace: 0,
                title: "Two".to_string(),
            }),
        );
        set.moved.insert(
            9,
            MovedPage {
                namespace: 0,
                old_title: "Old".to_string(),
                new_title: "New".to_string(),
                content_changed: true,
            },
        );
        set.moved.insert(
            7,
            MovedPage {
                namespace: 0,
                old_title: "A".to_string(),
                new_title: "B".to_string(),
                content_changed: false,
            },
        );
        set.deleted.insert(1);

        assert_eq!(set.content_targets(), vec![2, 5, 9]);
        assert_eq!(set.len(), 5);
        assert!(set.is_disjoint());

        let carried = set.restrict(&BTreeSet::from([1, 9]));
        assert_eq!(carried.len(), 2);
        assert!(carried.deleted.contains(&1));
        assert!(carried.moved.contains_key(&9));
        assert!(carried.modified_titles.is_empty());

        let carried = set.restrict(&BTreeSet::from([2]));
        assert_eq!(carried.modified_titles[&2].title, "Two");
    }

    #[test]
    fn test_empty_json_object_decodes() {
        let set: ChangeSet = serde_json::from_str("{}").unwrap();
        assert!(set.is_empty());
        assert!(!set.requires_full_scrape);
    }
}
