//! Typed MediaWiki Action API responses (`formatversion=2`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{ChangeEntry, ChangeKind, FileInfo, PageId, RevisionRecord};

/// Envelope shared by every `action=query` response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<Q> {
    pub error: Option<ApiErrorBody>,
    /// Parameters to merge into the next request; absent on the last page.
    #[serde(rename = "continue")]
    pub continuation: Option<BTreeMap<String, serde_json::Value>>,
    pub query: Option<Q>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    #[serde(default)]
    pub info: String,
}

#[derive(Debug, Deserialize)]
pub struct RecentChangesQuery {
    #[serde(default)]
    pub recentchanges: Vec<RecentChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecentChange {
    #[serde(rename = "type")]
    pub kind: String,
    pub ns: i32,
    pub title: String,
    #[serde(default)]
    pub pageid: i64,
    #[serde(default)]
    pub revid: i64,
    pub timestamp: DateTime<Utc>,
    pub logtype: Option<String>,
    pub logaction: Option<String>,
    pub logparams: Option<serde_json::Value>,
}

impl RecentChange {
    /// Map to a change entry. Entries that do not affect a page row
    /// (uploads, user rights, categorization) map to `None`.
    pub fn into_entry(self) -> Option<ChangeEntry> {
        if self.pageid <= 0 {
            return None;
        }
        let revision = (self.revid > 0).then_some(self.revid);
        let base = |kind| ChangeEntry::new(self.pageid, self.ns, self.title.clone(), kind, self.timestamp);

        let entry = match self.kind.as_str() {
            "new" => base(ChangeKind::Create),
            "edit" => base(ChangeKind::Edit),
            "log" => match (self.logtype.as_deref(), self.logaction.as_deref()) {
                (Some("delete"), Some("delete")) => base(ChangeKind::Delete),
                (Some("delete"), Some("restore")) => base(ChangeKind::Create),
                (Some("move"), _) => {
                    let params = self.logparams.as_ref()?;
                    let target_title = params.get("target_title")?.as_str()?.to_string();
                    let target_ns = params
                        .get("target_ns")
                        .and_then(|v| v.as_i64())
                        .unwrap_or(self.ns as i64) as i32;
                    base(ChangeKind::Move).moved_to(target_ns, target_title)
                }
                _ => return None,
            },
            _ => return None,
        };

        Some(match revision {
            Some(id) => entry.with_revision(id),
            None => entry,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RevisionsQuery {
    #[serde(default)]
    pub pages: Vec<RevisionPage>,
}

#[derive(Debug, Deserialize)]
pub struct RevisionPage {
    pub pageid: Option<i64>,
    #[serde(default)]
    pub missing: bool,
    #[serde(default)]
    pub revisions: Vec<ApiRevision>,
}

#[derive(Debug, Deserialize)]
pub struct ApiRevision {
    pub revid: i64,
    #[serde(default)]
    pub parentid: i64,
    #[serde(default)]
    pub minor: bool,
    pub user: Option<String>,
    #[serde(default)]
    pub userid: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub size: u64,
    pub sha1: Option<String>,
    pub comment: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub slots: Option<RevisionSlots>,
}

#[derive(Debug, Deserialize)]
pub struct RevisionSlots {
    pub main: Option<MainSlot>,
}

#[derive(Debug, Deserialize)]
pub struct MainSlot {
    pub content: Option<String>,
}

impl ApiRevision {
    pub fn into_record(self, page_id: PageId) -> RevisionRecord {
        let content = self.slots.and_then(|s| s.main).and_then(|m| m.content);
        let content_hash = match (&self.sha1, &content) {
            (Some(sha1), _) => sha1.clone(),
            (None, Some(body)) => RevisionRecord::compute_hash(body),
            (None, None) => String::new(),
        };
        RevisionRecord {
            revision_id: self.revid,
            page_id,
            parent_id: (self.parentid > 0).then_some(self.parentid),
            timestamp: self.timestamp,
            user_id: (self.userid > 0).then_some(self.userid),
            user_name: self.user,
            comment: self.comment,
            content,
            content_hash,
            size: self.size,
            minor: self.minor,
            tags: self.tags,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AllImagesQuery {
    #[serde(default)]
    pub allimages: Vec<ApiImage>,
}

#[derive(Debug, Deserialize)]
pub struct ApiImage {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub size: u64,
    pub mime: Option<String>,
    #[serde(default)]
    pub sha1: String,
}

impl From<ApiImage> for FileInfo {
    fn from(image: ApiImage) -> Self {
        let mime_type = image.mime.unwrap_or_else(|| {
            mime_guess::from_path(&image.name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
        FileInfo {
            name: image.name,
            content_hash: image.sha1,
            size: image.size,
            mime_type,
            uploaded_at: image.timestamp,
            url: image.url,
        }
    }
}
