//! File (media upload) metadata.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File metadata as reported by the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Natural key (title without the namespace prefix).
    pub name: String,
    /// Origin content hash (SHA-1 hex for MediaWiki).
    pub content_hash: String,
    pub size: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    /// Where the origin serves the bytes.
    pub url: String,
}

/// File row as stored in the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirroredFile {
    pub name: String,
    pub content_hash: String,
    pub size: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub local_path: PathBuf,
    /// SHA-256 of the bytes we actually stored.
    pub local_sha256: String,
    pub updated_at: DateTime<Utc>,
}

/// Origin file listing partitioned against the mirror's stored hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChangeSet {
    pub to_download: Vec<FileInfo>,
    pub unchanged: Vec<FileInfo>,
}

impl FileChangeSet {
    /// Partition a listing by comparing origin hashes with stored hashes.
    ///
    /// Files missing from `stored` are always downloaded. The result is sorted
    /// by name so progress through `to_download` can be checkpointed.
    pub fn partition(listing: Vec<FileInfo>, stored: &HashMap<String, String>) -> Self {
        let mut set = Self::default();
        for info in listing {
            match stored.get(&info.name) {
                Some(hash) if hash.eq_ignore_ascii_case(&info.content_hash) => {
                    set.unchanged.push(info)
                }
                _ => set.to_download.push(info),
            }
        }
        set.to_download.sort_by(|a, b| a.name.cmp(&b.name));
        set.unchanged.sort_by(|a, b| a.name.cmp(&b.name));
        set
    }

    pub fn is_empty(&self) -> bool {
        self.to_download.is_empty()
    }
}
