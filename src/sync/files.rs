//! File delta fetch and apply.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::SyncError;
use crate::models::{FileChangeSet, FileInfo, MirroredFile};
use crate::origin::{OriginClient, OriginError};
use crate::repository::FileRepository;
use crate::storage::{detect_mime, FileStore, StorageError};

/// Downloads files whose origin hash differs from the mirrored one.
#[derive(Clone)]
pub struct FileDeltaFetcher {
    origin: Arc<dyn OriginClient>,
    files: FileRepository,
    store: FileStore,
}

impl FileDeltaFetcher {
    pub fn new(origin: Arc<dyn OriginClient>, files: FileRepository, store: FileStore) -> Self {
        Self {
            origin,
            files,
            store,
        }
    }

    /// List origin files and split them into downloads and unchanged.
    pub async fn plan(&self) -> Result<FileChangeSet, SyncError> {
        let listing = self.origin.all_file_metadata().await?;
        let names: Vec<String> = listing.iter().map(|f| f.name.clone()).collect();
        let stored = self.files.stored_hashes(&names).await?;

        let plan = FileChangeSet::partition(listing, &stored);
        debug!(
            "Files: {} to download, {} unchanged",
            plan.to_download.len(),
            plan.unchanged.len()
        );
        Ok(plan)
    }

    pub async fn fetch(&self, info: &FileInfo) -> Result<Vec<u8>, OriginError> {
        self.origin.download(info).await
    }

    /// Store downloaded bytes and replace the file's metadata row.
    pub async fn apply(&self, info: &FileInfo, bytes: Vec<u8>) -> Result<MirroredFile, SyncError> {
        if info.size > 0 && bytes.len() as u64 != info.size {
            return Err(StorageError::SizeMismatch {
                name: info.name.clone(),
                expected: info.size,
                actual: bytes.len() as u64,
            }
            .into());
        }

        let mime_type = detect_mime(&bytes, &info.mime_type, &info.name);
        let stored = self.store.write(&info.name, &mime_type, &bytes)?;
        let previous = self.files.get(&info.name).await?;

        let file = MirroredFile {
            name: info.name.clone(),
            content_hash: info.content_hash.clone(),
            size: bytes.len() as u64,
            mime_type,
            uploaded_at: info.uploaded_at,
            local_path: stored.path,
            local_sha256: stored.sha256,
            updated_at: Utc::now(),
        };
        self.files.replace(&file).await?;

        if let Some(old) = previous.filter(|old| old.local_path != file.local_path) {
            if let Err(e) = self.store.remove(&old.local_path) {
                warn!("Could not remove superseded copy of {}: {}", info.name, e);
            }
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::InMemoryOrigin;
    use crate::repository::test_support::setup_test_db;
    use chrono::TimeZone;

    fn icon(hash: &str, size: u64) -> FileInfo {
        FileInfo {
            name: "icon.png".to_string(),
            content_hash: hash.to_string(),
            size,
            mime_type: "image/png".to_string(),
            uploaded_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            url: "https://wiki.example/images/icon.png".to_string(),
        }
    }

    #[tokio::test]
    async fn test_changed_hash_replaces_row_and_file() {
        let (ctx, dir) = setup_test_db().await;
        let origin = Arc::new(InMemoryOrigin::new());
        let fetcher = FileDeltaFetcher::new(
            origin.clone(),
            ctx.files(),
            FileStore::new(dir.path().join("files")),
        );

        origin.put_file(icon("aaa", 3), b"one".to_vec());
        let plan = fetcher.plan().await.unwrap();
        assert_eq!(plan.to_download.len(), 1);
        let first = fetcher
            .apply(&plan.to_download[0], b"one".to_vec())
            .await
            .unwrap();

        origin.put_file(icon("aaa", 3), b"one".to_vec());
        assert!(fetcher.plan().await.unwrap().to_download.is_empty());

        origin.put_file(icon("bbb", 3), b"two".to_vec());
        let plan = fetcher.plan().await.unwrap();
        assert_eq!(plan.to_download.len(), 1);
        let second = fetcher
            .apply(&plan.to_download[0], b"two".to_vec())
            .await
            .unwrap();

        assert_ne!(first.local_path, second.local_path);
        assert!(!first.local_path.exists());
        assert_eq!(std::fs::read(&second.local_path).unwrap(), b"two");
        assert_eq!(ctx.files().get("icon.png").await.unwrap().unwrap().content_hash, "bbb");
        assert_eq!(ctx.files().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_size_mismatch_is_rejected() {
        let (ctx, dir) = setup_test_db().await;
        let fetcher = FileDeltaFetcher::new(
            Arc::new(InMemoryOrigin::new()),
            ctx.files(),
            FileStore::new(dir.path().join("files")),
        );

        let result = fetcher.apply(&icon("aaa", 10), b"short".to_vec()).await;
        assert!(matches!(
            result,
            Err(SyncError::Storage(StorageError::SizeMismatch { .. }))
        ));
        assert!(ctx.files().get("icon.png").await.unwrap().is_none());
    }
}
