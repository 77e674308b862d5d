//! On-disk storage for mirrored file bytes.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Size mismatch for {name}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },
}

/// Where a file landed and the digest of what was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub sha256: String,
}

/// Hash-prefixed file store rooted at the configured files directory.
///
/// Layout: `{root}/{sha[0..2]}/{sanitized_stem}-{sha[0..8]}.{ext}`
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str, sha256: &str, mime_type: &str) -> PathBuf {
        let (stem, extension) = split_name(name, mime_type);
        self.root
            .join(&sha256[..2])
            .join(format!("{}-{}.{}", sanitize(&stem), &sha256[..8], extension))
    }

    /// Write `bytes` atomically: temp file in the target directory, then rename.
    pub fn write(&self, name: &str, mime_type: &str, bytes: &[u8]) -> Result<StoredFile, StorageError> {
        let sha256 = hex::encode(Sha256::digest(bytes));
        let path = self.path_for(name, &sha256, mime_type);
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();

        std::fs::create_dir_all(&parent).map_err(|source| StorageError::Io {
            path: parent.clone(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|source| StorageError::Io {
            path: parent.clone(),
            source,
        })?;
        tmp.write_all(bytes).map_err(|source| StorageError::Io {
            path: tmp.path().to_path_buf(),
            source,
        })?;
        tmp.persist(&path).map_err(|e| StorageError::Io {
            path: path.clone(),
            source: e.error,
        })?;

        Ok(StoredFile { path, sha256 })
    }

    /// Remove a superseded file. Missing files are not an error.
    pub fn remove(&self, path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// MIME type to record for downloaded bytes.
///
/// Trusts the origin unless it sent nothing useful, then sniffs the content
/// and finally guesses from the name.
pub fn detect_mime(bytes: &[u8], declared: &str, name: &str) -> String {
    if !declared.is_empty() && declared != "application/octet-stream" {
        return declared.to_string();
    }
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn split_name(name: &str, mime_type: &str) -> (String, String) {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .or_else(|| {
            mime_guess::get_mime_extensions_str(mime_type)
                .and_then(|exts| exts.first())
                .map(|e| e.to_string())
        })
        .unwrap_or_else(|| "bin".to_string());
    (stem, extension)
}

fn sanitize(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(64)
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}
