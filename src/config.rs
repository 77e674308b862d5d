//! Configuration management using the prefer crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::origin::{MediaWikiClient, RetryPolicy};
use crate::repository::DbContext;
use crate::storage::FileStore;
use crate::sync::SyncOptions;

/// Default database filename.
const DEFAULT_DATABASE_FILENAME: &str = "wikisync.db";

/// Default files subdirectory name.
const FILES_SUBDIR: &str = "files";

/// Environment variable naming the origin's `api.php`.
pub const API_URL_ENV: &str = "WIKISYNC_API_URL";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "WIKISYNC_DATA_DIR";

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    pub database_filename: String,
    /// Where downloaded file bytes are stored.
    pub files_dir: PathBuf,
    /// Origin `api.php` URL.
    pub api_url: Option<String>,
    /// Overrides the built-in user agent.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Delay between requests in milliseconds.
    pub request_delay_ms: u64,
    pub retry: RetryPolicy,
    /// Concurrent fetches per phase.
    pub workers: usize,
    /// Minutes without a heartbeat before a running record is abandoned.
    pub stale_after_minutes: i64,
    pub sync_files: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wikisync");

        Self {
            files_dir: data_dir.join(FILES_SUBDIR),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            api_url: None,
            user_agent: None,
            request_timeout: 30,
            request_delay_ms: 250,
            retry: RetryPolicy::default(),
            workers: 4,
            stale_after_minutes: 30,
            sync_files: true,
        }
    }
}

impl Settings {
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            files_dir: data_dir.join(FILES_SUBDIR),
            data_dir,
            ..Default::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.database_path().display())
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.files_dir)?;
        Ok(())
    }

    pub fn create_db_context(&self) -> DbContext {
        DbContext::from_sqlite_path(&self.database_path())
    }

    pub fn file_store(&self) -> FileStore {
        FileStore::new(&self.files_dir)
    }

    /// Build the origin client. Fails when no API URL is configured.
    pub fn origin_client(&self) -> anyhow::Result<MediaWikiClient> {
        let api_url = self.api_url.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "No origin API URL configured (set {} or api_url in the config file)",
                API_URL_ENV
            )
        })?;
        let client = MediaWikiClient::new(
            api_url,
            self.user_agent.as_deref(),
            Duration::from_secs(self.request_timeout),
            Duration::from_millis(self.request_delay_ms),
            self.retry.clone(),
        )?;
        Ok(client)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            workers: self.workers.max(1),
            sync_files: self.sync_files,
            fresh: false,
            stale_after: chrono::Duration::minutes(self.stale_after_minutes),
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Delay between requests in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_min_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_max_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_after_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_files: Option<bool>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a `wikisync` config file in the standard locations.
    pub async fn load() -> Self {
        match prefer::load("wikisync").await {
            Ok(found) => match found.source_path() {
                Some(path) => Self::load_from_path(path).await.unwrap_or_else(|e| {
                    tracing::warn!("{}", e);
                    Self::default()
                }),
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load a config file, parsed by extension (TOML, YAML, or JSON).
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory of the config file, for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Expand `~` and resolve relative paths against `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
            settings.files_dir = settings.data_dir.join(FILES_SUBDIR);
        }
        if let Some(ref files_dir) = self.files_dir {
            settings.files_dir = self.resolve_path(files_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref api_url) = self.api_url {
            settings.api_url = Some(api_url.clone());
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(delay) = self.request_delay_ms {
            settings.request_delay_ms = delay;
        }
        if let Some(retries) = self.max_retries {
            settings.retry.max_retries = retries as usize;
        }
        if let Some(ms) = self.retry_min_delay_ms {
            settings.retry.min_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.retry_max_delay_ms {
            settings.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(workers) = self.workers {
            settings.workers = workers as usize;
        }
        if let Some(minutes) = self.stale_after_minutes {
            settings.stale_after_minutes = minutes as i64;
        }
        if let Some(sync_files) = self.sync_files {
            settings.sync_files = sync_files;
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory (--data flag).
    pub data: Option<PathBuf>,
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Resolve settings from the config file, environment, and flags, in
/// increasing order of precedence.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await.unwrap_or_else(|e| {
            tracing::warn!("{}", e);
            Config::default()
        }),
        None => Config::load().await,
    };

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    if let Some(api_url) = env_value(API_URL_ENV) {
        tracing::debug!("Using {} from environment: {}", API_URL_ENV, api_url);
        settings.api_url = Some(api_url);
    }

    let data_dir = options
        .data
        .map(|d| d.display().to_string())
        .or_else(|| env_value(DATA_DIR_ENV));
    if let Some(data_dir) = data_dir {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        settings.data_dir = config.resolve_path(&data_dir, &cwd);
        if config.files_dir.is_none() {
            settings.files_dir = settings.data_dir.join(FILES_SUBDIR);
        }
    }

    (settings, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_apply_resolves_relative_paths() {
        let config = Config {
            data_dir: Some("mirror".to_string()),
            api_url: Some("https://wiki.example/w/api.php".to_string()),
            workers: Some(8),
            max_retries: Some(1),
            ..Default::default()
        };
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/etc/wikisync"));

        assert_eq!(settings.data_dir, PathBuf::from("/etc/wikisync/mirror"));
        assert_eq!(settings.files_dir, PathBuf::from("/etc/wikisync/mirror/files"));
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.retry.max_retries, 1);
        assert_eq!(
            settings.database_url(),
            "sqlite:/etc/wikisync/mirror/wikisync.db"
        );
    }

    #[tokio::test]
    async fn test_load_toml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wikisync.toml");
        std::fs::write(
            &path,
            "api_url = \"https://wiki.example/w/api.php\"\nsync_files = false\nrequest_delay_ms = 0\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.base_dir(), Some(dir.path().to_path_buf()));

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, dir.path());
        assert!(!settings.sync_files);
        assert_eq!(settings.request_delay_ms, 0);
        assert!(settings.origin_client().is_ok());
    }

    #[test]
    fn test_origin_client_requires_url() {
        let settings = Settings::with_data_dir(PathBuf::from("/tmp/mirror"));
        assert!(settings.origin_client().is_err());
    }
}
