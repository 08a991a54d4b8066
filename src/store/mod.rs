//! Desired-state store.
//!
//! # Data Flow
//! ```text
//! startup:  config.json ──parse──▶ GlobalConfig
//!              │ missing / unparseable
//!              ▼
//!           legacy proxies.json / test_urls.json / settings.json ──▶ GlobalConfig
//!              ▼
//!           save (establishes config.json)
//!
//! mutation: validate ──▶ lock ──▶ mutate ──▶ save (tmp + rename) ──▶ unlock
//! ```
//!
//! The in-memory [`GlobalConfig`] is authoritative for the running process:
//! a failed save is reported to the caller but never rolls the change back.

mod migrate;
pub mod model;
pub mod proxy;
pub mod watcher;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

pub use migrate::{
    MigrationReport, LEGACY_PROXIES_FILE, LEGACY_SETTINGS_FILE, LEGACY_TEST_URLS_FILE, STATE_FILE,
};
pub use model::{GlobalConfig, PolicySettings, SelectionStrategy, SettingsPatch};
pub use proxy::{parse_proxy_text, Credentials, ParsedProxies, ProxyEntry, ProxyParseError, RejectedLine};

use migrate::UnifiedRead;

/// Malformed operator input. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no valid proxies provided")]
    NoValidProxies,

    #[error("timeout must be at least 1 second (got {0})")]
    TimeoutTooSmall(i64),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },

    #[error("invalid test URL '{0}'")]
    InvalidTestUrl(String),
}

/// Durable-storage failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("state file {path} is unreadable: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// A mutation applied in memory, with the outcome of persisting it.
#[derive(Debug)]
pub struct Saved<T> {
    pub value: T,
    pub persist_error: Option<StoreError>,
}

/// Result of `update_settings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsChange {
    pub previous: PolicySettings,
    pub current: PolicySettings,
}

impl SettingsChange {
    pub fn chain_changed(&self) -> bool {
        self.current.chain_differs(&self.previous)
    }

    pub fn restart_required(&self) -> bool {
        self.current.restart_differs(&self.previous)
    }
}

/// Sole owner of the desired state.
pub struct ConfigStore {
    dir: PathBuf,
    path: PathBuf,
    state: Mutex<GlobalConfig>,
}

impl ConfigStore {
    /// Load desired state from `dir`, migrating legacy files when the unified
    /// file is missing or unparseable, then write the unified file.
    pub async fn load(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(STATE_FILE);

        let config = match migrate::read_unified(&path).await {
            UnifiedRead::Loaded(config) => {
                tracing::info!(
                    path = %path.display(),
                    proxies = config.proxies.len(),
                    "Loaded desired state"
                );
                return Self { dir, path, state: Mutex::new(config) };
            }
            UnifiedRead::Missing => {
                tracing::info!(path = %path.display(), "No state file, checking legacy layout");
                migrate::migrate_legacy(&dir).await
            }
            UnifiedRead::Unreadable(reason) => {
                let moved = migrate::quarantine(&path).await;
                tracing::warn!(
                    path = %path.display(),
                    reason = %reason,
                    moved_to = ?moved,
                    "State file unreadable, falling back to legacy layout"
                );
                migrate::migrate_legacy(&dir).await
            }
        };

        let (config, report) = config;
        if report.found_anything() {
            tracing::info!(?report, "Migrated legacy desired state");
        }
        if let Err(e) = save(&path, &config).await {
            tracing::error!(error = %e, "Failed to establish state file");
        }

        Self { dir, path, state: Mutex::new(config) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn snapshot(&self) -> GlobalConfig {
        self.state.lock().await.clone()
    }

    pub async fn policy(&self) -> PolicySettings {
        self.state.lock().await.policy.clone()
    }

    pub async fn proxies(&self) -> Vec<String> {
        self.state.lock().await.proxies.clone()
    }

    pub async fn proxy_count(&self) -> usize {
        self.state.lock().await.proxies.len()
    }

    pub async fn test_urls(&self) -> Vec<String> {
        self.state.lock().await.test_urls.clone()
    }

    /// Replace the proxy list from free text.
    pub async fn update_proxies(&self, raw: &str) -> Result<Saved<ParsedProxies>, ValidationError> {
        let parsed = parse_proxy_text(raw);
        if parsed.entries.is_empty() {
            return Err(ValidationError::NoValidProxies);
        }

        let mut state = self.state.lock().await;
        state.proxies = parsed.canonical.clone();
        let persist_error = self.persist(&state).await;

        tracing::info!(
            proxies = parsed.canonical.len(),
            rejected = parsed.rejected.len(),
            "Proxy list updated"
        );
        Ok(Saved { value: parsed, persist_error })
    }

    /// Shallow-merge a settings patch.
    pub async fn update_settings(&self, patch: &SettingsPatch) -> Result<Saved<SettingsChange>, ValidationError> {
        let mut state = self.state.lock().await;
        let previous = state.policy.clone();
        let current = previous.merged(patch)?;

        state.policy = current.clone();
        let persist_error = self.persist(&state).await;

        tracing::info!(?current, "Settings updated");
        Ok(Saved {
            value: SettingsChange { previous, current },
            persist_error,
        })
    }

    /// Replace the connectivity-check targets.
    pub async fn replace_test_urls(&self, urls: Vec<String>) -> Result<Saved<Vec<String>>, ValidationError> {
        let mut cleaned = Vec::with_capacity(urls.len());
        for url in urls {
            let url = url.trim().to_string();
            if url.is_empty() {
                continue;
            }
            match Url::parse(&url) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => cleaned.push(url),
                _ => return Err(ValidationError::InvalidTestUrl(url)),
            }
        }

        let mut state = self.state.lock().await;
        state.test_urls = cleaned.clone();
        let persist_error = self.persist(&state).await;
        Ok(Saved { value: cleaned, persist_error })
    }

    /// Re-read the unified file after an external edit.
    ///
    /// Returns `true` when the on-disk state differed and replaced memory.
    pub async fn reload_from_disk(&self) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match migrate::read_unified(&self.path).await {
            UnifiedRead::Loaded(config) => {
                if config == *state {
                    return Ok(false);
                }
                *state = config;
                tracing::info!(path = %self.path.display(), "Desired state reloaded from disk");
                Ok(true)
            }
            UnifiedRead::Missing => Ok(false),
            UnifiedRead::Unreadable(reason) => Err(StoreError::Unreadable {
                path: self.path.clone(),
                reason,
            }),
        }
    }

    /// Write the current state. Failure is logged and returned, never fatal.
    pub async fn save(&self) -> Option<StoreError> {
        let state = self.state.lock().await;
        self.persist(&state).await
    }

    async fn persist(&self, state: &GlobalConfig) -> Option<StoreError> {
        match save(&self.path, state).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist desired state; keeping in-memory copy");
                Some(e)
            }
        }
    }
}

/// Atomically replace the state file (write temp, then rename).
async fn save(path: &Path, config: &GlobalConfig) -> Result<(), StoreError> {
    let body = serde_json::to_vec_pretty(config)?;
    let write_err = |source| StoreError::Write { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;

    tracing::debug!(path = %path.display(), bytes = body.len(), "Saved desired state");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_dir_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path()).await;

        assert!(store.path().exists());
        assert_eq!(store.snapshot().await, GlobalConfig::default());
    }

    #[tokio::test]
    async fn test_migrates_legacy_files_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LEGACY_PROXIES_FILE), r#"["http://1.2.3.4:8080"]"#).unwrap();
        std::fs::write(dir.path().join(LEGACY_TEST_URLS_FILE), r#"["https://example.com"]"#).unwrap();

        let first = ConfigStore::load(dir.path()).await.snapshot().await;
        assert_eq!(first.proxies, vec!["http://1.2.3.4:8080"]);
        assert_eq!(first.test_urls, vec!["https://example.com"]);
        assert!(dir.path().join(STATE_FILE).exists());

        // Legacy files are ignored once the unified file exists.
        std::fs::write(dir.path().join(LEGACY_PROXIES_FILE), r#"["http://9.9.9.9:1"]"#).unwrap();
        let second = ConfigStore::load(dir.path()).await.snapshot().await;
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_legacy_settings_and_bad_shapes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LEGACY_PROXIES_FILE), r#"{"not":"an array"}"#).unwrap();
        std::fs::write(
            dir.path().join(LEGACY_SETTINGS_FILE),
            r#"{"concurrency":4,"strategy":"fifo","maxRetries":3,"timeout":20}"#,
        )
        .unwrap();

        let config = ConfigStore::load(dir.path()).await.snapshot().await;
        assert!(config.proxies.is_empty());
        assert_eq!(config.policy.strategy, SelectionStrategy::Fifo);
        assert_eq!(config.policy.concurrency, 4);
        assert_eq!(config.policy.timeout, 20);
    }

    #[tokio::test]
    async fn test_corrupt_state_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), "{ not json").unwrap();
        std::fs::write(dir.path().join(LEGACY_PROXIES_FILE), r#"["http://5.5.5.5:80"]"#).unwrap();

        let store = ConfigStore::load(dir.path()).await;
        assert_eq!(store.proxies().await, vec!["http://5.5.5.5:80"]);

        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .any(|e| e.file_name().to_string_lossy().contains("corrupt"));
        assert!(quarantined);
    }

    #[tokio::test]
    async fn test_unknown_strategy_keeps_stored_proxies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(STATE_FILE),
            r#"{"system":{"strategy":"hash","maxRetries":2,"timeout":5},"proxies":["http://7.7.7.7:3128"],"testUrls":[]}"#,
        )
        .unwrap();

        let store = ConfigStore::load(dir.path()).await;
        assert_eq!(store.proxies().await, vec!["http://7.7.7.7:3128"]);
        let policy = store.policy().await;
        assert_eq!(policy.strategy, SelectionStrategy::RoundRobin);
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.timeout, 5);

        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .any(|e| e.file_name().to_string_lossy().contains("corrupt"));
        assert!(!quarantined);
    }

    #[tokio::test]
    async fn test_update_proxies_counts_directive_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path()).await;

        let saved = store
            .update_proxies("socks5://u:p@10.0.0.1:1080\n# comment\n\nhttp://10.0.0.2:8888")
            .await
            .unwrap();
        assert!(saved.persist_error.is_none());
        assert_eq!(saved.value.entries.len(), 2);
        assert_eq!(store.proxy_count().await, 2);

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk["proxies"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_proxies_rejects_comment_only_text() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path()).await;
        store.update_proxies("http://1.1.1.1:80").await.unwrap();

        let err = store.update_proxies("# nothing\n\n   \n#http://2.2.2.2:80").await.unwrap_err();
        assert_eq!(err, ValidationError::NoValidProxies);
        assert_eq!(store.proxies().await, vec!["http://1.1.1.1:80"]);
    }

    #[tokio::test]
    async fn test_update_settings_validates_and_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path()).await;

        let bad = SettingsPatch { timeout: Some(0), ..Default::default() };
        assert!(store.update_settings(&bad).await.is_err());
        assert_eq!(store.policy().await, PolicySettings::default());

        let patch = SettingsPatch { concurrency: Some(2), ..Default::default() };
        let change = store.update_settings(&patch).await.unwrap().value;
        assert!(change.restart_required());
        assert!(!change.chain_changed());
    }

    #[tokio::test]
    async fn test_save_failure_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path()).await;

        // Replace the state file with a directory so rename fails.
        std::fs::remove_file(store.path()).unwrap();
        std::fs::create_dir(store.path()).unwrap();
        std::fs::write(store.path().join("occupied"), b"x").unwrap();

        let saved = store.update_proxies("http://3.3.3.3:3128").await.unwrap();
        assert!(saved.persist_error.is_some());
        assert_eq!(store.proxies().await, vec!["http://3.3.3.3:3128"]);
    }

    #[tokio::test]
    async fn test_test_urls_validation() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path()).await;

        let err = store.replace_test_urls(vec!["ftp://example.com".into()]).await.unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTestUrl(_)));

        let saved = store
            .replace_test_urls(vec![" https://example.com/ip ".into(), "".into()])
            .await
            .unwrap();
        assert_eq!(saved.value, vec!["https://example.com/ip"]);
    }

    #[tokio::test]
    async fn test_reload_detects_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path()).await;
        assert!(!store.reload_from_disk().await.unwrap());

        std::fs::write(
            store.path(),
            r#"{"system":{"strategy":"random","maxRetries":1,"timeout":10},"proxies":["http://7.7.7.7:80"],"testUrls":[]}"#,
        )
        .unwrap();
        assert!(store.reload_from_disk().await.unwrap());
        assert_eq!(store.proxies().await, vec!["http://7.7.7.7:80"]);
        assert_eq!(store.policy().await.strategy, SelectionStrategy::Random);
    }
}
