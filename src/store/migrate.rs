//! Reading the unified state file and migrating legacy layouts.
//!
//! Legacy layouts (each optional, read independently):
//! - `proxies.json`: JSON array of proxy lines
//! - `test_urls.json`: JSON array of URLs
//! - `settings.json`: flat settings object

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::store::model::{GlobalConfig, StoredSettings, StoredState};

pub const STATE_FILE: &str = "config.json";
pub const LEGACY_PROXIES_FILE: &str = "proxies.json";
pub const LEGACY_TEST_URLS_FILE: &str = "test_urls.json";
pub const LEGACY_SETTINGS_FILE: &str = "settings.json";

/// Outcome of reading the unified file.
pub(crate) enum UnifiedRead {
    Missing,
    Unreadable(String),
    Loaded(GlobalConfig),
}

pub(crate) async fn read_unified(path: &Path) -> UnifiedRead {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return UnifiedRead::Missing,
        Err(e) => return UnifiedRead::Unreadable(e.to_string()),
    };
    match serde_json::from_str::<StoredState>(&content) {
        Ok(stored) => UnifiedRead::Loaded(stored.into_config()),
        Err(e) => UnifiedRead::Unreadable(e.to_string()),
    }
}

/// What a migration pass found.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub proxies: Option<usize>,
    pub test_urls: Option<usize>,
    pub settings: bool,
}

impl MigrationReport {
    pub fn found_anything(&self) -> bool {
        self.proxies.is_some() || self.test_urls.is_some() || self.settings
    }
}

async fn read_legacy<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read legacy file");
            }
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Legacy file has unexpected shape, skipping");
            None
        }
    }
}

/// Build a fresh default state and copy in whatever the legacy files hold.
pub(crate) async fn migrate_legacy(dir: &Path) -> (GlobalConfig, MigrationReport) {
    let mut config = GlobalConfig::default();
    let mut report = MigrationReport::default();

    if let Some(proxies) = read_legacy::<Vec<String>>(&dir.join(LEGACY_PROXIES_FILE)).await {
        report.proxies = Some(proxies.len());
        config.proxies = proxies;
    }
    if let Some(urls) = read_legacy::<Vec<String>>(&dir.join(LEGACY_TEST_URLS_FILE)).await {
        report.test_urls = Some(urls.len());
        config.test_urls = urls;
    }
    if let Some(stored) = read_legacy::<StoredSettings>(&dir.join(LEGACY_SETTINGS_FILE)).await {
        report.settings = stored.apply_to(&mut config.policy);
    }

    (config, report)
}

/// Move an unparseable state file aside so migration does not destroy it.
pub(crate) async fn quarantine(path: &Path) -> Option<PathBuf> {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let target = path.with_extension(format!("json.corrupt-{}", stamp));
    match tokio::fs::rename(path, &target).await {
        Ok(()) => Some(target),
        Err(_) => None,
    }
}
