//! Desired-state data model.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::store::ValidationError;

/// Upstream selection strategy applied by the engine's hop selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SelectionStrategy {
    #[default]
    #[serde(rename = "round", alias = "roundrobin", alias = "round_robin", alias = "rr")]
    RoundRobin,
    #[serde(rename = "random", alias = "rand")]
    Random,
    #[serde(rename = "fifo", alias = "ha")]
    Fifo,
}

impl SelectionStrategy {
    /// Name used in the engine's selector configuration.
    pub fn as_engine_str(&self) -> &'static str {
        match self {
            SelectionStrategy::RoundRobin => "round",
            SelectionStrategy::Random => "random",
            SelectionStrategy::Fifo => "fifo",
        }
    }
}

/// Policy applied to the upstream chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySettings {
    pub strategy: SelectionStrategy,
    pub max_retries: u32,
    /// Failure timeout in seconds. Always >= 1.
    #[serde(alias = "timeoutSeconds")]
    pub timeout: u32,
    /// Engine worker threads (`GOMAXPROCS`); 0 leaves the engine's default.
    /// Takes effect on the next engine restart only.
    #[serde(default)]
    pub concurrency: u32,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::RoundRobin,
            max_retries: 1,
            timeout: 10,
            concurrency: 0,
        }
    }
}

impl PolicySettings {
    /// Shallow-merge a partial update, validating the result.
    pub fn merged(&self, patch: &SettingsPatch) -> Result<PolicySettings, ValidationError> {
        let mut next = self.clone();

        if let Some(strategy) = patch.strategy {
            next.strategy = strategy;
        }
        if let Some(retries) = patch.max_retries {
            next.max_retries = u32::try_from(retries)
                .map_err(|_| ValidationError::OutOfRange { field: "maxRetries", value: retries })?;
        }
        if let Some(timeout) = patch.timeout {
            if timeout < 1 {
                return Err(ValidationError::TimeoutTooSmall(timeout));
            }
            next.timeout = u32::try_from(timeout)
                .map_err(|_| ValidationError::OutOfRange { field: "timeout", value: timeout })?;
        }
        if let Some(concurrency) = patch.concurrency {
            next.concurrency = u32::try_from(concurrency)
                .map_err(|_| ValidationError::OutOfRange { field: "concurrency", value: concurrency })?;
        }

        Ok(next)
    }

    /// True when fields pushed to the engine's chain differ.
    pub fn chain_differs(&self, other: &PolicySettings) -> bool {
        self.strategy != other.strategy
            || self.max_retries != other.max_retries
            || self.timeout != other.timeout
    }

    /// True when fields that only apply at engine launch differ.
    pub fn restart_differs(&self, other: &PolicySettings) -> bool {
        self.concurrency != other.concurrency
    }

    /// `failTimeout` duration string for the engine selector.
    pub fn fail_timeout(&self) -> String {
        format!("{}s", self.timeout)
    }
}

/// Partial settings update. Numeric fields are signed so that negative input
/// is reported as a validation error instead of a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<SelectionStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i64>,
    #[serde(default, alias = "timeoutSeconds", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<i64>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.strategy.is_none()
            && self.max_retries.is_none()
            && self.timeout.is_none()
            && self.concurrency.is_none()
    }
}

/// Default connectivity-check targets.
pub fn default_test_urls() -> Vec<String> {
    vec![
        "https://httpbin.org/ip".to_string(),
        "https://api.ipify.org?format=json".to_string(),
    ]
}

/// The complete desired state, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(rename = "system")]
    pub policy: PolicySettings,
    pub proxies: Vec<String>,
    #[serde(rename = "testUrls")]
    pub test_urls: Vec<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            policy: PolicySettings::default(),
            proxies: Vec::new(),
            test_urls: default_test_urls(),
        }
    }
}

/// Read one stored field; a value of the wrong shape is dropped with a
/// warning so the rest of the file still loads.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value.clone()) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::warn!(value = %value, error = %e, "Ignoring unreadable stored setting");
            Ok(None)
        }
    }
}

/// Settings as found on disk, unified or legacy.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredSettings {
    #[serde(default, deserialize_with = "lenient")]
    strategy: Option<SelectionStrategy>,
    #[serde(default, deserialize_with = "lenient")]
    max_retries: Option<i64>,
    #[serde(default, alias = "timeoutSeconds", deserialize_with = "lenient")]
    timeout: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    concurrency: Option<i64>,
}

impl StoredSettings {
    /// Merge each present field over `policy` on its own. Returns whether
    /// anything was applied.
    pub(crate) fn apply_to(&self, policy: &mut PolicySettings) -> bool {
        let fields = [
            SettingsPatch { strategy: self.strategy, ..Default::default() },
            SettingsPatch { max_retries: self.max_retries, ..Default::default() },
            SettingsPatch { timeout: self.timeout, ..Default::default() },
            SettingsPatch { concurrency: self.concurrency, ..Default::default() },
        ];

        let mut applied = false;
        for patch in fields.iter().filter(|p| !p.is_empty()) {
            match policy.merged(patch) {
                Ok(next) => {
                    *policy = next;
                    applied = true;
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring invalid stored setting"),
            }
        }
        applied
    }
}

/// Lenient on-disk shape: settings may sit under `system` or flat at the top
/// level (older layout); any missing or unreadable field keeps its default.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredState {
    #[serde(default, deserialize_with = "lenient")]
    system: Option<StoredSettings>,
    #[serde(flatten)]
    flat: StoredSettings,
    #[serde(default)]
    proxies: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    test_urls: Option<Vec<String>>,
}

impl StoredState {
    pub(crate) fn into_config(self) -> GlobalConfig {
        let mut config = GlobalConfig::default();

        self.flat.apply_to(&mut config.policy);
        if let Some(system) = &self.system {
            system.apply_to(&mut config.policy);
        }
        if let Some(proxies) = self.proxies {
            config.proxies = proxies;
        }
        if let Some(urls) = self.test_urls {
            config.test_urls = urls;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_validates_timeout() {
        let base = PolicySettings::default();
        let patch = SettingsPatch { timeout: Some(0), ..Default::default() };
        assert_eq!(base.merged(&patch), Err(ValidationError::TimeoutTooSmall(0)));

        let patch = SettingsPatch { max_retries: Some(-1), ..Default::default() };
        assert!(matches!(base.merged(&patch), Err(ValidationError::OutOfRange { field: "maxRetries", .. })));
    }

    #[test]
    fn test_merge_is_shallow() {
        let base = PolicySettings::default();
        let patch: SettingsPatch =
            serde_json::from_str(r#"{"strategy":"random","maxRetries":2,"timeoutSeconds":5}"#).unwrap();
        let merged = base.merged(&patch).unwrap();

        assert_eq!(merged.strategy, SelectionStrategy::Random);
        assert_eq!(merged.max_retries, 2);
        assert_eq!(merged.timeout, 5);
        assert_eq!(merged.concurrency, base.concurrency);
        assert!(merged.chain_differs(&base));
        assert!(!merged.restart_differs(&base));
    }

    #[test]
    fn test_stored_state_accepts_flat_settings() {
        let stored: StoredState =
            serde_json::from_str(r#"{"strategy":"fifo","timeout":3,"proxies":["http://1.1.1.1:80"]}"#).unwrap();
        let config = stored.into_config();

        assert_eq!(config.policy.strategy, SelectionStrategy::Fifo);
        assert_eq!(config.policy.timeout, 3);
        assert_eq!(config.policy.max_retries, 1);
        assert_eq!(config.proxies, vec!["http://1.1.1.1:80"]);
        assert_eq!(config.test_urls, default_test_urls());
    }

    #[test]
    fn test_stored_state_nested_settings_win() {
        let stored: StoredState = serde_json::from_str(
            r#"{"timeout":3,"system":{"strategy":"random","maxRetries":4,"timeout":7,"concurrency":2},"testUrls":[]}"#,
        )
        .unwrap();
        let config = stored.into_config();

        assert_eq!(config.policy.timeout, 7);
        assert_eq!(config.policy.max_retries, 4);
        assert_eq!(config.policy.concurrency, 2);
        assert!(config.test_urls.is_empty());
    }

    #[test]
    fn test_unreadable_settings_fields_keep_defaults() {
        let stored: StoredState = serde_json::from_str(
            r#"{"system":{"strategy":"hash","timeout":"10","maxRetries":3,"concurrency":-2},"proxies":["socks5://10.0.0.1:1080"]}"#,
        )
        .unwrap();
        let config = stored.into_config();

        assert_eq!(config.proxies, vec!["socks5://10.0.0.1:1080"]);
        assert_eq!(config.policy.strategy, SelectionStrategy::RoundRobin);
        assert_eq!(config.policy.timeout, 10);
        assert_eq!(config.policy.max_retries, 3);
        assert_eq!(config.policy.concurrency, 0);
    }

    #[test]
    fn test_invalid_field_does_not_discard_siblings() {
        let stored: StoredState =
            serde_json::from_str(r#"{"system":{"strategy":"random","timeout":0},"testUrls":"not-a-list"}"#).unwrap();
        let config = stored.into_config();

        assert_eq!(config.policy.strategy, SelectionStrategy::Random);
        assert_eq!(config.policy.timeout, 10);
        assert_eq!(config.test_urls, default_test_urls());
    }

    #[test]
    fn test_persisted_shape() {
        let json = serde_json::to_value(GlobalConfig::default()).unwrap();
        assert_eq!(json["system"]["strategy"], "round");
        assert_eq!(json["system"]["maxRetries"], 1);
        assert_eq!(json["system"]["timeout"], 10);
        assert!(json["proxies"].as_array().unwrap().is_empty());
        assert_eq!(json["testUrls"].as_array().unwrap().len(), 2);
    }
}
