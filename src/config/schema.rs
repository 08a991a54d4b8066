//! Configuration schema definitions.
//!
//! This module defines the configuration of the control plane itself (where
//! to listen, which engine binary to supervise, where desired state lives).
//! Desired state (proxy list, policy) is NOT configured here; it is owned by
//! the [`store`](crate::store) subsystem.

use serde::{Deserialize, Serialize};

/// Root configuration for the warden.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WardenConfig {
    /// Management listener (bind address, request timeout).
    pub listener: ListenerConfig,

    /// Supervised engine settings.
    pub engine: EngineConfig,

    /// Desired-state storage.
    pub store: StoreConfig,

    /// Event hub settings.
    pub events: EventsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Management listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Request timeout for management calls in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Supervised engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Absolute path to the engine executable.
    pub binary_path: String,

    /// Name resolved through PATH when `binary_path` does not exist.
    pub fallback_binary: String,

    /// Launch arguments; must enable the engine's admin API.
    pub args: Vec<String>,

    /// Base URL of the engine's configuration API.
    pub api_url: String,

    /// Per-call timeout for configuration API requests in milliseconds.
    pub api_timeout_ms: u64,

    /// Timeout for the status reachability probe in milliseconds.
    pub probe_timeout_ms: u64,

    /// Listen address of the proxy service pushed to the engine.
    pub service_address: String,

    /// URL of the engine's proxy listener, used by connectivity checks.
    pub proxy_url: String,

    /// Delay between a (re)start and the first reconciliation in milliseconds.
    pub restore_delay_ms: u64,

    /// Interval of the engine service-event poller in seconds (0 disables).
    pub event_poll_secs: u64,

    /// Start the engine when the warden starts.
    pub autostart: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary_path: "/usr/local/bin/gost".to_string(),
            fallback_binary: "gost".to_string(),
            args: vec!["-api".to_string(), "127.0.0.1:18080".to_string()],
            api_url: "http://127.0.0.1:18080".to_string(),
            api_timeout_ms: 5000,
            probe_timeout_ms: 1500,
            service_address: ":8080".to_string(),
            proxy_url: "http://127.0.0.1:8080".to_string(),
            restore_delay_ms: 2000,
            event_poll_secs: 5,
            autostart: true,
        }
    }
}

/// Desired-state storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the unified state file and any legacy files.
    pub data_dir: String,

    /// Reload desired state when the state file is edited externally.
    pub watch: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            watch: true,
        }
    }
}

/// Event hub configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Number of entries retained for late-joining observers.
    pub capacity: usize,

    /// Append-only JSON-lines log file (write-behind). Empty disables.
    pub log_file: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            log_file: "data/events.log".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Management API access configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer token required on `/api` routes. `None` leaves them open.
    pub api_key: Option<String>,
}
