//! Control plane façade.
//!
//! # Data Flow
//! ```text
//! management API ──▶ ControlPlane
//!                      ├── ConfigStore     (validate + persist desired state)
//!                      ├── Reconciler      (push to engine, wait for outcome)
//!                      ├── ProcessSupervisor (start/stop/restart)
//!                      │       └── after (re)start: delay ──▶ Reconciler::trigger
//!                      ├── StatusAggregator
//!                      └── EventHub        (operator log)
//! ```
//!
//! Mutations succeed once desired state is accepted in memory. Engine and
//! persistence failures come back as a `warning` next to `success: true`.

pub mod connectivity;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use url::Url;

use crate::events::{EventHub, LogEntry, LogLevel};
use crate::reconcile::{ReconciliationResult, Reconciler};
use crate::status::{CompositeStatus, StatusAggregator};
use crate::store::{ConfigStore, PolicySettings, RejectedLine, SettingsPatch, StoreError, ValidationError};
use crate::supervisor::{LaunchOptions, ProcessStatus, ProcessSupervisor};

pub use connectivity::ConnectivityReport;

/// Environment variable carrying the engine's worker-thread count.
pub const CONCURRENCY_ENV: &str = "GOMAXPROCS";

#[derive(Debug, Clone)]
pub struct ControlOptions {
    /// Delay between an engine (re)start and restoring its configuration.
    pub restore_delay: Duration,
    /// Engine proxy listener used for connectivity checks.
    pub proxy_url: String,
    pub test_timeout: Duration,
    /// Longest a mutation waits for the engine update it triggered. Kept
    /// below the HTTP request timeout; a slower pass finishes in the background.
    pub apply_timeout: Duration,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            restore_delay: Duration::from_secs(2),
            proxy_url: "http://127.0.0.1:8080".to_string(),
            test_timeout: Duration::from_secs(10),
            apply_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyUpdate {
    pub success: bool,
    pub count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedLine>,
    pub applied_nodes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub success: bool,
    pub settings: PolicySettings,
    pub restart_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestUrlsUpdate {
    pub success: bool,
    pub test_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct ControlPlane {
    store: Arc<ConfigStore>,
    supervisor: Arc<ProcessSupervisor>,
    reconciler: Reconciler,
    hub: Arc<EventHub>,
    status: StatusAggregator,
    options: ControlOptions,
}

impl ControlPlane {
    pub fn new(
        store: Arc<ConfigStore>,
        supervisor: Arc<ProcessSupervisor>,
        reconciler: Reconciler,
        hub: Arc<EventHub>,
        options: ControlOptions,
    ) -> Self {
        let status = StatusAggregator::new(supervisor.clone(), reconciler.client().clone(), store.clone());
        Self {
            store,
            supervisor,
            reconciler,
            hub,
            status,
            options,
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    // ---- desired state ------------------------------------------------------

    pub async fn proxies(&self) -> Vec<String> {
        self.store.proxies().await
    }

    pub async fn update_proxies(&self, raw: &str) -> Result<ProxyUpdate, ValidationError> {
        let saved = self.store.update_proxies(raw).await?;
        let parsed = saved.value;

        let result = self.apply_bounded().await;
        let warning = combine_warnings(saved.persist_error.as_ref(), Some(&result));

        Ok(ProxyUpdate {
            success: true,
            count: parsed.canonical.len(),
            rejected: parsed.rejected,
            applied_nodes: result.as_ref().map_or(0, |r| r.applied_nodes),
            warning,
        })
    }

    pub async fn settings(&self) -> PolicySettings {
        self.store.policy().await
    }

    pub async fn update_settings(&self, patch: &SettingsPatch) -> Result<SettingsUpdate, ValidationError> {
        let saved = self.store.update_settings(patch).await?;
        let change = saved.value;

        let result = if change.chain_changed() && self.store.proxy_count().await > 0 {
            Some(self.apply_bounded().await)
        } else {
            None
        };
        let restart_required = change.restart_required();
        if restart_required {
            self.hub.append(LogEntry::info(format!(
                "Concurrency set to {}; restart the engine to apply",
                change.current.concurrency
            )));
        }

        Ok(SettingsUpdate {
            success: true,
            settings: change.current,
            restart_required,
            warning: combine_warnings(saved.persist_error.as_ref(), result.as_ref()),
        })
    }

    /// Wait for an apply covering the current desired state, up to
    /// `apply_timeout`. `Err` carries the elapsed budget.
    async fn apply_bounded(&self) -> Result<ReconciliationResult, Duration> {
        let budget = self.options.apply_timeout;
        tokio::time::timeout(budget, self.reconciler.apply_and_wait())
            .await
            .map_err(|_| budget)
    }

    pub async fn test_urls(&self) -> Vec<String> {
        self.store.test_urls().await
    }

    pub async fn replace_test_urls(&self, urls: Vec<String>) -> Result<TestUrlsUpdate, ValidationError> {
        let saved = self.store.replace_test_urls(urls).await?;
        Ok(TestUrlsUpdate {
            success: true,
            test_urls: saved.value,
            warning: combine_warnings(saved.persist_error.as_ref(), None),
        })
    }

    /// Pick up an external edit of the state file.
    pub async fn reload_desired_state(&self) {
        match self.store.reload_from_disk().await {
            Ok(true) => {
                self.hub.append(LogEntry::info("Desired state reloaded from disk"));
                self.reconciler.trigger();
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable state file edit"),
        }
    }

    // ---- engine lifecycle ---------------------------------------------------

    async fn launch_options(&self) -> LaunchOptions {
        let policy = self.store.policy().await;
        let mut env = BTreeMap::new();
        if policy.concurrency > 0 {
            env.insert(CONCURRENCY_ENV.to_string(), policy.concurrency.to_string());
        }
        LaunchOptions { args: None, env }
    }

    pub async fn start(&self) -> ProcessStatus {
        let options = self.launch_options().await;
        self.supervisor.start(options).await;
        self.schedule_restore();
        self.supervisor.status()
    }

    pub async fn stop(&self) -> ProcessStatus {
        self.supervisor.stop().await.status()
    }

    pub async fn restart(&self) -> ProcessStatus {
        let options = self.launch_options().await;
        self.supervisor.restart(options).await;
        self.schedule_restore();
        self.supervisor.status()
    }

    /// Re-apply desired state once the freshly started engine has had time
    /// to bring up its API.
    fn schedule_restore(&self) {
        if !self.supervisor.status().running {
            return;
        }
        let reconciler = self.reconciler.clone();
        let supervisor = self.supervisor.clone();
        let delay = self.options.restore_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if supervisor.status().running {
                tracing::info!("Restoring engine configuration after start");
                reconciler.trigger();
            }
        });
    }

    pub fn process_status(&self) -> ProcessStatus {
        self.supervisor.status()
    }

    pub async fn status(&self) -> CompositeStatus {
        self.status.status().await
    }

    // ---- operator log -------------------------------------------------------

    pub fn logs(&self) -> Vec<LogEntry> {
        self.hub.snapshot()
    }

    pub fn clear_logs(&self) {
        self.hub.clear();
    }

    pub fn append_log(&self, level: LogLevel, message: String) -> LogEntry {
        let entry = LogEntry::new(level, message);
        self.hub.append(entry.clone());
        entry
    }

    // ---- connectivity -------------------------------------------------------

    pub async fn test_connectivity(&self, target: &str) -> Result<ConnectivityReport, ValidationError> {
        let target = target.trim();
        match Url::parse(target) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            _ => return Err(ValidationError::InvalidTestUrl(target.to_string())),
        }

        let report = connectivity::check(&self.options.proxy_url, target, self.options.test_timeout).await;
        let entry = match (&report.ip, &report.error) {
            (Some(ip), _) if report.success => LogEntry::info(format!("Test {} -> {}", target, ip)),
            (_, error) => LogEntry::error(format!(
                "Test {} failed: {}",
                target,
                error.as_deref().unwrap_or("unknown error")
            )),
        };
        self.hub.append(entry);
        Ok(report)
    }

    /// Stop the engine and wait for it to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Control plane shutting down, stopping engine");
        let state = self.supervisor.stop().await;
        tracing::info!(phase = ?state.phase, "Engine stopped");
    }
}

fn combine_warnings(
    persist: Option<&StoreError>,
    reconcile: Option<&Result<ReconciliationResult, Duration>>,
) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(e) = persist {
        parts.push(format!("Saved in memory, but writing to disk failed: {}", e));
    }
    match reconcile {
        Some(Ok(ReconciliationResult { error: Some(error), .. })) => {
            parts.push(format!("Saved locally, but engine update failed (is it running?): {}", error));
        }
        Some(Err(budget)) => {
            parts.push(format!(
                "Saved locally; engine update still in progress after {:?}",
                budget
            ));
        }
        _ => {}
    }
    (!parts.is_empty()).then(|| parts.join("; "))
}
