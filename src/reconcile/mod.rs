//! Desired-state reconciliation against the engine's configuration API.
//!
//! # Data Flow
//! ```text
//! trigger() ──▶ slot idle? ──yes──▶ spawn worker ─┐
//!                  │ no                           │
//!                  ▼                              ▼
//!             mark dirty               snapshot ConfigStore
//!                                                 │
//!                                     parse lines ─▶ build chain + service
//!                                                 │
//!                          DELETE chain ─▶ POST chain ─▶ DELETE service ─▶ POST service
//!                                                 │
//!                                        publish report (watch)
//!                                                 │
//!                                   dirty? ──yes──▶ apply again
//! ```
//!
//! # Responsibilities
//! - At most one apply in flight
//! - Coalesce triggers that arrive during an apply into one follow-up apply
//! - Let callers wait for the first apply that started after their trigger

pub mod client;
pub mod model;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

pub use client::{DeleteOutcome, EngineApiError, EngineClient};
pub use model::{build_chain, build_service, Chain, Service, CHAIN_NAME, SERVICE_NAME};

use crate::events::{EventHub, LogEntry};
use crate::observability::metrics;
use crate::store::{parse_proxy_text, ConfigStore};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Api(#[from] EngineApiError),
}

/// Outcome of one apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
    pub applied_nodes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconciliationResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Published after every apply. `covered` is the highest request sequence
/// number issued before the apply read the desired state.
#[derive(Debug, Clone, Default)]
struct Report {
    covered: u64,
    result: ReconciliationResult,
}

#[derive(Default)]
struct Slot {
    busy: bool,
    dirty: bool,
}

struct Inner {
    store: Arc<ConfigStore>,
    client: Arc<EngineClient>,
    hub: Arc<EventHub>,
    service_addr: String,
    slot: Mutex<Slot>,
    request_seq: AtomicU64,
    reports: watch::Sender<Report>,
}

/// Single-slot reconciliation queue. Cheap to clone.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    pub fn new(
        store: Arc<ConfigStore>,
        client: Arc<EngineClient>,
        hub: Arc<EventHub>,
        service_addr: impl Into<String>,
    ) -> Self {
        let (reports, _) = watch::channel(Report::default());
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                hub,
                service_addr: service_addr.into(),
                slot: Mutex::new(Slot::default()),
                request_seq: AtomicU64::new(0),
                reports,
            }),
        }
    }

    pub fn client(&self) -> &Arc<EngineClient> {
        &self.inner.client
    }

    /// Request an apply without waiting for it.
    pub fn trigger(&self) {
        self.inner.request_seq.fetch_add(1, Ordering::SeqCst);
        self.kick();
    }

    /// Request an apply and wait for the first one that reads desired state
    /// after this call.
    pub async fn apply_and_wait(&self) -> ReconciliationResult {
        let mut rx = self.inner.reports.subscribe();
        let target = self.inner.request_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.kick();

        loop {
            {
                let report = rx.borrow_and_update();
                if report.covered >= target {
                    return report.result.clone();
                }
            }
            if rx.changed().await.is_err() {
                return ReconciliationResult {
                    applied_nodes: 0,
                    error: Some("reconciler stopped".to_string()),
                };
            }
        }
    }

    /// Result of the most recent apply, if any.
    pub fn last_result(&self) -> Option<ReconciliationResult> {
        let report = self.inner.reports.borrow();
        (report.covered > 0).then(|| report.result.clone())
    }

    fn kick(&self) {
        {
            let mut slot = lock(&self.inner.slot);
            if slot.busy {
                slot.dirty = true;
                return;
            }
            slot.busy = true;
            slot.dirty = false;
        }
        tokio::spawn(run_worker(self.inner.clone()));
    }
}

fn lock(slot: &Mutex<Slot>) -> std::sync::MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_worker(inner: Arc<Inner>) {
    loop {
        let covered = inner.request_seq.load(Ordering::SeqCst);
        let result = inner.apply_once().await;
        inner.reports.send_replace(Report { covered, result });

        let mut slot = lock(&inner.slot);
        if slot.dirty {
            slot.dirty = false;
            continue;
        }
        slot.busy = false;
        break;
    }
}

impl Inner {
    async fn apply_once(&self) -> ReconciliationResult {
        let started = Instant::now();
        let outcome = self.push_desired_state().await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(0) => {
                metrics::record_reconcile("noop", elapsed);
                tracing::debug!("No proxies to apply, skipping engine update");
                ReconciliationResult::default()
            }
            Ok(applied) => {
                metrics::record_reconcile("applied", elapsed);
                tracing::info!(nodes = applied, elapsed_ms = elapsed.as_millis() as u64, "Engine configuration applied");
                self.hub.append(LogEntry::info(format!(
                    "Updated engine config (service & chain) with {} proxies",
                    applied
                )));
                ReconciliationResult { applied_nodes: applied, error: None }
            }
            Err(e) => {
                metrics::record_reconcile("failed", elapsed);
                tracing::warn!(error = %e, "Engine configuration apply failed");
                self.hub.append(LogEntry::warn(format!("Engine config update failed: {}", e)));
                ReconciliationResult { applied_nodes: 0, error: Some(e.to_string()) }
            }
        }
    }

    async fn push_desired_state(&self) -> Result<usize, ReconcileError> {
        let desired = self.store.snapshot().await;
        let parsed = parse_proxy_text(&desired.proxies.join("\n"));
        for rejected in &parsed.rejected {
            tracing::warn!(line = rejected.line_number, reason = %rejected.reason, "Skipping invalid proxy line");
        }

        let Some(chain) = build_chain(&parsed.entries, &desired.policy) else {
            return Ok(0);
        };
        let service = build_service(&self.service_addr);

        self.expect_deleted("chain", CHAIN_NAME, self.client.delete_chain(CHAIN_NAME).await?);
        self.client.create_chain(&chain).await?;
        self.expect_deleted("service", SERVICE_NAME, self.client.delete_service(SERVICE_NAME).await?);
        self.client.create_service(&service).await?;

        Ok(parsed.entries.len())
    }

    fn expect_deleted(&self, kind: &str, name: &str, outcome: DeleteOutcome) {
        if let DeleteOutcome::Refused(status) = outcome {
            tracing::warn!(kind, name, %status, "Engine refused delete, creating anyway");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn reconciler(dir: &std::path::Path) -> (Reconciler, Arc<ConfigStore>, Arc<EventHub>) {
        let store = Arc::new(ConfigStore::load(dir).await);
        let hub = Arc::new(EventHub::new(50));
        let client = Arc::new(
            EngineClient::new("http://127.0.0.1:9", Duration::from_millis(300), Duration::from_millis(300)).unwrap(),
        );
        (Reconciler::new(store.clone(), client, hub.clone(), ":8080"), store, hub)
    }

    #[tokio::test]
    async fn test_empty_list_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, _, hub) = reconciler(dir.path()).await;

        let result = reconciler.apply_and_wait().await;
        assert_eq!(result, ReconciliationResult::default());
        assert!(hub.snapshot().is_empty());
        assert_eq!(reconciler.last_result(), Some(ReconciliationResult::default()));
    }

    #[tokio::test]
    async fn test_unreachable_engine_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, store, hub) = reconciler(dir.path()).await;
        store.update_proxies("http://10.0.0.1:3128").await.unwrap();

        let result = reconciler.apply_and_wait().await;
        assert!(!result.is_ok());
        assert_eq!(result.applied_nodes, 0);
        assert!(hub.snapshot().iter().any(|e| e.message.contains("update failed")));
    }

    #[tokio::test]
    async fn test_concurrent_waiters_all_complete() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, _, _) = reconciler(dir.path()).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let r = reconciler.clone();
            handles.push(tokio::spawn(async move { r.apply_and_wait().await }));
            reconciler.trigger();
        }
        for h in handles {
            let result = tokio::time::timeout(Duration::from_secs(5), h).await.unwrap().unwrap();
            assert!(result.is_ok());
        }
        assert!(reconciler.last_result().is_some());
    }
}
