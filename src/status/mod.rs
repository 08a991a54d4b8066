//! Composite status view.
//!
//! # Data Flow
//! ```text
//! ProcessSupervisor::snapshot() ──┐
//! EngineClient::probe() ──────────┼──▶ CompositeStatus
//! ConfigStore::proxy_count() ─────┘
//!
//! poller.rs (background):
//!     ticker ──▶ GET /config ──▶ new service events ──▶ EventHub
//! ```

pub mod poller;

use std::sync::Arc;

use serde::Serialize;

use crate::reconcile::EngineClient;
use crate::store::ConfigStore;
use crate::supervisor::{ExitInfo, Phase, ProcessSupervisor};

pub use poller::EngineEventPoller;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeStatus {
    /// Engine process is alive.
    pub online: bool,
    /// Engine API answered and there is something to serve.
    pub service_ready: bool,
    pub proxy_count: usize,
    pub engine: EngineStatus,
}

pub struct StatusAggregator {
    supervisor: Arc<ProcessSupervisor>,
    client: Arc<EngineClient>,
    store: Arc<ConfigStore>,
}

impl StatusAggregator {
    pub fn new(supervisor: Arc<ProcessSupervisor>, client: Arc<EngineClient>, store: Arc<ConfigStore>) -> Self {
        Self { supervisor, client, store }
    }

    pub async fn status(&self) -> CompositeStatus {
        let state = self.supervisor.snapshot();
        let proxy_count = self.store.proxy_count().await;
        let api_ok = self.client.probe().await;
        let process = state.status();

        CompositeStatus {
            online: process.running,
            service_ready: api_ok && proxy_count > 0,
            proxy_count,
            engine: EngineStatus {
                running: process.running,
                pid: process.pid,
                phase: state.phase,
                exit: state.exit,
            },
        }
    }
}
