//! Startup orchestration.
//!
//! # Responsibilities
//! - Build subsystems in dependency order: event hub, store, engine client,
//!   supervisor, reconciler, control plane, HTTP server
//! - Start background tasks (event poller, state watcher)
//! - Optionally launch the engine
//! - On termination: stop accepting, stop the engine and wait for it, drain tasks

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::WardenConfig;
use crate::control::{ControlOptions, ControlPlane};
use crate::events::{EventHub, LogEntry, LogSink};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::reconcile::{EngineApiError, EngineClient, Reconciler};
use crate::status::EngineEventPoller;
use crate::store::watcher::StateFileWatcher;
use crate::store::ConfigStore;
use crate::supervisor::{EngineCommand, ProcessSupervisor};

/// Connectivity checks use a fixed budget independent of the API timeout.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("engine API client: {0}")]
    EngineApi(#[from] EngineApiError),

    #[error("HTTP server: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully wired control plane, ready to serve.
pub struct Warden {
    control: Arc<ControlPlane>,
    server: HttpServer,
    shutdown: Shutdown,
    autostart: bool,
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<notify::RecommendedWatcher>,
}

impl Warden {
    pub async fn build(config: &WardenConfig) -> Result<Self, StartupError> {
        let mut hub = EventHub::new(config.events.capacity);
        if !config.events.log_file.trim().is_empty() {
            hub = hub.with_sink(LogSink::spawn(&config.events.log_file));
        }
        let hub = Arc::new(hub);

        let store = Arc::new(ConfigStore::load(&config.store.data_dir).await);

        let client = Arc::new(EngineClient::new(
            &config.engine.api_url,
            Duration::from_millis(config.engine.api_timeout_ms),
            Duration::from_millis(config.engine.probe_timeout_ms),
        )?);

        let supervisor = Arc::new(ProcessSupervisor::new(
            EngineCommand::from_config(&config.engine),
            hub.clone(),
        ));
        let reconciler = Reconciler::new(
            store.clone(),
            client.clone(),
            hub.clone(),
            config.engine.service_address.clone(),
        );
        let options = ControlOptions {
            restore_delay: Duration::from_millis(config.engine.restore_delay_ms),
            proxy_url: config.engine.proxy_url.clone(),
            test_timeout: CONNECTIVITY_TIMEOUT,
            apply_timeout: Duration::from_secs(config.listener.request_timeout_secs) * 3 / 4,
        };
        let control = Arc::new(ControlPlane::new(store.clone(), supervisor, reconciler, hub.clone(), options));

        let shutdown = Shutdown::new();
        let mut tasks = Vec::new();

        let poller = EngineEventPoller::new(client, hub.clone(), Duration::from_secs(config.engine.event_poll_secs));
        tasks.push(tokio::spawn(poller.run(shutdown.subscribe())));

        let watcher = if config.store.watch {
            start_state_watcher(control.clone(), store.path(), &shutdown, &mut tasks)
        } else {
            None
        };

        let server = HttpServer::new(control.clone(), config);

        hub.append(LogEntry::info(format!(
            "Control plane ready ({} proxies in desired state)",
            store.proxy_count().await
        )));

        Ok(Self {
            control,
            server,
            shutdown,
            autostart: config.engine.autostart,
            tasks,
            _watcher: watcher,
        })
    }

    pub fn control(&self) -> &Arc<ControlPlane> {
        &self.control
    }

    /// Serve until `terminate` resolves, then shut everything down in order.
    pub async fn run<F>(self, listener: TcpListener, terminate: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()>,
    {
        if self.autostart {
            let status = self.control.start().await;
            tracing::info!(running = status.running, pid = ?status.pid, "Engine autostart");
        }

        let server = tokio::spawn(self.server.run(listener, self.shutdown.subscribe()));

        terminate.await;
        tracing::info!("Shutting down");

        self.shutdown.trigger();
        self.control.shutdown().await;

        match server.await {
            Ok(result) => result?,
            Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
        }
        for task in self.tasks {
            let _ = task.await;
        }

        tracing::info!("Shutdown complete");
        Ok(())
    }
}

fn start_state_watcher(
    control: Arc<ControlPlane>,
    path: &std::path::Path,
    shutdown: &Shutdown,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Option<notify::RecommendedWatcher> {
    let (watcher, mut changes) = StateFileWatcher::new(path);
    let handle = match watcher.run() {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(error = %e, "State file watching unavailable");
            return None;
        }
    };

    let mut stop = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                change = changes.recv() => {
                    if change.is_none() {
                        break;
                    }
                    // Editors often write in several steps; settle before reading.
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    while changes.try_recv().is_ok() {}
                    control.reload_desired_state().await;
                }
                _ = stop.recv() => break,
            }
        }
    }));

    Some(handle)
}
