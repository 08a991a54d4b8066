//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use proxy_warden::{ControlPlane, Warden, WardenConfig};

/// In-memory stand-in for the engine's configuration API.
#[derive(Default)]
pub struct MockEngine {
    pub chains: Mutex<BTreeMap<String, Value>>,
    pub services: Mutex<BTreeMap<String, Value>>,
    /// `"METHOD /path -> status"` per call, in order.
    pub calls: Mutex<Vec<String>>,
    pub reject_creates: AtomicBool,
}

impl MockEngine {
    pub fn chain(&self, name: &str) -> Option<Value> {
        self.chains.lock().unwrap().get(name).cloned()
    }

    pub fn service(&self, name: &str) -> Option<Value> {
        self.services.lock().unwrap().get(name).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

type Objects = fn(&MockEngine) -> &Mutex<BTreeMap<String, Value>>;

fn chains(engine: &MockEngine) -> &Mutex<BTreeMap<String, Value>> {
    &engine.chains
}

fn services(engine: &MockEngine) -> &Mutex<BTreeMap<String, Value>> {
    &engine.services
}

fn delete_object(engine: &MockEngine, objects: Objects, kind: &str, name: &str) -> StatusCode {
    let removed = objects(engine).lock().unwrap().remove(name).is_some();
    let status = if removed { StatusCode::OK } else { StatusCode::NOT_FOUND };
    engine.record(format!("DELETE /config/{}/{} -> {}", kind, name, status.as_u16()));
    status
}

fn create_object(engine: &MockEngine, objects: Objects, kind: &str, body: Value) -> StatusCode {
    let name = body["name"].as_str().unwrap_or_default().to_string();
    let status = if engine.reject_creates.load(Ordering::SeqCst) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        let mut map = objects(engine).lock().unwrap();
        if map.contains_key(&name) {
            StatusCode::CONFLICT
        } else {
            map.insert(name, body);
            StatusCode::OK
        }
    };
    engine.record(format!("POST /config/{} -> {}", kind, status.as_u16()));
    status
}

/// Start the mock engine API on `addr`.
pub async fn start_mock_engine(addr: SocketAddr) -> Arc<MockEngine> {
    let engine = Arc::new(MockEngine::default());

    let app = Router::new()
        .route(
            "/config",
            get(|State(e): State<Arc<MockEngine>>| async move {
                let chains: Vec<Value> = e.chains.lock().unwrap().values().cloned().collect();
                let services: Vec<Value> = e.services.lock().unwrap().values().cloned().collect();
                Json(json!({ "chains": chains, "services": services }))
            }),
        )
        .route(
            "/config/chains",
            post(|State(e): State<Arc<MockEngine>>, Json(body): Json<Value>| async move {
                create_object(&e, chains, "chains", body)
            }),
        )
        .route(
            "/config/chains/{name}",
            delete(|State(e): State<Arc<MockEngine>>, UrlPath(name): UrlPath<String>| async move {
                delete_object(&e, chains, "chains", &name)
            }),
        )
        .route(
            "/config/services",
            post(|State(e): State<Arc<MockEngine>>, Json(body): Json<Value>| async move {
                create_object(&e, services, "services", body)
            }),
        )
        .route(
            "/config/services/{name}",
            delete(|State(e): State<Arc<MockEngine>>, UrlPath(name): UrlPath<String>| async move {
                delete_object(&e, services, "services", &name)
            }),
        )
        .with_state(engine.clone());

    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    engine
}

/// Start a raw TCP responder that answers every request with `response` as
/// a 200 body. Doubles as a forward proxy for connectivity checks.
pub async fn start_mock_backend(addr: SocketAddr, response: &'static str) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        // Let the request arrive before answering.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Test configuration: engine is `sh -c <script>`, API at `engine_addr`.
pub fn warden_config(data_dir: &Path, bind: SocketAddr, engine_addr: SocketAddr, script: &str) -> WardenConfig {
    let mut config = WardenConfig::default();
    config.listener.bind_address = bind.to_string();
    config.engine.binary_path = "sh".into();
    config.engine.fallback_binary = "sh".into();
    config.engine.args = vec!["-c".into(), script.into()];
    config.engine.api_url = format!("http://{}", engine_addr);
    config.engine.api_timeout_ms = 1000;
    config.engine.probe_timeout_ms = 500;
    config.engine.restore_delay_ms = 100;
    config.engine.event_poll_secs = 0;
    config.engine.autostart = false;
    config.store.data_dir = data_dir.to_string_lossy().into_owned();
    config.store.watch = false;
    config.events.log_file = data_dir.join("events.log").to_string_lossy().into_owned();
    config
}

/// A running warden; dropping `stop` (or sending on it) shuts it down.
pub struct RunningWarden {
    pub control: Arc<ControlPlane>,
    pub base: String,
    stop: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl RunningWarden {
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(10), self.handle).await;
    }
}

pub async fn spawn_warden(config: WardenConfig) -> RunningWarden {
    let bind: SocketAddr = config.listener.bind_address.parse().unwrap();
    let warden = Warden::build(&config).await.unwrap();
    let control = warden.control().clone();
    let listener = TcpListener::bind(bind).await.unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = warden
            .run(listener, async move {
                let _ = stopped.await;
            })
            .await;
    });

    RunningWarden {
        control,
        base: format!("http://{}", bind),
        stop: Some(stop),
        handle,
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
