//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router (management API + log stream)
//! - Wire up middleware (request ID, tracing, timeout, CORS)
//! - Serve until the shutdown signal fires

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::config::WardenConfig;
use crate::control::ControlPlane;
use crate::http::request::{make_request_span, propagate_request_id, set_request_id};
use crate::http::websocket::logs_stream;

/// Largest accepted request body (proxy lists are plain text).
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlPlane>,
    /// Bearer token required on management routes, when set.
    pub api_key: Option<Arc<str>>,
}

pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(control: Arc<ControlPlane>, config: &WardenConfig) -> Self {
        let state = AppState {
            control,
            api_key: config.admin.api_key.as_deref().map(Arc::from),
        };
        let timeout = Duration::from_secs(config.listener.request_timeout_secs);
        Self {
            router: Self::build_router(state, timeout),
        }
    }

    #[allow(deprecated)]
    fn build_router(state: AppState, request_timeout: Duration) -> Router {
        Router::new()
            .route("/ws/logs", get(logs_stream))
            .with_state(state.clone())
            .merge(setup_admin_router(state))
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .layer(TimeoutLayer::new(request_timeout))
            .layer(CorsLayer::permissive())
            .layer(propagate_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
            .layer(set_request_id())
    }

    /// The assembled router, for in-process serving.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlOptions;
    use crate::events::EventHub;
    use crate::reconcile::{EngineClient, Reconciler};
    use crate::store::ConfigStore;
    use crate::supervisor::{EngineCommand, ProcessSupervisor};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    const X_REQUEST_ID_HEADER: &str = "x-request-id";

    async fn server(dir: &std::path::Path, api_key: Option<&str>) -> HttpServer {
        let store = Arc::new(ConfigStore::load(dir).await);
        let hub = Arc::new(EventHub::new(20));
        let client = Arc::new(
            EngineClient::new("http://127.0.0.1:9", Duration::from_millis(200), Duration::from_millis(200)).unwrap(),
        );
        let command = EngineCommand {
            program: "sh".into(),
            fallback: "sh".into(),
            args: vec!["-c".into(), "sleep 30".into()],
        };
        let supervisor = Arc::new(ProcessSupervisor::new(command, hub.clone()));
        let reconciler = Reconciler::new(store.clone(), client, hub.clone(), ":8080");
        let control = Arc::new(ControlPlane::new(store, supervisor, reconciler, hub, ControlOptions::default()));

        let mut config = WardenConfig::default();
        config.admin.api_key = api_key.map(String::from);
        HttpServer::new(control, &config)
    }

    #[tokio::test]
    async fn test_router_serves_settings_with_request_id() {
        let dir = tempfile::tempdir().unwrap();
        let router = server(dir.path(), None).await.router();

        let res = router
            .oneshot(Request::get("/api/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key(X_REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_client_request_id_is_echoed() {
        let dir = tempfile::tempdir().unwrap();
        let router = server(dir.path(), None).await.router();

        let res = router
            .oneshot(
                Request::get("/api/proxies")
                    .header(X_REQUEST_ID_HEADER, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.headers()[X_REQUEST_ID_HEADER], "abc-123");
    }

    #[tokio::test]
    async fn test_api_key_guards_management_routes() {
        let dir = tempfile::tempdir().unwrap();
        let router = server(dir.path(), Some("secret")).await.router();

        let denied = router
            .clone()
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = router
            .oneshot(
                Request::get("/api/proxies")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }
}
