//! Management API.
//!
//! All routes live under `/api` and share the optional bearer-token check.

pub mod auth;
pub mod error;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub use error::ApiError;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/api/proxies", get(get_proxies).post(update_proxies))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/test-urls", get(get_test_urls).post(update_test_urls))
        .route("/api/service/start", post(start_engine))
        .route("/api/service/stop", post(stop_engine))
        .route("/api/service/restart", post(restart_engine))
        .route("/api/status", get(get_status))
        .route("/api/logs", get(get_logs).post(append_log).delete(clear_logs))
        .route("/api/test", get(test_connectivity))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
