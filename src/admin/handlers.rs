use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::error::{ApiError, Result};
use crate::control::{ConnectivityReport, ProxyUpdate, SettingsUpdate, TestUrlsUpdate};
use crate::events::{LogEntry, LogLevel};
use crate::http::server::AppState;
use crate::status::CompositeStatus;
use crate::store::{PolicySettings, SettingsPatch};
use crate::supervisor::ProcessStatus;

#[derive(Serialize)]
pub struct ProxyList {
    pub proxies: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyListBody {
    pub proxy_list: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestUrls {
    pub test_urls: Vec<String>,
}

#[derive(Serialize)]
pub struct Logs {
    pub logs: Vec<LogEntry>,
}

#[derive(Deserialize)]
pub struct AppendLogBody {
    pub level: Option<String>,
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct AppendLogResponse {
    pub success: bool,
    pub entry: LogEntry,
}

#[derive(Serialize)]
pub struct Ack {
    pub success: bool,
}

#[derive(Deserialize)]
pub struct TestQuery {
    pub url: Option<String>,
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

pub async fn get_proxies(State(state): State<AppState>) -> Json<ProxyList> {
    Json(ProxyList {
        proxies: state.control.proxies().await,
    })
}

pub async fn update_proxies(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ProxyListBody>, JsonRejection>,
) -> Result<Json<ProxyUpdate>> {
    let raw = body(payload)?
        .proxy_list
        .ok_or_else(|| ApiError::BadRequest("proxyList is required".to_string()))?;
    Ok(Json(state.control.update_proxies(&raw).await?))
}

pub async fn get_settings(State(state): State<AppState>) -> Json<PolicySettings> {
    Json(state.control.settings().await)
}

pub async fn update_settings(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SettingsPatch>, JsonRejection>,
) -> Result<Json<SettingsUpdate>> {
    let patch = body(payload)?;
    Ok(Json(state.control.update_settings(&patch).await?))
}

pub async fn get_test_urls(State(state): State<AppState>) -> Json<TestUrls> {
    Json(TestUrls {
        test_urls: state.control.test_urls().await,
    })
}

pub async fn update_test_urls(
    State(state): State<AppState>,
    payload: std::result::Result<Json<TestUrls>, JsonRejection>,
) -> Result<Json<TestUrlsUpdate>> {
    let urls = body(payload)?.test_urls;
    Ok(Json(state.control.replace_test_urls(urls).await?))
}

pub async fn start_engine(State(state): State<AppState>) -> Json<ProcessStatus> {
    Json(state.control.start().await)
}

pub async fn stop_engine(State(state): State<AppState>) -> Json<ProcessStatus> {
    Json(state.control.stop().await)
}

pub async fn restart_engine(State(state): State<AppState>) -> Json<ProcessStatus> {
    Json(state.control.restart().await)
}

pub async fn get_status(State(state): State<AppState>) -> Json<CompositeStatus> {
    Json(state.control.status().await)
}

pub async fn get_logs(State(state): State<AppState>) -> Json<Logs> {
    Json(Logs {
        logs: state.control.logs(),
    })
}

pub async fn append_log(
    State(state): State<AppState>,
    payload: std::result::Result<Json<AppendLogBody>, JsonRejection>,
) -> Result<Json<AppendLogResponse>> {
    let AppendLogBody { level, message } = body(payload)?;
    let message = message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("message is required".to_string()))?;
    let level = match level {
        None => LogLevel::Info,
        Some(raw) => parse_level(&raw).ok_or_else(|| ApiError::BadRequest(format!("unknown level '{}'", raw)))?,
    };

    let entry = state.control.append_log(level, message);
    Ok(Json(AppendLogResponse { success: true, entry }))
}

pub async fn clear_logs(State(state): State<AppState>) -> Json<Ack> {
    state.control.clear_logs();
    Json(Ack { success: true })
}

pub async fn test_connectivity(
    State(state): State<AppState>,
    Query(query): Query<TestQuery>,
) -> Result<Json<ConnectivityReport>> {
    let url = query
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("URL required".to_string()))?;
    Ok(Json(state.control.test_connectivity(&url).await?))
}

fn parse_level(raw: &str) -> Option<LogLevel> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "INFO" => Some(LogLevel::Info),
        "WARN" | "WARNING" => Some(LogLevel::Warn),
        "ERROR" => Some(LogLevel::Error),
        "ENGINE" => Some(LogLevel::Engine),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_is_case_insensitive() {
        assert_eq!(parse_level("warn"), Some(LogLevel::Warn));
        assert_eq!(parse_level(" Error "), Some(LogLevel::Error));
        assert_eq!(parse_level("debug"), None);
    }
}
