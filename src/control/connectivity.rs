//! One-shot connectivity check through the engine's proxy listener.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

/// Maximum length of an extracted summary.
const SUMMARY_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectivityReport {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            ip: None,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// GET `target` through `proxy_url`.
pub async fn check(proxy_url: &str, target: &str, timeout: Duration) -> ConnectivityReport {
    let proxy = match reqwest::Proxy::all(proxy_url) {
        Ok(p) => p,
        Err(e) => return ConnectivityReport::failed(format!("invalid proxy URL: {}", e)),
    };
    let client = match reqwest::Client::builder().proxy(proxy).timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => return ConnectivityReport::failed(e.to_string()),
    };

    let response = match client.get(target).send().await {
        Ok(r) => r,
        Err(e) => return ConnectivityReport::failed(e.to_string()),
    };
    let status = response.status();
    if !status.is_success() {
        return ConnectivityReport::failed(format!("upstream returned {}", status));
    }
    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => return ConnectivityReport::failed(e.to_string()),
    };

    let (ip, result) = summarize(&body);
    ConnectivityReport {
        success: true,
        ip: Some(ip),
        result,
        error: None,
    }
}

/// Extract an address-like summary: `origin`, then `ip`, else a prefix of
/// the body.
pub fn summarize(body: &str) -> (String, Option<Value>) {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => (truncate(s.trim()), Some(Value::String(s))),
        Ok(value) => {
            let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
            let ip = field("origin")
                .or_else(|| field("ip"))
                .unwrap_or_else(|| truncate(&value.to_string()));
            (ip, Some(value))
        }
        Err(_) => (truncate(body.trim()), None),
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(SUMMARY_LEN).collect()
}
