//! HTTP client for the engine's configuration API.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use super::model::{Chain, Service};

#[derive(Debug, Error)]
pub enum EngineApiError {
    #[error("invalid engine API URL '{0}'")]
    InvalidUrl(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{method} {path} failed: {source}")]
    Transport {
        method: &'static str,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {path} returned {status}: {body}")]
    Status {
        method: &'static str,
        path: String,
        status: StatusCode,
        body: String,
    },
}

/// Outcome of a delete that the caller treats as non-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// Engine answered with another non-success status.
    Refused(StatusCode),
}

pub struct EngineClient {
    http: reqwest::Client,
    base: Url,
    probe_timeout: Duration,
}

impl EngineClient {
    pub fn new(api_url: &str, timeout: Duration, probe_timeout: Duration) -> Result<Self, EngineApiError> {
        let mut base = Url::parse(api_url).map_err(|_| EngineApiError::InvalidUrl(api_url.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(EngineApiError::Client)?;

        Ok(Self { http, base, probe_timeout })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, EngineApiError> {
        self.base
            .join(path)
            .map_err(|_| EngineApiError::InvalidUrl(format!("{}{}", self.base, path)))
    }

    pub async fn delete_chain(&self, name: &str) -> Result<DeleteOutcome, EngineApiError> {
        self.delete(&format!("config/chains/{}", name)).await
    }

    pub async fn create_chain(&self, chain: &Chain) -> Result<(), EngineApiError> {
        self.post("config/chains", chain).await
    }

    pub async fn delete_service(&self, name: &str) -> Result<DeleteOutcome, EngineApiError> {
        self.delete(&format!("config/services/{}", name)).await
    }

    pub async fn create_service(&self, service: &Service) -> Result<(), EngineApiError> {
        self.post("config/services", service).await
    }

    /// Full running configuration.
    pub async fn get_config(&self) -> Result<serde_json::Value, EngineApiError> {
        let path = "config";
        let res = self
            .http
            .get(self.url(path)?)
            .send()
            .await
            .map_err(|source| EngineApiError::Transport { method: "GET", path: path.into(), source })?;
        let res = check_status("GET", path, res).await?;
        res.json()
            .await
            .map_err(|source| EngineApiError::Transport { method: "GET", path: path.into(), source })
    }

    /// Reachability check with the short probe timeout.
    pub async fn probe(&self) -> bool {
        let url = match self.url("config") {
            Ok(u) => u,
            Err(_) => return false,
        };
        match self.http.get(url).timeout(self.probe_timeout).send().await {
            Ok(res) => res.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Engine API probe failed");
                false
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<DeleteOutcome, EngineApiError> {
        let res = self
            .http
            .delete(self.url(path)?)
            .send()
            .await
            .map_err(|source| EngineApiError::Transport { method: "DELETE", path: path.into(), source })?;

        let status = res.status();
        Ok(if status.is_success() {
            DeleteOutcome::Deleted
        } else if status == StatusCode::NOT_FOUND {
            DeleteOutcome::NotFound
        } else {
            DeleteOutcome::Refused(status)
        })
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), EngineApiError> {
        let res = self
            .http
            .post(self.url(path)?)
            .json(body)
            .send()
            .await
            .map_err(|source| EngineApiError::Transport { method: "POST", path: path.into(), source })?;
        check_status("POST", path, res).await.map(|_| ())
    }
}

async fn check_status(
    method: &'static str,
    path: &str,
    res: reqwest::Response,
) -> Result<reqwest::Response, EngineApiError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(EngineApiError::Status {
        method,
        path: path.to_string(),
        status,
        body: body.chars().take(200).collect(),
    })
}
