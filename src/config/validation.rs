//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, capacity > 0)
//! - Check addresses and URLs parse
//!
//! Returns every problem found, not just the first.

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::WardenConfig;

/// A single semantic problem in the warden configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field}: invalid URL '{value}'")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{field}: must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field}: must not be empty")]
    Empty { field: &'static str },
}

/// Validate a loaded configuration.
pub fn validate_config(config: &WardenConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "listener.request_timeout_secs" });
    }

    let engine = &config.engine;
    if engine.binary_path.trim().is_empty() && engine.fallback_binary.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "engine.binary_path" });
    }
    for (field, value) in [("engine.api_url", &engine.api_url), ("engine.proxy_url", &engine.proxy_url)] {
        if Url::parse(value).is_err() {
            errors.push(ValidationError::InvalidUrl { field, value: value.clone() });
        }
    }
    if engine.api_timeout_ms == 0 {
        errors.push(ValidationError::Zero { field: "engine.api_timeout_ms" });
    }
    if engine.probe_timeout_ms == 0 {
        errors.push(ValidationError::Zero { field: "engine.probe_timeout_ms" });
    }
    if engine.service_address.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "engine.service_address" });
    }

    if config.store.data_dir.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "store.data_dir" });
    }
    if config.events.capacity == 0 {
        errors.push(ValidationError::Zero { field: "events.capacity" });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
