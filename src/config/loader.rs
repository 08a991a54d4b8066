//! Configuration loading from disk.

use std::env;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::WardenConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// A missing file is not an error when `optional` is set: defaults are used.
/// Environment overrides are applied before validation.
pub fn load_config(path: &Path, optional: bool) -> Result<WardenConfig, ConfigError> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => parse_config(&content)?,
        Err(e) if optional && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            WardenConfig::default()
        }
        Err(e) => return Err(e.into()),
    };

    apply_env_overrides(&mut config, |key| env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse a TOML document into a configuration (no validation).
pub fn parse_config(content: &str) -> Result<WardenConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Overlay deployment-time environment variables.
pub fn apply_env_overrides<F>(config: &mut WardenConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("WARDEN_BIND") {
        config.listener.bind_address = v;
    }
    if let Some(v) = lookup("ENGINE_API_URL") {
        config.engine.api_url = v;
    }
    if let Some(v) = lookup("ENGINE_BINARY_PATH") {
        config.engine.binary_path = v;
    }
    if let Some(v) = lookup("WARDEN_DATA_DIR") {
        config.store.data_dir = v;
    }
}
