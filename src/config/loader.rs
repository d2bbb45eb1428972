//! Configuration loading from disk and environment.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::IngestConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid environment variable {name}: {value:?}")]
    Env { name: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file, apply process environment overrides and validate.
///
/// Without a path the defaults are used as the base.
pub fn load_config(path: Option<&Path>) -> Result<IngestConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => IngestConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply deployment overrides: `DOMAIN`, `INSTANCES_PORT`, `API_PORT`,
/// `IS_HOSTED`, `DATA_DIR`.
pub fn apply_env_overrides<F>(config: &mut IngestConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(domain) = env("DOMAIN").filter(|d| !d.is_empty()) {
        config.domain.base = domain;
    }

    if let Some(port) = env("INSTANCES_PORT") {
        config.listener.bind_address = with_port(&config.listener.bind_address, "INSTANCES_PORT", &port)?;
    }

    if let Some(port) = env("API_PORT") {
        config.stream.bind_address = with_port(&config.stream.bind_address, "API_PORT", &port)?;
    }

    if let Some(value) = env("IS_HOSTED") {
        config.expiry.hosted = parse_bool(&value).ok_or(ConfigError::Env {
            name: "IS_HOSTED",
            value,
        })?;
    }

    if let Some(dir) = env("DATA_DIR").filter(|d| !d.is_empty()) {
        config.storage.data_path = Some(PathBuf::from(dir).join("db.json"));
    }

    Ok(())
}

/// Accepts true/1/yes/y and false/0/no/n, case-insensitively.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn with_port(address: &str, name: &'static str, port: &str) -> Result<String, ConfigError> {
    let env_error = || ConfigError::Env {
        name,
        value: port.to_string(),
    };
    let port: u16 = port.trim().parse().map_err(|_| env_error())?;
    let mut addr: SocketAddr = address.parse().map_err(|_| env_error())?;
    addr.set_port(port);
    Ok(addr.to_string())
}
