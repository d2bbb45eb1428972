//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits and timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: IngestConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::IngestConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &IngestConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.domain.base.trim_matches('.').is_empty() {
        errors.push(ValidationError::new("domain.base", "must not be empty"));
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == Some(0) {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if config.limits.max_header_bytes == 0 {
        errors.push(ValidationError::new("limits.max_header_bytes", "must be greater than 0"));
    }
    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::new("limits.max_body_bytes", "must be greater than 0"));
    }
    if config.limits.max_static_bytes == 0 {
        errors.push(ValidationError::new("limits.max_static_bytes", "must be greater than 0"));
    }

    if config.timeouts.idle_secs == 0 {
        errors.push(ValidationError::new("timeouts.idle_secs", "must be greater than 0"));
    }

    if config.expiry.ttl_secs == Some(0) {
        errors.push(ValidationError::new("expiry.ttl_secs", "must be greater than 0"));
    }
    if config.expiry.sweep_ceiling_secs == 0 {
        errors.push(ValidationError::new("expiry.sweep_ceiling_secs", "must be greater than 0"));
    }

    if config.webhooks.allowed_hosts.iter().all(|h| h.trim().is_empty()) {
        errors.push(ValidationError::new("webhooks.allowed_hosts", "must list at least one host"));
    }
    if !config.webhooks.path_prefix.starts_with('/') {
        errors.push(ValidationError::new("webhooks.path_prefix", "must start with '/'"));
    }
    if config.webhooks.timeout_secs == 0 {
        errors.push(ValidationError::new("webhooks.timeout_secs", "must be greater than 0"));
    }
    if config.webhooks.queue_capacity == 0 {
        errors.push(ValidationError::new("webhooks.queue_capacity", "must be greater than 0"));
    }

    if config.forwarding.header.trim().is_empty() {
        errors.push(ValidationError::new("forwarding.header", "must not be empty"));
    }

    if config.stream.enabled {
        check_address(&mut errors, "stream.bind_address", &config.stream.bind_address);
    }
    if config.stream.subscriber_buffer == 0 {
        errors.push(ValidationError::new("stream.subscriber_buffer", "must be greater than 0"));
    }

    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, address: &str) {
    if address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address {:?}", address)));
    }
}
