//! Host header to instance id resolution.
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110)
//! - A `:port` suffix is ignored
//! - Nested subdomains route by the label closest to `instances.<domain>`

use thiserror::Error;

/// Why a Host header does not name an instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Missing Host header")]
    Missing,

    #[error("Host does not end with instances subdomain")]
    SuffixMismatch,

    #[error("Instance ID is empty")]
    EmptyInstanceId,
}

/// Resolves `<...>.<id>.instances.<domain>` to `<id>`.
#[derive(Debug, Clone)]
pub struct HostResolver {
    /// `instances.<domain>`, lowercase.
    instances_domain: String,
}

impl HostResolver {
    pub fn new(base_domain: &str) -> Self {
        Self {
            instances_domain: format!("instances.{}", base_domain.trim_matches('.').to_lowercase()),
        }
    }

    pub fn instances_domain(&self) -> &str {
        &self.instances_domain
    }

    /// Extract the instance id from a Host header value.
    pub fn resolve(&self, host: Option<&str>) -> Result<String, HostError> {
        let host = host.map(str::trim).filter(|h| !h.is_empty()).ok_or(HostError::Missing)?;
        let host = strip_port(host).to_lowercase();

        if host == self.instances_domain {
            return Err(HostError::EmptyInstanceId);
        }

        let prefix = host
            .strip_suffix(self.instances_domain.as_str())
            .and_then(|p| p.strip_suffix('.'))
            .ok_or(HostError::SuffixMismatch)?;

        match prefix.rsplit('.').next() {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(HostError::EmptyInstanceId),
        }
    }
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
