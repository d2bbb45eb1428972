//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const THIRTY_DAYS_SECS: u64 = 30 * 24 * 60 * 60;

/// Root configuration for the ingestion server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct IngestConfig {
    /// Ingestion listener (raw TCP).
    pub listener: ListenerConfig,

    /// Base domain for subdomain routing.
    pub domain: DomainConfig,

    /// Request and payload size ceilings.
    pub limits: LimitsConfig,

    pub timeouts: TimeoutConfig,

    /// Instance expiry policy.
    pub expiry: ExpiryConfig,

    /// Outbound webhook settings.
    pub webhooks: WebhookConfig,

    /// Trusted upstream proxies.
    pub forwarding: ForwardingConfig,

    /// Live-view endpoint.
    pub stream: StreamConfig,

    pub storage: StorageConfig,

    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8082").
    pub bind_address: String,

    /// Maximum concurrent connections. Unset means unbounded.
    pub max_connections: Option<usize>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8082".to_string(),
            max_connections: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DomainConfig {
    /// Instances are served at `<id>.instances.<base>`.
    pub base: String,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            base: "localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum header block size in bytes.
    pub max_header_bytes: usize,

    /// Maximum declared body size in bytes.
    pub max_body_bytes: usize,

    /// Maximum stored static response size in bytes.
    pub max_static_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 8 * 1024,
            max_body_bytes: 32 * 1024 * 1024,
            max_static_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed to deliver a complete request, in seconds.
    pub idle_secs: u64,

    /// How long shutdown waits for connections and webhooks to drain.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Instance expiry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Hosted deployments expire instances after 30 days unless `ttl_secs` says otherwise.
    pub hosted: bool,

    /// Explicit instance TTL in seconds.
    pub ttl_secs: Option<u64>,

    /// Upper bound on the sweep interval in seconds.
    pub sweep_ceiling_secs: u64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            hosted: false,
            ttl_secs: None,
            sweep_ceiling_secs: 60 * 60,
        }
    }
}

impl ExpiryConfig {
    /// The TTL in force, if instances expire at all.
    pub fn effective_ttl(&self) -> Option<Duration> {
        match (self.ttl_secs, self.hosted) {
            (Some(secs), _) => Some(Duration::from_secs(secs)),
            (None, true) => Some(Duration::from_secs(THIRTY_DAYS_SECS)),
            (None, false) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Provider hosts webhook URLs may point at.
    pub allowed_hosts: Vec<String>,

    /// Required URL path prefix.
    pub path_prefix: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Pending notification jobs before new ones are dropped.
    pub queue_capacity: usize,

    /// Accept plain `http` webhook URLs. Only for local receivers.
    pub allow_insecure: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: vec!["discord.com".to_string(), "discordapp.com".to_string()],
            path_prefix: "/api/webhooks/".to_string(),
            timeout_secs: 10,
            queue_capacity: 1024,
            allow_insecure: false,
        }
    }
}

/// Which peers may supply the caller address through a header.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Peers whose forwarding header is honoured.
    pub trusted_proxies: Vec<IpAddr>,

    /// Header carrying the original caller address. Always stripped from stored logs.
    pub header: String,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            trusted_proxies: Vec::new(),
            header: "x-internal-real-ip".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    pub enabled: bool,

    /// Live-view endpoint bind address.
    pub bind_address: String,

    /// Per-viewer channel capacity.
    pub subscriber_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8081".to_string(),
            subscriber_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot file. Unset keeps everything in memory.
    pub data_path: Option<PathBuf>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
