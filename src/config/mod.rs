//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment overrides: DOMAIN, INSTANCES_PORT, ...)
//!     → validation.rs (semantic checks)
//!     → IngestConfig (validated, immutable)
//!     → handed to each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    DomainConfig, ExpiryConfig, ForwardingConfig, IngestConfig, LimitsConfig, ListenerConfig,
    ObservabilityConfig, StorageConfig, StreamConfig, TimeoutConfig, WebhookConfig,
};
