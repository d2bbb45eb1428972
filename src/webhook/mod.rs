//! Webhook notification subsystem.
//!
//! # Data Flow
//! ```text
//! ingestion server ──notify(log, ids)──▶ bounded queue ──▶ WebhookWorker
//!                                                            │ get_webhooks_by_ids
//!                                                            ▼
//!                                          one task per webhook: validate → build → POST
//! ```
//!
//! # Design Decisions
//! - Enqueueing never waits; a full queue drops the job with a warning
//! - Every dispatch re-validates the URL against the provider allow-list
//! - Redirects are disabled and nothing is retried
//! - On shutdown the queue is closed and drained, then in-flight calls are awaited

pub mod discord;
pub mod notifier;
pub mod validation;

pub use notifier::{Dispatcher, WebhookJob, WebhookNotifier, WebhookWorker};
pub use validation::WebhookPolicy;

use thiserror::Error;

/// Errors from a single webhook dispatch.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid URL format: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported URL scheme {0:?}")]
    InvalidScheme(String),

    #[error("host {0:?} is not an allowed webhook provider")]
    HostNotAllowed(String),

    #[error("path {path:?} does not start with {prefix:?}")]
    InvalidPath { path: String, prefix: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider answered {0}")]
    Status(reqwest::StatusCode),
}

impl WebhookError {
    /// Metric label for this failure.
    pub fn label(&self) -> &'static str {
        match self {
            WebhookError::InvalidUrl(_)
            | WebhookError::InvalidScheme(_)
            | WebhookError::HostNotAllowed(_)
            | WebhookError::InvalidPath { .. } => "rejected",
            WebhookError::Request(_) => "network_error",
            WebhookError::Status(_) => "bad_status",
        }
    }
}
