//! Instance store subsystem.
//!
//! # Data Flow
//! ```text
//! ingestion server ──get_instance_by_id / add_log──▶ InstanceStore
//! webhook worker   ──get_webhooks_by_ids──────────▶ InstanceStore
//! sweeper          ──remove_expired_instances─────▶ InstanceStore
//! ```
//!
//! # Design Decisions
//! - The ingestion core only sees the narrow `InstanceStore` trait
//! - Expired instances are filtered on read and removed physically by the sweeper
//! - The store owns its own consistency; callers never lock around it

pub mod memory;

pub use memory::{MemoryStore, StoreStats};

use std::future::Future;
use thiserror::Error;

use crate::model::{Instance, Log, Webhook};

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("instance {0} not found")]
    InstanceNotFound(String),

    #[error("instance {0} already exists")]
    DuplicateInstance(String),

    #[error("instance {0} is locked")]
    Locked(String),

    #[error("static payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("persistence I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the ingestion core consumes from the store.
pub trait InstanceStore: Send + Sync + 'static {
    /// Look up a live instance. Expired instances are reported as absent.
    fn get_instance_by_id(&self, id: &str) -> impl Future<Output = StoreResult<Option<Instance>>> + Send;

    /// Persist a captured log. Fails if its instance no longer exists.
    fn add_log(&self, log: Log) -> impl Future<Output = StoreResult<Log>> + Send;

    /// Delete every instance expired at `now` together with its logs.
    fn remove_expired_instances(&self, now: u64) -> impl Future<Output = StoreResult<Vec<String>>> + Send;

    fn clear_logs_for_instance(&self, id: &str) -> impl Future<Output = StoreResult<()>> + Send;

    /// Fetch the webhooks that still exist among `ids`.
    fn get_webhooks_by_ids(&self, ids: &[String]) -> impl Future<Output = StoreResult<Vec<Webhook>>> + Send;
}
