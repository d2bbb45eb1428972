//! Domain records shared by every subsystem.
//!
//! # Data Flow
//! ```text
//! management layer ──▶ Instance / Webhook (stored)
//! ingestion server ──▶ Log (immutable, one per captured request)
//! ```
//!
//! All timestamps are Unix epoch milliseconds, matching the persisted format.

pub mod instance;
pub mod log;
pub mod webhook;

pub use instance::{generate_instance_id, Instance, Payload, Processor, GUEST_OWNER_ID};
pub use log::{Log, LogKind};
pub use webhook::Webhook;

use chrono::{DateTime, Utc};

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    epoch_millis(Utc::now())
}

/// Clock readings before the epoch clamp to zero.
fn epoch_millis(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp_millis()).unwrap_or(0)
}
