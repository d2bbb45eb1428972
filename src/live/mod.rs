//! Live log streaming subsystem.
//!
//! # Data Flow
//! ```text
//! ingestion server ──broadcast(log)──▶ LogBroadcaster ──try_send──▶ viewer channel
//!                                           ▲                          │
//! endpoint.rs ──subscribe / unsubscribe─────┘        WebSocket ◀───────┘
//! ```

pub mod broadcaster;
pub mod endpoint;

pub use broadcaster::{LogBroadcaster, LogChannel, SubscriberId};
pub use endpoint::{router, StreamState};
