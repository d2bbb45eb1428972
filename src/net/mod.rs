//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, optional connection limit)
//!     → connection.rs (lifecycle tracking)
//!     → hand off to http::server
//! ```
//!
//! # Design Decisions
//! - Each connection tracked for graceful shutdown
//! - Connection limits are opt-in

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
