//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Webhook worker → Sweeper → Live-view listener → Ingestion listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections
//!     → Close live viewers → Stop sweeper → Drain webhook queue
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: background tasks first, listeners last
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: tasks are abandoned after the grace period

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{start, Running, StartupError};
