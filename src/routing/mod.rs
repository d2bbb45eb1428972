//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Host header ("a1b2c3d4.instances.example.com:8082")
//!     → host.rs (normalize, strip instances suffix)
//!     → instance id ("a1b2c3d4") or HostError
//! ```
//!
//! # Design Decisions
//! - The resolver is built once from the configured base domain
//! - Deterministic: same Host always yields the same id
//! - No store access here; unknown ids are the server's concern

pub mod host;

pub use host::{HostError, HostResolver};
