//! Background maintenance.
//!
//! # Design Decisions
//! - The sweeper runs once at startup, then every `min(ttl, ceiling)`
//! - Without a TTL no timer is armed at all
//! - A failed sweep is logged and the timer keeps going

pub mod sweeper;

pub use sweeper::Sweeper;
