//! Instance ingestion server library.
//!
//! Receives raw HTTP requests on `<id>.instances.<domain>`, records each one
//! as a log against the addressed instance, fans the log out to live viewers
//! and webhooks, and answers with the instance's stored response.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Domain and persistence
pub mod model;
pub mod store;

// Fan-out
pub mod live;
pub mod webhook;

// Cross-cutting concerns
pub mod lifecycle;
pub mod maintenance;
pub mod observability;

pub use config::IngestConfig;
pub use http::IngestServer;
pub use lifecycle::Shutdown;
pub use live::LogBroadcaster;
pub use store::{InstanceStore, MemoryStore};
