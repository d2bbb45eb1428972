//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → framer.rs (accumulate bytes into exactly one request)
//!     → request.rs (parse head, strip internal headers)
//!     → [routing::host resolves the instance id]
//!     → [store lookup, log persisted and fanned out]
//!     → response.rs (replay static response, or plain-text error)
//!     → server.rs (write, close)
//! ```

pub mod framer;
pub mod request;
pub mod response;
pub mod server;

pub use framer::{FrameError, FrameLimits, FrameState, RequestFramer};
pub use request::{MalformedRequest, RequestHead};
pub use server::{IngestError, IngestServer};
