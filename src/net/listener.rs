//! TCP listener for the ingestion port.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Optionally enforce a `max_connections` limit via semaphore
//!
//! Without a limit every connection is accepted immediately.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),

    #[error("Failed to accept: {0}")]
    Accept(std::io::Error),

    #[error("Connection limit closed")]
    Closed,
}

/// A TCP listener with an optional concurrent connection ceiling.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Bind to the configured address.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = ?config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: config.max_connections.map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    /// Accept a new connection.
    ///
    /// With a limit configured this waits for a free slot first. The returned
    /// permit must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = match &self.connection_limit {
            Some(limit) => Some(
                Arc::clone(limit)
                    .acquire_owned()
                    .await
                    .map_err(|_| ListenerError::Closed)?,
            ),
            None => None,
        };

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = ?self.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Free connection slots, or `None` when unbounded.
    pub fn available_permits(&self) -> Option<usize> {
        self.connection_limit.as_ref().map(|s| s.available_permits())
    }
}

/// A connection slot. Released on drop, even if the handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_connections: Option<usize>) -> ListenerConfig {
        ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections,
        }
    }

    #[tokio::test]
    async fn unbounded_listener_has_no_permits() {
        let listener = Listener::bind(&config(None)).await.unwrap();
        assert_eq!(listener.available_permits(), None);
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn permit_held_until_drop() {
        let listener = Listener::bind(&config(Some(1))).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), Some(0));

        drop(permit);
        assert_eq!(listener.available_permits(), Some(1));
    }

    #[tokio::test]
    async fn bad_address_fails_to_bind() {
        let mut cfg = config(None);
        cfg.bind_address = "not-an-address".to_string();
        assert!(matches!(Listener::bind(&cfg).await, Err(ListenerError::Bind(_))));
    }
}
