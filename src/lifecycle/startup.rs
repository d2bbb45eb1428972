//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (webhook worker, sweeper)
//! - Bind listeners and begin accepting traffic
//! - Tear everything down again in reverse order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)
//! - Shutdown is bounded by the configured grace period

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::IngestConfig;
use crate::http::IngestServer;
use crate::lifecycle::Shutdown;
use crate::live::{self, LogBroadcaster, StreamState};
use crate::maintenance::Sweeper;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::store::InstanceStore;
use crate::webhook::{WebhookError, WebhookWorker};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Ingestion listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("Live-view listener: {0}")]
    Stream(std::io::Error),

    #[error("Webhook client: {0}")]
    Webhook(#[from] WebhookError),
}

/// Handles to every running subsystem.
pub struct Running {
    shutdown: Shutdown,
    grace: Duration,
    ingest_addr: SocketAddr,
    stream_addr: Option<SocketAddr>,
    broadcaster: Arc<LogBroadcaster>,
    tracker: ConnectionTracker,
    server: JoinHandle<()>,
    stream_server: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
    webhooks: JoinHandle<()>,
}

/// Start all subsystems against `store`.
pub async fn start<S: InstanceStore>(config: &IngestConfig, store: Arc<S>) -> Result<Running, StartupError> {
    let shutdown = Shutdown::new();
    let broadcaster = Arc::new(LogBroadcaster::new());

    let (notifier, worker) = WebhookWorker::new(Arc::clone(&store), &config.webhooks)?;
    let webhooks = tokio::spawn(worker.run(shutdown.subscribe()));

    let sweeper = match Sweeper::from_policy(Arc::clone(&store), &config.expiry) {
        Some(sweeper) => Some(tokio::spawn(sweeper.run(shutdown.subscribe()))),
        None => {
            tracing::info!("Instance expiry disabled, sweeper not started");
            None
        }
    };

    let (stream_addr, stream_server) = if config.stream.enabled {
        let listener = TcpListener::bind(&config.stream.bind_address)
            .await
            .map_err(StartupError::Stream)?;
        let addr = listener.local_addr().map_err(StartupError::Stream)?;
        let app = live::router(StreamState {
            store: Arc::clone(&store),
            broadcaster: Arc::clone(&broadcaster),
            buffer: config.stream.subscriber_buffer,
        });

        let mut stop = shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "Live-view server failed");
            }
        });
        tracing::info!(address = %addr, "Live-view server listening");
        (Some(addr), Some(handle))
    } else {
        (None, None)
    };

    let listener = Listener::bind(&config.listener).await?;
    let ingest_addr = listener.local_addr().map_err(ListenerError::Bind)?;
    let ingest = IngestServer::new(config, store, Arc::clone(&broadcaster), notifier);
    let tracker = ingest.tracker();
    let server = tokio::spawn(ingest.run(listener, shutdown.subscribe()));

    Ok(Running {
        shutdown,
        grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
        ingest_addr,
        stream_addr,
        broadcaster,
        tracker,
        server,
        stream_server,
        sweeper,
        webhooks,
    })
}

impl Running {
    pub fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    pub fn stream_addr(&self) -> Option<SocketAddr> {
        self.stream_addr
    }

    pub fn broadcaster(&self) -> Arc<LogBroadcaster> {
        Arc::clone(&self.broadcaster)
    }

    /// Stop accepting, drain connections, stop background tasks.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down");
        self.shutdown.trigger();

        if let Err(e) = self.server.await {
            tracing::error!(error = %e, "Ingestion server task failed");
        }

        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(active, "Waiting for connections to drain");
            if !self.tracker.wait_for_idle(self.grace).await {
                tracing::warn!(
                    remaining = self.tracker.active_count(),
                    "Grace period elapsed with connections still open"
                );
            }
        }

        self.broadcaster.close_all();

        if let Some(handle) = self.stream_server {
            join_within("live-view server", handle, self.grace).await;
        }
        if let Some(handle) = self.sweeper {
            join_within("sweeper", handle, self.grace).await;
        }
        join_within("webhook worker", self.webhooks, self.grace).await;

        tracing::info!("Shutdown complete");
    }
}

async fn join_within(name: &'static str, handle: JoinHandle<()>, grace: Duration) {
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task failed"),
        Err(_) => tracing::warn!(task = name, "Task did not stop within grace period"),
    }
}
