//! Live-view HTTP endpoint.
//!
//! # Responsibilities
//! - Upgrade `GET /api/instances/{id}/stream` to a WebSocket
//! - Register the socket with the log broadcaster and forward every payload
//! - Unsubscribe when either side closes
//!
//! # Design Decisions
//! - Session authentication lives in the management layer; this endpoint only
//!   serves instances owned by the guest sentinel and answers 401 otherwise
//! - A broadcaster shutdown (`close_all`) ends every socket cleanly

use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::live::LogBroadcaster;
use crate::store::InstanceStore;

/// State injected into live-view handlers.
pub struct StreamState<S> {
    pub store: Arc<S>,
    pub broadcaster: Arc<LogBroadcaster>,
    /// Capacity of each viewer's channel.
    pub buffer: usize,
}

impl<S> Clone for StreamState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            broadcaster: Arc::clone(&self.broadcaster),
            buffer: self.buffer,
        }
    }
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
}

#[derive(Serialize)]
struct VersionInfo {
    version: &'static str,
}

/// Build the live-view router.
pub fn router<S: InstanceStore>(state: StreamState<S>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/version", get(version))
        .route("/api/instances/{id}/stream", get(stream_logs::<S>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

async fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stream_logs<S: InstanceStore>(
    State(state): State<StreamState<S>>,
    Path(instance_id): Path<String>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(upgrade) = upgrade else {
        return (StatusCode::UPGRADE_REQUIRED, "Upgrade Required").into_response();
    };

    let instance = match state.store.get_instance_by_id(&instance_id).await {
        Ok(Some(instance)) => instance,
        Ok(None) => return (StatusCode::NOT_FOUND, "Not found").into_response(),
        Err(e) => {
            tracing::error!(instance_id = %instance_id, error = %e, "Instance lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong").into_response();
        }
    };

    if !instance.is_guest() {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    upgrade.on_upgrade(move |socket| pump(socket, state, instance.id))
}

async fn pump<S: InstanceStore>(socket: WebSocket, state: StreamState<S>, instance_id: String) {
    let (tx, mut rx) = mpsc::channel(state.buffer);
    let subscriber = state.broadcaster.subscribe(&instance_id, tx);
    let (mut sink, mut incoming) = socket.split();

    loop {
        tokio::select! {
            payload = rx.recv() => {
                let Some(payload) = payload else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if sink.send(Message::Text(String::from(&*payload).into())).await.is_err() {
                    break;
                }
            }
            message = incoming.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.broadcaster.unsubscribe(subscriber);
}
