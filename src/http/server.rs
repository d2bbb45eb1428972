//! Raw TCP ingestion server.
//!
//! # Responsibilities
//! - Accept connections until shutdown
//! - Frame exactly one request per connection under an idle timeout
//! - Resolve the target instance and persist a log of the request
//! - Fan the log out to live viewers and webhooks without waiting on them
//! - Answer with the instance's stored response and close the connection
//!
//! # Error Mapping
//! - Framing, parsing and routing failures → `400` with the failure message
//! - Dynamic instances → `500`, after the request has been logged
//! - Store failures → `500 "Something went wrong"`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use crate::config::{ForwardingConfig, IngestConfig};
use crate::http::framer::{FrameError, FrameLimits, RequestFramer};
use crate::http::request::{strip_header, MalformedRequest, RequestHead};
use crate::http::response::{adjust_content_length, error_response};
use crate::live::LogBroadcaster;
use crate::model::{Log, Payload};
use crate::net::{ConnectionId, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::routing::{HostError, HostResolver};
use crate::store::{InstanceStore, StoreError};
use crate::webhook::WebhookNotifier;

const READ_CHUNK: usize = 8 * 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Why a request was not answered with an instance response.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Malformed(#[from] MalformedRequest),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("Instance not found")]
    UnknownInstance(String),

    #[error("Dynamic instances are not supported yet")]
    DynamicUnsupported,

    #[error("Store failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for IngestError {
    fn from(e: StoreError) -> Self {
        match e {
            // Deleted between lookup and log write.
            StoreError::InstanceNotFound(id) => IngestError::UnknownInstance(id),
            other => IngestError::Store(other),
        }
    }
}

impl IngestError {
    pub fn status(&self) -> &'static str {
        match self {
            IngestError::Frame(_)
            | IngestError::Malformed(_)
            | IngestError::Host(_)
            | IngestError::UnknownInstance(_) => "400 Bad Request",
            IngestError::DynamicUnsupported | IngestError::Store(_) => "500 Internal Server Error",
        }
    }

    /// Message sent to the client. Internal failures are not described.
    pub fn public_message(&self) -> String {
        match self {
            IngestError::Store(_) => "Something went wrong".to_string(),
            other => other.to_string(),
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            IngestError::Frame(_) | IngestError::Malformed(_) | IngestError::Host(_) => "bad_request",
            IngestError::UnknownInstance(_) => "unknown_instance",
            IngestError::DynamicUnsupported => "dynamic",
            IngestError::Store(_) => "error",
        }
    }

    fn to_response(&self) -> Vec<u8> {
        error_response(self.status(), &self.public_message())
    }
}

/// State shared by every connection task.
struct Shared<S> {
    store: Arc<S>,
    resolver: HostResolver,
    broadcaster: Arc<LogBroadcaster>,
    notifier: WebhookNotifier,
    limits: FrameLimits,
    idle_timeout: Duration,
    forwarding: ForwardingConfig,
    tracker: ConnectionTracker,
}

/// The ingestion server. Cheap to clone.
pub struct IngestServer<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for IngestServer<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: InstanceStore> IngestServer<S> {
    pub fn new(
        config: &IngestConfig,
        store: Arc<S>,
        broadcaster: Arc<LogBroadcaster>,
        notifier: WebhookNotifier,
    ) -> Self {
        let shared = Shared {
            store,
            resolver: HostResolver::new(&config.domain.base),
            broadcaster,
            notifier,
            limits: FrameLimits {
                max_header_bytes: config.limits.max_header_bytes,
                max_body_bytes: config.limits.max_body_bytes,
            },
            idle_timeout: Duration::from_secs(config.timeouts.idle_secs),
            forwarding: config.forwarding.clone(),
            tracker: ConnectionTracker::new(),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Tracker of in-flight connections, for draining at shutdown.
    pub fn tracker(&self) -> ConnectionTracker {
        self.shared.tracker.clone()
    }

    /// Accept connections until the shutdown signal fires.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                address = %addr,
                instances_domain = %self.shared.resolver.instances_domain(),
                "Ingestion server starting"
            );
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Ingestion server stopped accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            server.serve_connection(stream, peer).await;
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        // Avoid spinning on fd exhaustion.
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
    }

    /// Handle one connection: read a request, write one response, close.
    pub async fn serve_connection<T>(&self, mut stream: T, peer: SocketAddr)
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let guard = self.shared.tracker.track();
        let conn_id = guard.id();
        tracing::debug!(connection_id = %conn_id, peer_addr = %peer, "Connection opened");

        let mut framer = RequestFramer::new(self.shared.limits);
        let read = tokio::time::timeout(self.shared.idle_timeout, read_request(&mut stream, &mut framer)).await;

        match read {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                tracing::debug!(connection_id = %conn_id, "Peer closed before completing a request");
                return;
            }
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %conn_id, error = %e, "Read failed");
                return;
            }
            Err(_) => {
                tracing::debug!(connection_id = %conn_id, "Idle timeout, closing connection");
                return;
            }
        }

        let result = match (framer.error(), framer.request(), framer.header_len()) {
            (Some(e), _, _) => Err(IngestError::Frame(e.clone())),
            (None, Some(request), Some(header_len)) => self.process(conn_id, request, header_len, peer).await,
            _ => return,
        };

        let (response, outcome) = match result {
            Ok(response) => (response, "ok"),
            Err(e) => {
                match &e {
                    IngestError::Store(inner) => {
                        tracing::error!(connection_id = %conn_id, error = %inner, "Request failed")
                    }
                    other => {
                        tracing::debug!(connection_id = %conn_id, error = %other, "Request rejected")
                    }
                }
                (e.to_response(), e.outcome())
            }
        };

        if let Err(e) = stream.write_all(&response).await {
            tracing::debug!(connection_id = %conn_id, error = %e, "Failed to write response");
        }
        let _ = stream.shutdown().await;
        metrics::record_request(outcome);
    }

    async fn process(
        &self,
        conn_id: ConnectionId,
        request: &[u8],
        header_len: usize,
        peer: SocketAddr,
    ) -> Result<Vec<u8>, IngestError> {
        let head = RequestHead::parse(&request[..header_len])?;
        let instance_id = self.shared.resolver.resolve(head.host())?;

        let instance = self
            .shared
            .store
            .get_instance_by_id(&instance_id)
            .await?
            .ok_or(IngestError::UnknownInstance(instance_id))?;

        let address = self.caller_address(&head, peer);
        let raw = strip_header(&String::from_utf8_lossy(request), &self.shared.forwarding.header);

        let log = self.shared.store.add_log(Log::http(&instance.id, address, raw)).await?;
        tracing::info!(
            connection_id = %conn_id,
            instance_id = %log.instance_id,
            address = %log.address,
            method = %head.method,
            path = %head.path,
            "Log captured"
        );
        metrics::record_log_captured();

        let log = Arc::new(log);
        let broadcaster = Arc::clone(&self.shared.broadcaster);
        let live = Arc::clone(&log);
        tokio::spawn(async move {
            broadcaster.broadcast(&live);
        });
        self.shared.notifier.notify(log, &instance.webhook_ids);

        match instance.payload {
            Payload::Static { raw } => Ok(adjust_content_length(&raw).into_bytes()),
            Payload::Dynamic { .. } => Err(IngestError::DynamicUnsupported),
        }
    }

    /// The forwarding header is only honoured from trusted proxies.
    fn caller_address(&self, head: &RequestHead, peer: SocketAddr) -> String {
        let forwarding = &self.shared.forwarding;
        if forwarding.trusted_proxies.contains(&peer.ip()) {
            if let Some(forwarded) = head.header(&forwarding.header).filter(|v| !v.is_empty()) {
                return forwarded.to_string();
            }
        }
        peer.ip().to_string()
    }
}

/// Read until the framer completes or fails. `Ok(false)` on EOF.
async fn read_request<T>(stream: &mut T, framer: &mut RequestFramer) -> std::io::Result<bool>
where
    T: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }
        framer.append(&buf[..n]);
        if framer.is_complete() || framer.has_error() {
            return Ok(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookConfig;
    use crate::model::{Instance, Processor};
    use crate::store::MemoryStore;
    use crate::webhook::WebhookWorker;
    use tokio::io::duplex;
    use tokio::sync::mpsc;

    const PEER: &str = "203.0.113.7:40000";

    struct Harness {
        server: IngestServer<MemoryStore>,
        store: Arc<MemoryStore>,
        broadcaster: Arc<LogBroadcaster>,
    }

    fn harness(configure: impl FnOnce(&mut IngestConfig)) -> Harness {
        harness_over(Arc::new(MemoryStore::new(IngestConfig::default().limits.max_static_bytes)), configure)
    }

    fn harness_over(store: Arc<MemoryStore>, configure: impl FnOnce(&mut IngestConfig)) -> Harness {
        let mut config = IngestConfig::default();
        config.domain.base = "example.com".to_string();
        configure(&mut config);

        let broadcaster = Arc::new(LogBroadcaster::new());
        let (notifier, _worker) = WebhookWorker::new(Arc::clone(&store), &WebhookConfig::default()).unwrap();
        let server = IngestServer::new(&config, Arc::clone(&store), Arc::clone(&broadcaster), notifier);
        Harness {
            server,
            store,
            broadcaster,
        }
    }

    async fn exchange(server: &IngestServer<MemoryStore>, chunks: &[&[u8]]) -> String {
        let (mut client, server_side) = duplex(64 * 1024);
        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.serve_connection(server_side, PEER.parse().unwrap()).await })
        };

        for chunk in chunks {
            client.write_all(chunk).await.unwrap();
        }
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        task.await.unwrap();
        String::from_utf8(response).unwrap()
    }

    fn static_instance(id: &str, raw: &str) -> Instance {
        Instance::new(id, "guest", Payload::Static { raw: raw.to_string() })
    }

    #[tokio::test]
    async fn static_instance_replays_corrected_response() {
        let h = harness(|_| {});
        h.store
            .insert_instance(static_instance("abc", "HTTP/1.1 200 OK\r\nContent-Length: 99\r\n\r\nhello"))
            .await
            .unwrap();

        let response = exchange(
            &h.server,
            &[b"GET /x HTTP/1.1\r\nHost: abc.instances.example.com\r\n\r\n"],
        )
        .await;

        assert_eq!(response, "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
        let logs = h.store.logs_for_instance("abc");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].address, "203.0.113.7");
        assert!(logs[0].raw.starts_with("GET /x HTTP/1.1"));
    }

    #[tokio::test]
    async fn fragmented_request_with_body() {
        let h = harness(|_| {});
        h.store
            .insert_instance(static_instance("abc", "HTTP/1.1 204 No Content\r\n\r\n"))
            .await
            .unwrap();

        let response = exchange(
            &h.server,
            &[
                b"POST / HTTP/1.1\r\nHo",
                b"st: abc.instances.example.com\r\nContent-Len",
                b"gth: 4\r\n\r",
                b"\nab",
                b"cd",
            ],
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 204 No Content"));
        let logs = h.store.logs_for_instance("abc");
        assert!(logs[0].raw.ends_with("\r\n\r\nabcd"));
    }

    #[tokio::test]
    async fn unknown_instance_is_rejected_without_log() {
        let h = harness(|_| {});
        let response = exchange(
            &h.server,
            &[b"GET / HTTP/1.1\r\nHost: nope.instances.example.com\r\n\r\n"],
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.ends_with("\r\n\r\nInstance not found"));
        assert_eq!(h.store.stats().logs, 0);
    }

    #[tokio::test]
    async fn routing_errors_are_bad_requests() {
        let h = harness(|_| {});

        let response = exchange(&h.server, &[b"GET / HTTP/1.1\r\n\r\n"]).await;
        assert!(response.ends_with("Missing Host header"));

        let response = exchange(&h.server, &[b"GET / HTTP/1.1\r\nHost: evil.com\r\n\r\n"]).await;
        assert!(response.ends_with("Host does not end with instances subdomain"));

        let response = exchange(&h.server, &[b"\x01\x02 garbage\r\n\r\n"]).await;
        assert!(response.ends_with("Malformed request"));
    }

    #[tokio::test]
    async fn framing_error_message_is_returned() {
        let h = harness(|_| {});
        let response = exchange(
            &h.server,
            &[b"POST / HTTP/1.1\r\nHost: a.instances.example.com\r\nContent-Length: -1\r\n\r\n"],
        )
        .await;

        assert_eq!(
            response,
            "HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain\r\nContent-Length: 22\r\nConnection: close\r\n\r\nInvalid Content-Length"
        );
    }

    #[tokio::test]
    async fn dynamic_instance_is_logged_then_fails() {
        let h = harness(|_| {});
        let payload = Payload::Dynamic {
            processors: vec![Processor {
                name: "main".to_string(),
                code: "return 1".to_string(),
            }],
        };
        h.store.insert_instance(Instance::new("dyn", "guest", payload)).await.unwrap();

        let response = exchange(
            &h.server,
            &[b"GET / HTTP/1.1\r\nHost: dyn.instances.example.com\r\n\r\n"],
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error"));
        assert_eq!(h.store.logs_for_instance("dyn").len(), 1);
    }

    #[tokio::test]
    async fn forwarded_address_requires_trusted_peer() {
        let raw = b"GET / HTTP/1.1\r\nHost: abc.instances.example.com\r\nX-Internal-Real-IP: 198.51.100.1\r\n\r\n";

        let untrusted = harness(|_| {});
        untrusted
            .store
            .insert_instance(static_instance("abc", "HTTP/1.1 200 OK\r\n\r\n"))
            .await
            .unwrap();
        exchange(&untrusted.server, &[raw]).await;
        let log = &untrusted.store.logs_for_instance("abc")[0];
        assert_eq!(log.address, "203.0.113.7");
        assert!(!log.raw.to_lowercase().contains("x-internal-real-ip"));

        let trusted = harness(|c| c.forwarding.trusted_proxies = vec!["203.0.113.7".parse().unwrap()]);
        trusted
            .store
            .insert_instance(static_instance("abc", "HTTP/1.1 200 OK\r\n\r\n"))
            .await
            .unwrap();
        exchange(&trusted.server, &[raw]).await;
        assert_eq!(trusted.store.logs_for_instance("abc")[0].address, "198.51.100.1");
    }

    #[tokio::test]
    async fn captured_log_reaches_live_viewers() {
        let h = harness(|_| {});
        h.store
            .insert_instance(static_instance("abc", "HTTP/1.1 200 OK\r\n\r\n"))
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        h.broadcaster.subscribe("abc", tx);

        exchange(
            &h.server,
            &[b"GET /live HTTP/1.1\r\nHost: abc.instances.example.com\r\n\r\n"],
        )
        .await;

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["instanceId"], "abc");
        assert_eq!(value["type"], "http");
    }

    #[tokio::test]
    async fn hundreds_of_headers_are_logged() {
        let h = harness(|_| {});
        h.store
            .insert_instance(static_instance("abc", "HTTP/1.1 200 OK\r\n\r\nok"))
            .await
            .unwrap();

        let mut raw = String::from("GET / HTTP/1.1\r\nHost: abc.instances.example.com\r\n");
        for n in 0..200 {
            raw.push_str(&format!("x{}: a\r\n", n));
        }
        raw.push_str("\r\n");

        let response = exchange(&h.server, &[raw.as_bytes()]).await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        let logs = h.store.logs_for_instance("abc");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].raw, raw);
    }

    #[tokio::test]
    async fn failed_log_write_answers_500_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let store = Arc::new(MemoryStore::load_from_file(data_dir.join("db.json"), 1024).unwrap());
        let h = harness_over(store, |_| {});
        h.store
            .insert_instance(static_instance("abc", "HTTP/1.1 200 OK\r\n\r\nok"))
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        h.broadcaster.subscribe("abc", tx);

        std::fs::remove_dir_all(&data_dir).unwrap();
        let response = exchange(
            &h.server,
            &[b"GET / HTTP/1.1\r\nHost: abc.instances.example.com\r\n\r\n"],
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(response.ends_with("\r\n\r\nSomething went wrong"));
        assert!(h.store.logs_for_instance("abc").is_empty());
        assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn idle_connection_is_closed_silently() {
        let h = harness(|c| c.timeouts.idle_secs = 1);
        let (mut client, server_side) = duplex(1024);
        let server = h.server.clone();
        let task = tokio::spawn(async move { server.serve_connection(server_side, PEER.parse().unwrap()).await });

        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        task.await.unwrap();

        assert!(response.is_empty());
        assert_eq!(h.server.tracker().active_count(), 0);
    }
}
