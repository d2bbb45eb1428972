//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use instance_ingest::config::IngestConfig;
use instance_ingest::lifecycle::{start, Running};
use instance_ingest::model::{Instance, Payload, GUEST_OWNER_ID};
use instance_ingest::store::MemoryStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const DOMAIN: &str = "example.com";

/// A request received by the mock webhook receiver.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Config bound to ephemeral local ports.
pub fn test_config() -> IngestConfig {
    let mut config = IngestConfig::default();
    config.domain.base = DOMAIN.to_string();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.stream.bind_address = "127.0.0.1:0".to_string();
    config.timeouts.idle_secs = 2;
    config.timeouts.shutdown_grace_secs = 2;
    config
}

/// Start every subsystem over a fresh in-memory store.
pub async fn start_server(config: IngestConfig) -> (Running, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(config.limits.max_static_bytes));
    let running = start(&config, Arc::clone(&store)).await.unwrap();
    (running, store)
}

pub fn host_for(instance_id: &str) -> String {
    format!("{}.instances.{}", instance_id, DOMAIN)
}

pub fn guest_static(id: &str, raw: &str) -> Instance {
    Instance::new(id, GUEST_OWNER_ID, Payload::Static { raw: raw.to_string() })
}

/// Write `chunks` with a short pause between them and read until close.
pub async fn send_raw(addr: SocketAddr, chunks: &[&[u8]]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    for chunk in chunks {
        stream.write_all(chunk).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Start a mock webhook receiver that answers `204` and reports each request.
pub async fn start_webhook_receiver() -> (SocketAddr, mpsc::UnboundedReceiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(captured) = read_http_request(&mut socket).await {
                    let _ = tx.send(captured);
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Receive the next captured request or fail after `wait`.
pub async fn next_request(
    rx: &mut mpsc::UnboundedReceiver<CapturedRequest>,
    wait: Duration,
) -> Option<CapturedRequest> {
    tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
}

async fn read_http_request(socket: &mut TcpStream) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut request_line = head.lines().next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let end = buf.len().min(header_end + content_length);
    Some(CapturedRequest {
        method,
        path,
        body: String::from_utf8_lossy(&buf[header_end..end]).into_owned(),
    })
}
