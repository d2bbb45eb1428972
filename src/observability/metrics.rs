//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ingest_connections_total` (counter): accepted connections
//! - `ingest_active_connections` (gauge): current connection count
//! - `ingest_requests_total` (counter): finished requests by `outcome`
//! - `ingest_logs_captured_total` (counter): logs persisted
//! - `ingest_broadcast_deliveries_total` (counter): live-view messages queued
//! - `ingest_broadcast_pruned_total` (counter): dead viewers removed
//! - `ingest_webhook_dispatch_total` (counter): webhook attempts by `result`
//! - `ingest_swept_instances_total` (counter): instances removed by expiry
//!
//! Recording is a no-op until a recorder is installed, so the helpers are
//! safe to call from tests.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened(active: u64) {
    ::metrics::counter!("ingest_connections_total").increment(1);
    ::metrics::gauge!("ingest_active_connections").set(active as f64);
}

pub fn record_connection_closed(active: u64) {
    ::metrics::gauge!("ingest_active_connections").set(active as f64);
}

/// `outcome` is one of `ok`, `bad_request`, `unknown_instance`, `error`.
pub fn record_request(outcome: &'static str) {
    ::metrics::counter!("ingest_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_log_captured() {
    ::metrics::counter!("ingest_logs_captured_total").increment(1);
}

pub fn record_broadcast(delivered: usize, pruned: usize) {
    ::metrics::counter!("ingest_broadcast_deliveries_total").increment(delivered as u64);
    if pruned > 0 {
        ::metrics::counter!("ingest_broadcast_pruned_total").increment(pruned as u64);
    }
}

/// `result` is `delivered`, `dropped`, `lookup_error` or a [`WebhookError`](crate::webhook::WebhookError) label.
pub fn record_webhook_dispatch(result: &'static str) {
    ::metrics::counter!("ingest_webhook_dispatch_total", "result" => result).increment(1);
}

pub fn record_swept(count: usize) {
    ::metrics::counter!("ingest_swept_instances_total").increment(count as u64);
}
