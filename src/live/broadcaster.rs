//! Per-instance registry of live log viewers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::model::Log;
use crate::observability::metrics;

/// Sending half handed over by a live viewer. Payloads are serialized logs.
pub type LogChannel = mpsc::Sender<Arc<str>>;

/// Handle identifying one registered channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Maps instance id → live channels.
///
/// Constructed once at startup and shared by the ingestion server and the
/// live-view endpoint. Delivery uses `try_send`, so a slow viewer loses
/// messages instead of delaying anyone else.
#[derive(Debug, Default)]
pub struct LogBroadcaster {
    channels: DashMap<String, HashMap<SubscriberId, LogChannel>>,
    /// Reverse index so unsubscribing needs only the handle.
    owners: DashMap<SubscriberId, String>,
    next_id: AtomicU64,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `channel` for logs of `instance_id`.
    pub fn subscribe(&self, instance_id: &str, channel: LogChannel) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.channels
            .entry(instance_id.to_string())
            .or_default()
            .insert(id, channel);
        self.owners.insert(id, instance_id.to_string());

        tracing::debug!(subscriber = %id, instance_id, "Live viewer subscribed");
        id
    }

    /// Remove a channel from whichever instance it was registered under.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let Some((_, instance_id)) = self.owners.remove(&id) else {
            return;
        };

        let now_empty = match self.channels.get_mut(&instance_id) {
            Some(mut set) => {
                set.remove(&id);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.channels.remove_if(&instance_id, |_, set| set.is_empty());
        }

        tracing::debug!(subscriber = %id, instance_id = %instance_id, "Live viewer unsubscribed");
    }

    /// Push `log` to every channel registered for its instance.
    ///
    /// Closed channels are pruned on the way. Returns the number of deliveries.
    pub fn broadcast(&self, log: &Log) -> usize {
        if !self.channels.contains_key(&log.instance_id) {
            return 0;
        }

        let payload: Arc<str> = match serde_json::to_string(log) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(log_id = %log.id, error = %e, "Failed to serialize log for live viewers");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        let now_empty = match self.channels.get_mut(&log.instance_id) {
            Some(mut set) => {
                for (id, channel) in set.iter() {
                    match channel.try_send(Arc::clone(&payload)) {
                        Ok(()) => delivered += 1,
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(subscriber = %id, instance_id = %log.instance_id, "Live viewer lagging, log dropped");
                        }
                        Err(TrySendError::Closed(_)) => closed.push(*id),
                    }
                }
                for id in &closed {
                    set.remove(id);
                }
                set.is_empty()
            }
            None => return 0,
        };

        for id in &closed {
            self.owners.remove(id);
        }
        if now_empty {
            self.channels.remove_if(&log.instance_id, |_, set| set.is_empty());
        }

        metrics::record_broadcast(delivered, closed.len());
        delivered
    }

    /// Number of channels registered for `instance_id`.
    pub fn subscriber_count(&self, instance_id: &str) -> usize {
        self.channels.get(instance_id).map(|set| set.len()).unwrap_or(0)
    }

    /// Number of instances with at least one viewer.
    pub fn instance_count(&self) -> usize {
        self.channels.len()
    }

    /// Drop every channel. Viewers observe their receivers closing.
    pub fn close_all(&self) {
        let instances = self.channels.len();
        self.channels.clear();
        self.owners.clear();
        tracing::info!(instances, "Live viewers disconnected");
    }
}
