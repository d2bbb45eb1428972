//! Expired instance eviction.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::ExpiryConfig;
use crate::model::now_millis;
use crate::observability::metrics;
use crate::store::{InstanceStore, StoreResult};

/// Periodically deletes expired instances and their logs.
pub struct Sweeper<S> {
    store: Arc<S>,
    interval: Duration,
}

impl<S: InstanceStore> Sweeper<S> {
    pub fn new(store: Arc<S>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Build a sweeper from the expiry policy. `None` when instances never expire.
    pub fn from_policy(store: Arc<S>, expiry: &ExpiryConfig) -> Option<Self> {
        let ttl = expiry.effective_ttl()?;
        let interval = ttl.min(Duration::from_secs(expiry.sweep_ceiling_secs));
        Some(Self::new(store, interval))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep. Returns the number of instances removed.
    pub async fn sweep_once(&self) -> StoreResult<usize> {
        let removed = self.store.remove_expired_instances(now_millis()).await?;
        if removed.is_empty() {
            return Ok(0);
        }

        for id in &removed {
            if let Err(e) = self.store.clear_logs_for_instance(id).await {
                tracing::warn!(instance_id = %id, error = %e, "Failed to clear logs of expired instance");
            }
        }

        metrics::record_swept(removed.len());
        Ok(removed.len())
    }

    /// Sweep now, then on every tick until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Maintenance sweeper starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(0) => tracing::debug!("No expired instances"),
                        Ok(removed) => tracing::info!(removed, "Removed expired instances"),
                        Err(e) => tracing::error!(error = %e, "Failed to clean up expired instances"),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Maintenance sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instance, Log, Payload, GUEST_OWNER_ID};
    use crate::store::MemoryStore;

    fn instance(id: &str, expires_at: Option<u64>) -> Instance {
        let mut instance = Instance::new(id, GUEST_OWNER_ID, Payload::Static { raw: "HTTP/1.1 200 OK\r\n\r\n".into() });
        instance.expires_at = expires_at;
        instance
    }

    #[tokio::test]
    async fn sweeps_exactly_the_expired_instance() {
        let store = Arc::new(MemoryStore::new(1024));
        let future = now_millis() + 3_600_000;
        store.insert_instance(instance("a", None)).await.unwrap();
        store.insert_instance(instance("b", Some(future))).await.unwrap();
        store.insert_instance(instance("c", Some(future))).await.unwrap();
        for id in ["a", "b", "c"] {
            store.add_log(Log::http(id, "x", "raw")).await.unwrap();
        }
        store
            .update_instance("c", |mut i| {
                i.expires_at = Some(1);
                i
            })
            .await
            .unwrap();

        let sweeper = Sweeper::new(Arc::clone(&store), Duration::from_secs(60));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

        assert_eq!(store.stats().instances, 2);
        assert!(store.logs_for_instance("c").is_empty());
        assert_eq!(store.logs_for_instance("a").len(), 1);
        assert_eq!(store.logs_for_instance("b").len(), 1);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[test]
    fn no_ttl_means_no_sweeper() {
        let store = Arc::new(MemoryStore::new(1024));
        let expiry = ExpiryConfig::default();
        assert!(Sweeper::from_policy(store, &expiry).is_none());
    }

    #[test]
    fn interval_is_capped_by_ceiling() {
        let store = Arc::new(MemoryStore::new(1024));

        let hosted = ExpiryConfig {
            hosted: true,
            ..ExpiryConfig::default()
        };
        let sweeper = Sweeper::from_policy(Arc::clone(&store), &hosted).unwrap();
        assert_eq!(sweeper.interval(), Duration::from_secs(3600));

        let short = ExpiryConfig {
            ttl_secs: Some(120),
            ..ExpiryConfig::default()
        };
        let sweeper = Sweeper::from_policy(store, &short).unwrap();
        assert_eq!(sweeper.interval(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn run_sweeps_at_startup_and_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new(1024));
        store.insert_instance(instance("old", Some(now_millis() + 3_600_000))).await.unwrap();
        store
            .update_instance("old", |mut i| {
                i.expires_at = Some(1);
                i
            })
            .await
            .unwrap();

        let (tx, rx) = broadcast::channel(1);
        let sweeper = Sweeper::new(Arc::clone(&store), Duration::from_secs(3600));
        let handle = tokio::spawn(sweeper.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.stats().instances, 0);

        tx.send(()).unwrap();
        time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
