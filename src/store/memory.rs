//! In-memory store with optional JSON snapshot persistence.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{InstanceStore, StoreError, StoreResult};
use crate::model::{now_millis, Instance, Log, Webhook};

/// Everything the store holds. One lock guards all tables so cascades are atomic.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    instances: Vec<Instance>,
    #[serde(default)]
    logs: Vec<Log>,
    #[serde(default)]
    webhooks: Vec<Webhook>,
}

/// Table sizes reported at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub instances: usize,
    pub logs: usize,
    pub webhooks: usize,
}

/// A thread-safe store for instances, logs and webhooks.
///
/// When a persistence path is set, the full snapshot is rewritten after every
/// mutation. A mutation whose snapshot cannot be written is rolled back, so
/// memory never holds state the file does not.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    persistence_path: Option<PathBuf>,
    /// Held from mutation until its snapshot is written.
    persist_lock: Mutex<()>,
    max_static_bytes: usize,
}

impl MemoryStore {
    /// Create an empty, non-persistent store.
    pub fn new(max_static_bytes: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            persistence_path: None,
            persist_lock: Mutex::new(()),
            max_static_bytes,
        }
    }

    /// Load from a snapshot file if it exists. Later mutations are written back to it.
    pub fn load_from_file(path: impl AsRef<Path>, max_static_bytes: usize) -> StoreResult<Self> {
        let path = path.as_ref();
        let tables = if path.exists() {
            let content = std::fs::read(path)?;
            if content.is_empty() {
                Tables::default()
            } else {
                serde_json::from_slice(&content)?
            }
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Tables::default()
        };

        let store = Self {
            tables: RwLock::new(tables),
            persistence_path: Some(path.to_path_buf()),
            persist_lock: Mutex::new(()),
            max_static_bytes,
        };

        let stats = store.stats();
        tracing::info!(
            path = %path.display(),
            instances = stats.instances,
            logs = stats.logs,
            webhooks = stats.webhooks,
            "Store snapshot loaded"
        );
        Ok(store)
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> StoreStats {
        let tables = self.read();
        StoreStats {
            instances: tables.instances.len(),
            logs: tables.logs.len(),
            webhooks: tables.webhooks.len(),
        }
    }

    /// Apply `mutate` and persist the result. On a failed write the tables
    /// are restored to their state before `mutate` ran.
    async fn commit<T, F>(&self, mutate: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Tables) -> StoreResult<Commit<T>> + Send,
        T: Send,
    {
        let Some(path) = &self.persistence_path else {
            let mut tables = self.write();
            return mutate(&mut *tables).map(Commit::into_value);
        };

        let _guard = self.persist_lock.lock().await;
        let (value, previous, snapshot) = {
            let mut tables = self.write();
            let previous = tables.clone();
            match mutate(&mut *tables)? {
                Commit::Unchanged(value) => return Ok(value),
                Commit::Changed(value) => {
                    let snapshot = serde_json::to_vec(&*tables);
                    (value, previous, snapshot)
                }
            }
        };

        let written = match snapshot {
            Ok(bytes) => write_snapshot(path, bytes).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            tracing::error!(path = %path.display(), error = %e, "Snapshot write failed, mutation rolled back");
            *self.write() = previous;
            return Err(e);
        }
        Ok(value)
    }

    fn check_static_limit(&self, instance: &Instance) -> StoreResult<()> {
        match instance.static_len() {
            Some(size) if size > self.max_static_bytes => Err(StoreError::PayloadTooLarge {
                size,
                limit: self.max_static_bytes,
            }),
            _ => Ok(()),
        }
    }

    /// Register a new instance.
    pub async fn insert_instance(&self, instance: Instance) -> StoreResult<Instance> {
        self.check_static_limit(&instance)?;
        self.commit(move |tables| {
            if tables.instances.iter().any(|i| i.id == instance.id) {
                return Err(StoreError::DuplicateInstance(instance.id));
            }
            tables.instances.push(instance.clone());
            Ok(Commit::Changed(instance))
        })
        .await
    }

    /// Apply `updater` to a live instance. Returns `None` for unknown or expired ids.
    pub async fn update_instance<F>(&self, id: &str, updater: F) -> StoreResult<Option<Instance>>
    where
        F: FnOnce(Instance) -> Instance + Send,
    {
        self.commit(|tables| {
            let Some(slot) = tables.instances.iter_mut().find(|i| i.id == id) else {
                return Ok(Commit::Unchanged(None));
            };
            if slot.is_expired(now_millis()) {
                return Ok(Commit::Unchanged(None));
            }

            let mut updated = updater(slot.clone());
            updated.id = slot.id.clone();
            self.check_static_limit(&updated)?;
            *slot = updated.clone();
            Ok(Commit::Changed(Some(updated)))
        })
        .await
    }

    /// Delete an instance and its logs. Locked instances are refused.
    pub async fn delete_instance(&self, id: &str) -> StoreResult<()> {
        self.commit(|tables| {
            let Some(index) = tables.instances.iter().position(|i| i.id == id) else {
                return Err(StoreError::InstanceNotFound(id.to_string()));
            };
            if tables.instances[index].locked {
                return Err(StoreError::Locked(id.to_string()));
            }
            tables.instances.remove(index);
            tables.logs.retain(|l| l.instance_id != id);
            Ok(Commit::Changed(()))
        })
        .await
    }

    /// Live instances belonging to `owner_id`.
    pub fn instances_by_owner(&self, owner_id: &str) -> Vec<Instance> {
        let now = now_millis();
        self.read()
            .instances
            .iter()
            .filter(|i| i.owner_id == owner_id && !i.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn logs_for_instance(&self, instance_id: &str) -> Vec<Log> {
        self.read()
            .logs
            .iter()
            .filter(|l| l.instance_id == instance_id)
            .cloned()
            .collect()
    }

    pub async fn add_webhook(&self, webhook: Webhook) -> StoreResult<Webhook> {
        self.commit(move |tables| {
            tables.webhooks.push(webhook.clone());
            Ok(Commit::Changed(webhook))
        })
        .await
    }

    pub fn webhook_by_id(&self, id: &str) -> Option<Webhook> {
        self.read().webhooks.iter().find(|w| w.id == id).cloned()
    }

    /// Delete a webhook and drop its id from every instance.
    pub async fn delete_webhook(&self, id: &str) -> StoreResult<()> {
        self.commit(|tables| {
            let before = tables.webhooks.len();
            tables.webhooks.retain(|w| w.id != id);
            if tables.webhooks.len() == before {
                return Ok(Commit::Unchanged(()));
            }
            for instance in tables.instances.iter_mut() {
                instance.webhook_ids.retain(|w| w != id);
            }
            Ok(Commit::Changed(()))
        })
        .await
    }
}

/// Result of a mutation: whether the tables changed and need persisting.
enum Commit<T> {
    Changed(T),
    Unchanged(T),
}

impl<T> Commit<T> {
    fn into_value(self) -> T {
        match self {
            Commit::Changed(value) | Commit::Unchanged(value) => value,
        }
    }
}

async fn write_snapshot(path: &Path, bytes: Vec<u8>) -> StoreResult<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

impl InstanceStore for MemoryStore {
    async fn get_instance_by_id(&self, id: &str) -> StoreResult<Option<Instance>> {
        let now = now_millis();
        Ok(self
            .read()
            .instances
            .iter()
            .find(|i| i.id == id && !i.is_expired(now))
            .cloned())
    }

    async fn add_log(&self, log: Log) -> StoreResult<Log> {
        self.commit(move |tables| {
            if !tables.instances.iter().any(|i| i.id == log.instance_id) {
                return Err(StoreError::InstanceNotFound(log.instance_id));
            }
            tables.logs.push(log.clone());
            Ok(Commit::Changed(log))
        })
        .await
    }

    async fn remove_expired_instances(&self, now: u64) -> StoreResult<Vec<String>> {
        self.commit(|tables| {
            let removed: Vec<String> = tables
                .instances
                .iter()
                .filter(|i| i.is_expired(now))
                .map(|i| i.id.clone())
                .collect();
            if removed.is_empty() {
                return Ok(Commit::Unchanged(removed));
            }
            tables.instances.retain(|i| !i.is_expired(now));
            tables.logs.retain(|l| !removed.contains(&l.instance_id));
            Ok(Commit::Changed(removed))
        })
        .await
    }

    async fn clear_logs_for_instance(&self, id: &str) -> StoreResult<()> {
        self.commit(|tables| {
            let before = tables.logs.len();
            tables.logs.retain(|l| l.instance_id != id);
            if tables.logs.len() == before {
                Ok(Commit::Unchanged(()))
            } else {
                Ok(Commit::Changed(()))
            }
        })
        .await
    }

    async fn get_webhooks_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Webhook>> {
        Ok(self
            .read()
            .webhooks
            .iter()
            .filter(|w| ids.contains(&w.id))
            .cloned()
            .collect())
    }
}
