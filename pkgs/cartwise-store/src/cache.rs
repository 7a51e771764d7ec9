//! Typed cache handle and the cross-context storage-change signal

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::backend::CacheBackend;
use crate::error::StoreError;
use crate::keys::CacheKey;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

const DEFAULT_CHANGE_CAPACITY: usize = 256;

/// Identifies one context (tab) writing to a shared backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// A write or removal observed on the shared backend
#[derive(Debug, Clone)]
pub struct StorageChange {
    pub key: String,
    /// Raw JSON after the change, `None` when the key was removed
    pub new_value: Option<String>,
    pub origin: ContextId,
}

impl StorageChange {
    /// Typed form of the changed key, if it is one the client knows
    pub fn cache_key(&self) -> Option<CacheKey> {
        CacheKey::parse(&self.key)
    }

    /// Decode the new value; `None` on removal or malformed JSON
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        let raw = self.new_value.as_deref()?;
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring malformed storage change for {}: {}", self.key, e);
                None
            }
        }
    }
}

/// Typed access to the durable cache for one context
///
/// Cloning keeps the same context; use [`LocalCache::new_context`] to model
/// another tab sharing the same storage.
#[derive(Clone)]
pub struct LocalCache {
    backend: Arc<dyn CacheBackend>,
    changes: broadcast::Sender<StorageChange>,
    context: ContextId,
}

impl LocalCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_capacity(backend, DEFAULT_CHANGE_CAPACITY)
    }

    pub fn with_capacity(backend: Arc<dyn CacheBackend>, change_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(change_capacity.max(1));
        Self {
            backend,
            changes,
            context: ContextId::next(),
        }
    }

    /// A new context over the same backend and change signal
    pub fn new_context(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            changes: self.changes.clone(),
            context: ContextId::next(),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    /// Changes written by other contexts
    pub fn watch(&self) -> StorageWatcher {
        StorageWatcher {
            rx: self.changes.subscribe(),
            context: self.context,
        }
    }

    pub async fn try_load<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> Result<Option<T>, StoreError> {
        let raw = self.backend.get(&key.as_string()).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Load a value; read failures and malformed JSON count as a miss
    pub async fn load<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match self.try_load(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Cache read for {} failed, treating as miss: {}", key, e);
                None
            }
        }
    }

    pub async fn try_store<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        let key = key.as_string();
        self.backend.set(&key, &raw).await?;
        self.publish(key, Some(raw));
        Ok(())
    }

    /// Store a value; failures are logged and reported as `false`
    pub async fn store<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> bool {
        match self.try_store(key, value).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache write for {} failed: {}", key, e);
                false
            }
        }
    }

    pub async fn try_delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let key = key.as_string();
        let existed = self.backend.remove(&key).await?;
        if existed {
            self.publish(key, None);
        }
        Ok(existed)
    }

    pub async fn delete(&self, key: &CacheKey) -> bool {
        match self.try_delete(key).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!("Cache delete for {} failed: {}", key, e);
                false
            }
        }
    }

    /// All keys currently stored
    pub async fn keys(&self) -> Vec<String> {
        match self.backend.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Listing cache keys failed: {}", e);
                Vec::new()
            }
        }
    }

    fn publish(&self, key: String, new_value: Option<String>) {
        let change = StorageChange {
            key,
            new_value,
            origin: self.context,
        };
        // No receivers is fine: nobody else is watching yet
        if self.changes.send(change).is_err() {
            debug!("Storage change dropped, no watchers");
        }
    }
}

/// Receives storage changes made by other contexts
pub struct StorageWatcher {
    rx: broadcast::Receiver<StorageChange>,
    context: ContextId,
}

impl StorageWatcher {
    /// Next change from another context, `None` once every cache handle is gone
    pub async fn recv(&mut self) -> Option<StorageChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.origin == self.context => continue,
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Storage watcher lagged, skipped {} changes", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
