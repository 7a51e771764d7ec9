//! Raw storage backends for the durable cache

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::StoreError;

/// String key-value storage behind a [`crate::LocalCache`]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get the raw value stored under a key
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a raw value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key, returning whether it existed
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// All stored keys
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Remove every key, returning how many were removed
    async fn clear(&self) -> Result<u64, StoreError>;
}

/// In-memory backend, lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let mut entries = self.entries.write();
        let count = entries.len() as u64;
        entries.clear();
        Ok(count)
    }
}
