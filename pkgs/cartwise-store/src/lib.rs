//! Cartwise Store - durable local cache for the sync client
//!
//! This crate is the persistence layer behind the notification and chat
//! sync services. It plays the role a browser's origin-scoped key-value
//! storage plays for a web client: small JSON documents under well-known
//! keys, surviving restarts, shared by every context of the same origin.
//!
//! # Architecture
//!
//! - **CacheKey**: every persisted key, with its on-disk string form
//! - **CacheBackend**: raw string storage (`SqliteBackend`, `MemoryBackend`)
//! - **LocalCache**: typed JSON access plus the storage-change signal
//!
//! # Storage-change signal
//!
//! A [`LocalCache`] handle belongs to one *context*. Additional contexts
//! sharing the same backend are created with [`LocalCache::new_context`].
//! Writes publish a [`StorageChange`]; a [`StorageWatcher`] only yields
//! changes written by other contexts, mirroring how storage events never
//! fire in the tab that made the write.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use cartwise_store::{CacheConfig, CacheKey, LocalCache, SqliteBackend};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::open(&CacheConfig::default()).await?;
//! let cache = LocalCache::new(std::sync::Arc::new(backend));
//!
//! cache.store(&CacheKey::UserId, &"user-1".to_string()).await;
//! let user: Option<String> = cache.load(&CacheKey::UserId).await;
//! assert_eq!(user.as_deref(), Some("user-1"));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod entities;
pub mod error;
pub mod keys;
pub mod migration;
pub mod sqlite;

pub use backend::{CacheBackend, MemoryBackend};
pub use cache::{ContextId, LocalCache, StorageChange, StorageWatcher};
pub use error::StoreError;
pub use keys::CacheKey;
pub use sqlite::SqliteBackend;

/// Configuration for the durable cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Path to the SQLite database file
    pub db_path: std::path::PathBuf,

    /// Capacity of the storage-change broadcast channel (default: 256)
    pub change_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: std::path::PathBuf::from("cartwise-cache.db"),
            change_capacity: 256,
        }
    }
}
