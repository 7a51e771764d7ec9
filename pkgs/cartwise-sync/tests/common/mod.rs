//! Shared fixtures for sync tests
#![allow(dead_code)]

use async_trait::async_trait;
use cartwise_store::{CacheConfig, LocalCache, MemoryBackend, SqliteBackend};
use cartwise_sync::{
    ApiError, Cart, CartItem, CartwiseApi, ChatMessage, ItemRecord, NewChatMessage,
    PriceChangeRecord, SyncConfig, UserIdentity, Wishlist,
};
use cartwise_transport::{MemoryHub, Transport, TransportConfig};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct MockState {
    pub price_changes: Vec<PriceChangeRecord>,
    pub items: Vec<ItemRecord>,
    pub chats: HashMap<String, Vec<ChatMessage>>,
    pub carts: Vec<Cart>,
    pub wishlist: Option<Wishlist>,
    /// Every call fails
    pub offline: bool,
    /// Remaining POST failures before one succeeds
    pub post_failures: u32,
    /// Delay applied to chat list fetches
    pub chat_delay: Option<Duration>,
    pub chat_not_a_list: bool,
    pub posts: Vec<(String, NewChatMessage)>,
    pub change_queries: Vec<DateTime<Utc>>,
    next_id: u64,
}

/// In-memory backend API
#[derive(Default)]
pub struct MockApi {
    state: Mutex<MockState>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }

    fn check_online(&self) -> Result<(), ApiError> {
        if self.state.lock().offline {
            Err(ApiError::Unavailable("mock offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CartwiseApi for MockApi {
    async fn wishlist_price_changes(
        &self,
        since: DateTime<Utc>,
        _only_wishlist_items: bool,
        _user_id: &str,
    ) -> Result<Vec<PriceChangeRecord>, ApiError> {
        self.check_online()?;
        let mut state = self.state.lock();
        state.change_queries.push(since);
        Ok(state.price_changes.clone())
    }

    async fn items_with_recent_prices(
        &self,
        ids: &[String],
        _from_wishlists: bool,
        _user_id: &str,
    ) -> Result<Vec<ItemRecord>, ApiError> {
        self.check_online()?;
        Ok(self
            .state
            .lock()
            .items
            .iter()
            .filter(|item| ids.contains(&item.id))
            .cloned()
            .collect())
    }

    async fn chat_messages(&self, cart_id: &str) -> Result<Option<Vec<ChatMessage>>, ApiError> {
        self.check_online()?;
        let delay = self.state.lock().chat_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock();
        if state.chat_not_a_list {
            return Ok(None);
        }
        Ok(Some(state.chats.get(cart_id).cloned().unwrap_or_default()))
    }

    async fn post_chat_message(
        &self,
        cart_id: &str,
        message: &NewChatMessage,
    ) -> Result<ChatMessage, ApiError> {
        self.check_online()?;
        let mut state = self.state.lock();
        state.posts.push((cart_id.to_string(), message.clone()));
        if state.post_failures > 0 {
            state.post_failures -= 1;
            return Err(ApiError::Status {
                status: 503,
                url: format!("/chat/{cart_id}"),
            });
        }
        state.next_id += 1;
        let stored = ChatMessage {
            id: Some(format!("srv-{}", state.next_id)),
            sender: message.sender.clone(),
            sender_id: message.sender_id.clone(),
            message: message.message.clone(),
            timestamp: message.timestamp,
            client_id: message.client_id.clone(),
            cart_id: Some(cart_id.to_string()),
        };
        state
            .chats
            .entry(cart_id.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn user_carts(&self, _user_id: &str) -> Result<Vec<Cart>, ApiError> {
        self.check_online()?;
        Ok(self.state.lock().carts.clone())
    }

    async fn user_wishlist(&self, _user_id: &str) -> Result<Option<Wishlist>, ApiError> {
        self.check_online()?;
        Ok(self.state.lock().wishlist.clone())
    }
}

pub fn alice() -> UserIdentity {
    UserIdentity::new("u1", "Ann")
}

pub fn bob() -> UserIdentity {
    UserIdentity::new("u2", "Bob")
}

pub fn memory_cache() -> LocalCache {
    LocalCache::new(Arc::new(MemoryBackend::new()))
}

pub async fn sqlite_cache(path: &std::path::Path) -> LocalCache {
    let config = CacheConfig {
        db_path: path.to_path_buf(),
        ..Default::default()
    };
    let backend = SqliteBackend::open(&config)
        .await
        .expect("Failed to open cache database");
    LocalCache::new(Arc::new(backend))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cartwise=debug")
        .with_test_writer()
        .try_init();
}

pub fn fast_transport(hub: &MemoryHub) -> Transport {
    Transport::new(
        Arc::new(hub.connector()),
        TransportConfig {
            max_attempts: 2,
            retry_delay: Duration::from_millis(10),
            auto_reconnect: true,
            handshake_timeout: Duration::from_millis(100),
        },
    )
}

pub fn fast_config() -> SyncConfig {
    SyncConfig {
        send_retry_delay: Duration::from_millis(10),
        ..SyncConfig::default()
    }
}

pub fn wishlist(products: &[&str]) -> Wishlist {
    Wishlist {
        id: "w1".to_string(),
        name: "Weekly".to_string(),
        user_id: "u1".to_string(),
        products: products.iter().map(|p| p.to_string()).collect(),
    }
}

pub fn cart(id: &str, products: &[&str], notifications: Option<bool>) -> Cart {
    Cart {
        id: id.to_string(),
        name: format!("Cart {id}"),
        owner_id: "u1".to_string(),
        participants: vec!["u1".to_string(), "u2".to_string()],
        items: products
            .iter()
            .map(|p| CartItem {
                product_id: p.to_string(),
                quantity: 1,
            })
            .collect(),
        notifications,
    }
}

pub fn change(product: &str, store: &str, old: f64, new: f64, at: DateTime<Utc>) -> PriceChangeRecord {
    PriceChangeRecord {
        product_id: product.to_string(),
        product_name: format!("Product {product}"),
        old_price: old,
        new_price: new,
        store_id: store.to_string(),
        change_date: at,
        image: None,
        wishlist_id: Some("w1".to_string()),
        wishlist_name: Some("Weekly".to_string()),
    }
}

pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
