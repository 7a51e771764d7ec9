//! One signed-in user's sync client

use cartwise_store::{CacheKey, LocalCache};
use cartwise_transport::Transport;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::CartwiseApi;
use crate::center::NotificationCenter;
use crate::chat::ChatSession;
use crate::config::SyncConfig;
use crate::models::UserIdentity;
use crate::service::PriceDropService;

/// Price drops, chat badges and the open chat of one user
///
/// Explicitly constructed per user; several sessions may share a cache
/// backend through separate cache contexts.
pub struct ClientSession {
    identity: UserIdentity,
    config: SyncConfig,
    transport: Transport,
    api: Arc<dyn CartwiseApi>,
    cache: LocalCache,
    price_drops: PriceDropService,
    center: NotificationCenter,
    chat: Option<ChatSession>,
}

impl ClientSession {
    /// Remember the user, start background sync and attach the badge listener
    pub async fn start(
        identity: UserIdentity,
        transport: Transport,
        api: Arc<dyn CartwiseApi>,
        cache: LocalCache,
        config: SyncConfig,
    ) -> Self {
        if let Some(previous) = cache.load::<String>(&CacheKey::UserId).await {
            if previous != identity.user_id {
                warn!("Cache belonged to user {}, now {}", previous, identity.user_id);
            }
        }
        cache.store(&CacheKey::UserId, &identity.user_id).await;

        let center =
            NotificationCenter::load(cache.clone(), identity.clone(), config.recency_window_chrono())
                .await;
        center.attach(&transport, config.purge_interval);
        center.purge_stale(Utc::now()).await;

        let price_drops = PriceDropService::new(
            identity.clone(),
            transport.clone(),
            Arc::clone(&api),
            cache.clone(),
            config.clone(),
        );
        price_drops.start().await;

        info!("Sync session started for {}", identity.display_name);
        Self {
            identity,
            config,
            transport,
            api,
            cache,
            price_drops,
            center,
            chat: None,
        }
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn price_drops(&self) -> &PriceDropService {
        &self.price_drops
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.center
    }

    pub fn chat(&self) -> Option<&ChatSession> {
        self.chat.as_ref()
    }

    /// Open a cart chat, switching away from any chat already open
    ///
    /// Opening a chat marks its notifications read.
    pub async fn open_chat(&mut self, cart_id: &str) -> ChatSession {
        let chat = match &self.chat {
            Some(chat) => {
                let previous = chat.cart_id();
                chat.switch_cart(cart_id).await;
                if let Some(previous) = previous.filter(|p| p != cart_id) {
                    self.keep_alert_room(&previous);
                }
                chat.clone()
            }
            None => {
                let chat = ChatSession::open(
                    cart_id,
                    self.identity.clone(),
                    self.transport.clone(),
                    Arc::clone(&self.api),
                    self.cache.clone(),
                    self.config.clone(),
                )
                .await;
                self.chat = Some(chat.clone());
                chat
            }
        };
        self.center.mark_cart_read(cart_id, Utc::now()).await;
        chat
    }

    pub fn close_chat(&mut self) {
        if let Some(chat) = self.chat.take() {
            let cart_id = chat.cart_id();
            chat.close();
            if let Some(cart_id) = cart_id {
                self.keep_alert_room(&cart_id);
            }
        }
    }

    /// Closing a chat leaves its room; rejoin when price alerts need it
    fn keep_alert_room(&self, cart_id: &str) {
        if self.price_drops.joined_rooms().iter().any(|room| room == cart_id) {
            self.transport.join_cart_room(cart_id);
        }
    }

    /// Stop background work and disconnect
    pub async fn shutdown(mut self) {
        self.close_chat();
        self.center.detach();
        self.price_drops.shutdown().await;
        self.transport.disconnect();
        info!("Sync session for {} stopped", self.identity.display_name);
    }
}
