//! REST collaborator contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ApiError;
use crate::models::{Cart, ChatMessage, ItemRecord, PriceChangeRecord, Wishlist};

/// Body of `POST /chat/{cartId}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChatMessage {
    pub sender: String,
    pub sender_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub client_id: String,
}

impl From<&ChatMessage> for NewChatMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            sender: message.sender.clone(),
            sender_id: message.sender_id.clone(),
            message: message.message.clone(),
            timestamp: message.timestamp,
            client_id: message.client_id.clone(),
        }
    }
}

/// Backend endpoints the sync services depend on
#[async_trait]
pub trait CartwiseApi: Send + Sync {
    /// `GET /items/wishlist-price-changes`
    async fn wishlist_price_changes(
        &self,
        since: DateTime<Utc>,
        only_wishlist_items: bool,
        user_id: &str,
    ) -> Result<Vec<PriceChangeRecord>, ApiError>;

    /// `GET /items?ids=..&includeRecentPrices=true`
    async fn items_with_recent_prices(
        &self,
        ids: &[String],
        from_wishlists: bool,
        user_id: &str,
    ) -> Result<Vec<ItemRecord>, ApiError>;

    /// `GET /chat/{cartId}`; `None` when the body is not a list
    async fn chat_messages(&self, cart_id: &str) -> Result<Option<Vec<ChatMessage>>, ApiError>;

    /// `POST /chat/{cartId}`; returns the stored message with its `_id`
    async fn post_chat_message(
        &self,
        cart_id: &str,
        message: &NewChatMessage,
    ) -> Result<ChatMessage, ApiError>;

    /// `GET /carts?userId=..`
    async fn user_carts(&self, user_id: &str) -> Result<Vec<Cart>, ApiError>;

    /// `GET /wishlists?userId=..`
    async fn user_wishlist(&self, user_id: &str) -> Result<Option<Wishlist>, ApiError>;
}
