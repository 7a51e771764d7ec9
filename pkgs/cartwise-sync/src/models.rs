//! Wire and cache data types
//!
//! Every type here is camelCase on the wire and in the cache, so cached
//! values stay readable by other clients of the same backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Older clients wrote `""` where an id was absent
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: String,
    pub display_name: String,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    /// Single-product drop on the user's wishlist
    #[default]
    PriceDrop,
    /// Several products of one shared cart dropped together
    CartPriceDrop,
    /// A chat message in a shared cart
    Chat,
}

/// One entry of the notification list
///
/// Chat entries reuse this shape: `product_name` carries the message text
/// and `change_date` the send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceDropNotification {
    pub id: String,
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub store_id: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub old_price: f64,
    #[serde(default)]
    pub new_price: f64,
    pub change_date: DateTime<Utc>,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub wishlist_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wishlist_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub cart_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Push session that produced a chat entry
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_id: Option<String>,
}

impl PriceDropNotification {
    /// A price-drop entry with a fresh id and no ownership attached
    pub fn price_drop(
        product_id: impl Into<String>,
        store_id: impl Into<String>,
        product_name: impl Into<String>,
        old_price: f64,
        new_price: f64,
        change_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.into(),
            store_id: store_id.into(),
            product_name: product_name.into(),
            old_price,
            new_price,
            change_date,
            wishlist_id: None,
            wishlist_name: None,
            cart_id: None,
            kind: NotificationKind::PriceDrop,
            is_read: false,
            image: None,
            sender_id: None,
            sender_name: None,
            client_id: None,
        }
    }

    /// A price is only reported when it actually went down
    pub fn is_true_drop(&self) -> bool {
        self.kind == NotificationKind::Chat || self.new_price < self.old_price
    }

    pub fn is_chat(&self) -> bool {
        self.kind == NotificationKind::Chat
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now.signed_duration_since(self.change_date) < window
    }
}

impl From<&PriceChangeRecord> for PriceDropNotification {
    fn from(record: &PriceChangeRecord) -> Self {
        let mut notification = Self::price_drop(
            record.product_id.clone(),
            record.store_id.clone(),
            record.product_name.clone(),
            record.old_price,
            record.new_price,
            record.change_date,
        );
        notification.wishlist_id = record.wishlist_id.clone();
        notification.wishlist_name = record.wishlist_name.clone();
        notification.image = record.image.clone();
        notification
    }
}

/// Row of `GET /items/wishlist-price-changes`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChangeRecord {
    pub product_id: String,
    #[serde(default)]
    pub product_name: String,
    pub old_price: f64,
    pub new_price: f64,
    #[serde(default)]
    pub store_id: String,
    pub change_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub wishlist_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wishlist_name: Option<String>,
}

/// Payload of a `price-drop` push event
///
/// Cart-room drops carry `cartId`; wishlist drops carry `wishlistId`.
/// A missing `changeDate` means "now".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushedPriceDrop {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub old_price: f64,
    #[serde(default)]
    pub new_price: f64,
    #[serde(default)]
    pub store_id: String,
    #[serde(default)]
    pub change_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub wishlist_id: Option<String>,
    #[serde(default)]
    pub wishlist_name: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub cart_id: Option<String>,
}

impl PushedPriceDrop {
    pub fn into_notification(self, now: DateTime<Utc>) -> PriceDropNotification {
        let mut notification = PriceDropNotification::price_drop(
            self.product_id,
            self.store_id,
            self.product_name,
            self.old_price,
            self.new_price,
            self.change_date.unwrap_or(now),
        );
        notification.wishlist_id = self.wishlist_id;
        notification.wishlist_name = self.wishlist_name;
        notification.cart_id = self.cart_id;
        notification.image = self.image;
        notification
    }
}

/// Dedup identity of a chat message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Server-assigned id
    Id(String),
    /// Messages not yet persisted
    Composite {
        sender: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// One message of a cart chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server id, absent until the message is persisted
    #[serde(
        rename = "_id",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub sender: String,
    #[serde(default)]
    pub sender_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub client_id: String,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub cart_id: Option<String>,
}

impl ChatMessage {
    pub fn dedup_key(&self) -> MessageKey {
        match &self.id {
            Some(id) => MessageKey::Id(id.clone()),
            None => self.content_key(),
        }
    }

    /// Sender, text and send time, regardless of server id
    pub fn content_key(&self) -> MessageKey {
        MessageKey::Composite {
            sender: self.sender.clone(),
            message: self.message.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Payload of a `new-chat-notification` push event
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatNotificationPayload {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub cart_id: Option<String>,
    #[serde(default)]
    pub cart_name: Option<String>,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub client_id: Option<String>,
}

impl ChatNotificationPayload {
    pub fn sender_name(&self) -> &str {
        if !self.sender.is_empty() {
            &self.sender
        } else {
            self.user_name.as_deref().unwrap_or_default()
        }
    }

    /// Chat entry for the notification list; `None` without a cart
    pub fn into_notification(self, now: DateTime<Utc>) -> Option<PriceDropNotification> {
        let cart_id = self.cart_id.clone()?;
        let sender_name = self.sender_name().to_string();
        let mut notification = PriceDropNotification::price_drop(
            String::new(),
            String::new(),
            self.message,
            0.0,
            0.0,
            self.timestamp.unwrap_or(now),
        );
        notification.kind = NotificationKind::Chat;
        notification.cart_id = Some(cart_id);
        notification.wishlist_name = self.cart_name;
        notification.sender_id = self.sender_id;
        notification.sender_name = Some(sender_name);
        notification.client_id = self.client_id;
        Some(notification)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// Shared cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub items: Vec<CartItem>,
    /// Cart-room price alerts; absent means enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<bool>,
}

impl Cart {
    pub fn notifications_enabled(&self) -> bool {
        self.notifications != Some(false)
    }

    pub fn product_ids(&self) -> Vec<String> {
        self.items.iter().map(|item| item.product_id.clone()).collect()
    }

    pub fn quantity_of(&self, product_id: &str) -> u32 {
        self.items
            .iter()
            .filter(|item| item.product_id == product_id)
            .map(|item| item.quantity.max(1))
            .sum()
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "your cart"
        } else {
            &self.name
        }
    }
}

/// The user's wishlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wishlist {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub products: Vec<String>,
}

impl Wishlist {
    pub fn contains(&self, product_id: &str) -> bool {
        self.products.iter().any(|p| p == product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub price: f64,
    pub date: DateTime<Utc>,
}

/// Price history of one product at one store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePrices {
    pub store_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_name: Option<String>,
    #[serde(default)]
    pub prices: Vec<PricePoint>,
}

/// Row of `GET /items?includeRecentPrices=true`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub store_prices: Vec<StorePrices>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_notification_wire_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut n = PriceDropNotification::price_drop("p1", "s1", "Milk", 3.0, 2.5, at);
        n.wishlist_id = Some("w1".to_string());

        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["productId"], "p1");
        assert_eq!(value["type"], "priceDrop");
        assert_eq!(value["wishlistId"], "w1");
        assert_eq!(value["isRead"], false);
        assert!(value.get("cartId").is_none());

        let back: PriceDropNotification = serde_json::from_value(value).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn test_legacy_empty_ids_read_as_absent() {
        let n: PriceDropNotification = serde_json::from_value(json!({
            "id": "n1",
            "productId": "p1",
            "changeDate": "2025-03-01T12:00:00Z",
            "wishlistId": "",
            "type": "chat",
            "cartId": "c1"
        }))
        .unwrap();
        assert_eq!(n.wishlist_id, None);
        assert_eq!(n.cart_id.as_deref(), Some("c1"));
        assert_eq!(n.kind, NotificationKind::Chat);
    }

    #[test]
    fn test_true_drop() {
        let at = Utc::now();
        assert!(PriceDropNotification::price_drop("p", "s", "x", 3.0, 2.0, at).is_true_drop());
        assert!(!PriceDropNotification::price_drop("p", "s", "x", 2.0, 2.0, at).is_true_drop());
        assert!(!PriceDropNotification::price_drop("p", "s", "x", 2.0, 2.5, at).is_true_drop());
    }

    #[test]
    fn test_chat_message_keys() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut message: ChatMessage = serde_json::from_value(json!({
            "sender": "Ann",
            "message": "hi",
            "timestamp": "2025-03-01T12:00:00Z",
        }))
        .unwrap();
        assert_eq!(message.sender_id, "");
        assert_eq!(
            message.dedup_key(),
            MessageKey::Composite {
                sender: "Ann".to_string(),
                message: "hi".to_string(),
                timestamp: at,
            }
        );

        message.id = Some("m1".to_string());
        assert_eq!(message.dedup_key(), MessageKey::Id("m1".to_string()));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["_id"], "m1");
    }

    #[test]
    fn test_chat_payload_into_notification() {
        let payload: ChatNotificationPayload = serde_json::from_value(json!({
            "cartId": "c1",
            "userName": "Bob",
            "senderId": "u2",
            "message": "on my way",
            "timestamp": "2025-03-01T12:00:00.250Z",
        }))
        .unwrap();
        let n = payload.into_notification(Utc::now()).unwrap();
        assert_eq!(n.kind, NotificationKind::Chat);
        assert_eq!(n.sender_name.as_deref(), Some("Bob"));
        assert_eq!(n.product_name, "on my way");

        let orphan: ChatNotificationPayload =
            serde_json::from_value(json!({"message": "lost"})).unwrap();
        assert!(orphan.into_notification(Utc::now()).is_none());
    }

    #[test]
    fn test_cart_defaults() {
        let cart: Cart = serde_json::from_value(json!({
            "_id": "c1",
            "items": [{"productId": "p1"}, {"productId": "p2", "quantity": 3}]
        }))
        .unwrap();
        assert!(cart.notifications_enabled());
        assert_eq!(cart.product_ids(), vec!["p1", "p2"]);
        assert_eq!(cart.quantity_of("p1"), 1);
        assert_eq!(cart.quantity_of("p2"), 3);
        assert_eq!(cart.display_name(), "your cart");
    }
}
