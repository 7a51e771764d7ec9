//! Typed keys for the durable cache

use std::fmt;

const CHAT_MESSAGES_PREFIX: &str = "chat_messages_";

/// Key for the last successful periodic price check
pub const LAST_PRICE_CHECK_KEY: &str = "lastPriceCheckTimestamp";

/// Key for the ids of carts the user belongs to
pub const USER_CARTS_KEY: &str = "userCarts";

/// Key for chat notifications shown in badges
pub const CHAT_NOTIFICATIONS_KEY: &str = "chatNotifications";

/// Key for the per-cart last-read timestamps
pub const LAST_READ_CHAT_KEY: &str = "lastReadChatNotifications";

/// Key for the product id to wishlist name map
pub const PRODUCT_WISHLIST_MAP_KEY: &str = "productWishlistMap";

/// Key for the ids of carts with price alerts enabled
pub const ALERT_CARTS_KEY: &str = "alertCarts";

/// Key for the signed-in user id
pub const USER_ID_KEY: &str = "userId";

/// Key for the durable mirror of price-drop notifications
pub const PRICE_DROP_NOTIFICATIONS_KEY: &str = "priceDropNotifications";

/// Every key the sync client persists
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Message list of one cart chat (`chat_messages_<cartId>`)
    ChatMessages(String),
    LastPriceCheck,
    UserCarts,
    /// Carts whose rooms are joined for price alerts
    AlertCarts,
    ChatNotifications,
    LastReadChatNotifications,
    ProductWishlistMap,
    UserId,
    PriceDropNotifications,
}

impl CacheKey {
    /// Key of the message list for a cart
    pub fn chat_messages(cart_id: impl Into<String>) -> Self {
        CacheKey::ChatMessages(cart_id.into())
    }

    /// On-disk string form of the key
    pub fn as_string(&self) -> String {
        match self {
            CacheKey::ChatMessages(cart_id) => format!("{CHAT_MESSAGES_PREFIX}{cart_id}"),
            CacheKey::LastPriceCheck => LAST_PRICE_CHECK_KEY.to_string(),
            CacheKey::UserCarts => USER_CARTS_KEY.to_string(),
            CacheKey::AlertCarts => ALERT_CARTS_KEY.to_string(),
            CacheKey::ChatNotifications => CHAT_NOTIFICATIONS_KEY.to_string(),
            CacheKey::LastReadChatNotifications => LAST_READ_CHAT_KEY.to_string(),
            CacheKey::ProductWishlistMap => PRODUCT_WISHLIST_MAP_KEY.to_string(),
            CacheKey::UserId => USER_ID_KEY.to_string(),
            CacheKey::PriceDropNotifications => PRICE_DROP_NOTIFICATIONS_KEY.to_string(),
        }
    }

    /// Recover a key from its string form
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(cart_id) = raw.strip_prefix(CHAT_MESSAGES_PREFIX) {
            if cart_id.is_empty() {
                return None;
            }
            return Some(CacheKey::ChatMessages(cart_id.to_string()));
        }

        match raw {
            LAST_PRICE_CHECK_KEY => Some(CacheKey::LastPriceCheck),
            USER_CARTS_KEY => Some(CacheKey::UserCarts),
            ALERT_CARTS_KEY => Some(CacheKey::AlertCarts),
            CHAT_NOTIFICATIONS_KEY => Some(CacheKey::ChatNotifications),
            LAST_READ_CHAT_KEY => Some(CacheKey::LastReadChatNotifications),
            PRODUCT_WISHLIST_MAP_KEY => Some(CacheKey::ProductWishlistMap),
            USER_ID_KEY => Some(CacheKey::UserId),
            PRICE_DROP_NOTIFICATIONS_KEY => Some(CacheKey::PriceDropNotifications),
            _ => None,
        }
    }

    /// Cart id for cart-scoped keys
    pub fn cart_id(&self) -> Option<&str> {
        match self {
            CacheKey::ChatMessages(cart_id) => Some(cart_id),
            _ => None,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}
