//! Cartwise Sync - notification and shared-cart chat synchronization
//!
//! This crate reconciles data arriving from three places: the durable local
//! cache, REST snapshots, and the live push channel. It deduplicates,
//! filters by ownership and recency, and writes merged results back.
//!
//! # Components
//!
//! - **NotificationReconciler**: one deduplicated, recency- and
//!   ownership-filtered list of price drops fed by push events, periodic
//!   polls and on-demand polls
//! - **PriceDropService**: owns the reconciler, its timers, its push
//!   listener and cart room membership
//! - **ChatSession**: message list of one open cart chat, merged from
//!   cache, server and push, kept in step with other contexts
//! - **NotificationCenter**: unread counts and read state for chat
//!   notifications, independent of the price-drop list
//! - **ClientSession**: wires the above for one signed-in user
//!
//! Nothing here propagates failures to a top-level handler: every async
//! boundary logs and keeps the last known good state.

pub mod api;
pub mod center;
pub mod chat;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod price_drops;
pub mod reconciler;
mod scope;
pub mod service;
pub mod session;

pub use api::{CartwiseApi, NewChatMessage};
pub use center::NotificationCenter;
pub use chat::{merge_messages, ChatSession, FetchOutcome, SendOutcome};
pub use config::SyncConfig;
pub use error::{ApiError, SyncError};
pub use http::{HttpApi, HttpApiConfig};
pub use models::{
    Cart, CartItem, ChatMessage, ChatNotificationPayload, ItemRecord, MessageKey,
    NotificationKind, PriceChangeRecord, PriceDropNotification, PricePoint, PushedPriceDrop,
    StorePrices, UserIdentity, Wishlist,
};
pub use reconciler::{IngestOutcome, IngestSource, NotificationReconciler};
pub use service::PriceDropService;
pub use session::ClientSession;
