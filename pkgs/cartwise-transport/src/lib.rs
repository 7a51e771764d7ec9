//! Cartwise Transport - the push channel behind price alerts and cart chat
//!
//! This crate owns the single long-lived push connection of a client
//! session. It provides:
//! - Connect / reconnect with a bounded, fixed-delay retry policy
//! - Wishlist subscriptions and cart room membership
//! - Typed server events fanned out to any number of subscribers
//! - A WebSocket connector and an in-process hub for tests and demos
//!
//! The connection object is constructed explicitly and shared by cloning
//! [`Transport`]; there is no global connection. Transport failures never
//! reach callers as errors: they are logged, retried, and reported through
//! [`ConnectionStatus`] and the lifecycle events.

pub mod connector;
pub mod error;
pub mod events;
mod listeners;
pub mod memory;
pub mod transport;
pub mod ws;

pub use connector::{PushConnector, PushLink};
pub use error::TransportError;
pub use events::{ClientCommand, ConnectionStatus, EventKind, Frame, OutgoingChat, PushEvent};
pub use listeners::{ListenerId, Subscription};
pub use memory::{MemoryConnector, MemoryHub};
pub use transport::Transport;
pub use ws::WsConnector;

use std::time::Duration;

/// Configuration for the push transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Connection attempts per connect/reconnect cycle (default: 5)
    pub max_attempts: u32,

    /// Fixed delay between attempts (default: 1s)
    pub retry_delay: Duration,

    /// Reconnect in the background when the link drops (default: true)
    pub auto_reconnect: bool,

    /// How long a connector waits for the server's session frame (default: 5s)
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
            auto_reconnect: true,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}
