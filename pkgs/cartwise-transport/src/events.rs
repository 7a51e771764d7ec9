//! Push-channel events and wire frames

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names used on the wire
pub mod names {
    pub const SUBSCRIBE_TO_WISHLISTS: &str = "subscribe-to-wishlists";
    pub const JOIN_CART: &str = "join-cart";
    pub const LEAVE_CART: &str = "leave-cart";
    pub const SEND_MESSAGE: &str = "send-message";
    pub const TEST_CART_NOTIFICATION: &str = "testCartNotification";
    pub const GET_ACTIVE_ROOMS: &str = "get-active-rooms";

    pub const PRICE_DROP: &str = "price-drop";
    pub const NEW_CHAT_NOTIFICATION: &str = "new-chat-notification";
    pub const RECEIVE_MESSAGE: &str = "receive-message";
    pub const ACTIVE_ROOMS: &str = "active-rooms";
    pub const SESSION: &str = "session";
}

/// One JSON frame on the push channel: `{"event": ..., "data": ...}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Connection state of a [`crate::Transport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected { session_id: String },
    /// Every attempt of the last retry cycle failed
    Failed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected { .. })
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            ConnectionStatus::Connected { session_id } => Some(session_id),
            _ => None,
        }
    }
}

/// Event categories a subscriber can listen to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PriceDrop,
    ChatNotification,
    ChatMessage,
    ActiveRooms,
    Connected,
    Disconnected,
    ConnectError,
}

impl EventKind {
    /// Connection lifecycle kinds
    pub const LIFECYCLE: [EventKind; 3] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::ConnectError,
    ];
}

/// Server-to-client events, plus connection lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A wishlist or cart price drop
    PriceDrop(Value),
    /// A chat notification for a cart the user belongs to
    ChatNotification(Value),
    /// A chat message delivered to a joined cart room
    ChatMessage(Value),
    /// Reply to `get-active-rooms`
    ActiveRooms(Vec<String>),
    Connected {
        session_id: String,
    },
    Disconnected {
        reason: String,
    },
    ConnectError {
        attempt: u32,
        error: String,
    },
}

impl PushEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PushEvent::PriceDrop(_) => EventKind::PriceDrop,
            PushEvent::ChatNotification(_) => EventKind::ChatNotification,
            PushEvent::ChatMessage(_) => EventKind::ChatMessage,
            PushEvent::ActiveRooms(_) => EventKind::ActiveRooms,
            PushEvent::Connected { .. } => EventKind::Connected,
            PushEvent::Disconnected { .. } => EventKind::Disconnected,
            PushEvent::ConnectError { .. } => EventKind::ConnectError,
        }
    }

    /// Decode a server frame; `None` for events the client does not handle
    pub fn from_frame(frame: Frame) -> Option<Self> {
        match frame.event.as_str() {
            names::PRICE_DROP => Some(PushEvent::PriceDrop(frame.data)),
            names::NEW_CHAT_NOTIFICATION => Some(PushEvent::ChatNotification(frame.data)),
            names::RECEIVE_MESSAGE => Some(PushEvent::ChatMessage(frame.data)),
            names::ACTIVE_ROOMS => {
                let rooms = serde_json::from_value(frame.data).unwrap_or_default();
                Some(PushEvent::ActiveRooms(rooms))
            }
            _ => None,
        }
    }
}

/// Body of a `send-message` command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingChat {
    pub sender: String,
    #[serde(default)]
    pub sender_id: String,
    pub message: String,
    /// RFC 3339 send time, also part of the chat dedup key
    pub timestamp: String,
    pub client_id: String,
    pub cart_id: String,
    pub user_name: String,
}

/// Client-to-server commands
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    SubscribeToWishlists { user_id: String },
    JoinCart { cart_id: String },
    LeaveCart { cart_id: String },
    SendMessage(OutgoingChat),
    /// Debug only: ask the server to push a cart price drop to a room
    TestCartNotification { cart_id: String, data: Value },
    /// Debug only: list the rooms this session is in
    GetActiveRooms,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::SubscribeToWishlists { .. } => names::SUBSCRIBE_TO_WISHLISTS,
            ClientCommand::JoinCart { .. } => names::JOIN_CART,
            ClientCommand::LeaveCart { .. } => names::LEAVE_CART,
            ClientCommand::SendMessage(_) => names::SEND_MESSAGE,
            ClientCommand::TestCartNotification { .. } => names::TEST_CART_NOTIFICATION,
            ClientCommand::GetActiveRooms => names::GET_ACTIVE_ROOMS,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let data = match self {
            ClientCommand::SubscribeToWishlists { user_id } => Value::String(user_id.clone()),
            ClientCommand::JoinCart { cart_id } | ClientCommand::LeaveCart { cart_id } => {
                Value::String(cart_id.clone())
            }
            ClientCommand::SendMessage(chat) => serde_json::to_value(chat).unwrap_or(Value::Null),
            ClientCommand::TestCartNotification { cart_id, data } => {
                let mut body = match data {
                    Value::Object(map) => map.clone(),
                    _ => serde_json::Map::new(),
                };
                body.insert("cartId".to_string(), Value::String(cart_id.clone()));
                Value::Object(body)
            }
            ClientCommand::GetActiveRooms => Value::Null,
        };
        Frame::new(self.name(), data)
    }

    /// Decode a client frame (server side of the protocol)
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        let text = || frame.data.as_str().map(str::to_string);
        match frame.event.as_str() {
            names::SUBSCRIBE_TO_WISHLISTS => {
                text().map(|user_id| ClientCommand::SubscribeToWishlists { user_id })
            }
            names::JOIN_CART => text().map(|cart_id| ClientCommand::JoinCart { cart_id }),
            names::LEAVE_CART => text().map(|cart_id| ClientCommand::LeaveCart { cart_id }),
            names::SEND_MESSAGE => serde_json::from_value(frame.data.clone())
                .ok()
                .map(ClientCommand::SendMessage),
            names::TEST_CART_NOTIFICATION => {
                let cart_id = frame.data.get("cartId")?.as_str()?.to_string();
                Some(ClientCommand::TestCartNotification {
                    cart_id,
                    data: frame.data.clone(),
                })
            }
            names::GET_ACTIVE_ROOMS => Some(ClientCommand::GetActiveRooms),
            _ => None,
        }
    }
}
