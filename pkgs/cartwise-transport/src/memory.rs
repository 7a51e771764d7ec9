//! In-process push server
//!
//! `MemoryHub` implements the server half of the push protocol: wishlist
//! subscriptions, cart rooms, chat fan-out and the debug commands. It backs
//! tests and offline demos, and can drop sessions or refuse connections to
//! exercise the transport's retry path.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::connector::{PushConnector, PushLink};
use crate::error::TransportError;
use crate::events::{names, ClientCommand, Frame};

#[derive(Default)]
struct HubState {
    sessions: HashMap<String, mpsc::UnboundedSender<Frame>>,
    rooms: HashMap<String, HashSet<String>>,
    wishlist_subscribers: HashMap<String, HashSet<String>>,
    refuse_opens: u32,
    opened: u64,
    received: Vec<(String, Frame)>,
}

impl HubState {
    fn send_to(&self, session_id: &str, frame: Frame) -> bool {
        match self.sessions.get(session_id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    fn send_to_room(&self, cart_id: &str, frame: &Frame) -> usize {
        let Some(members) = self.rooms.get(cart_id) else {
            return 0;
        };
        members
            .iter()
            .filter(|session_id| self.send_to(session_id, frame.clone()))
            .count()
    }

    fn remove_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        for members in self.rooms.values_mut() {
            members.remove(session_id);
        }
        for sessions in self.wishlist_subscribers.values_mut() {
            sessions.remove(session_id);
        }
    }
}

/// In-process push server shared by any number of connectors
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { hub: self.clone() }
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next_opens(&self, count: u32) {
        self.state.lock().refuse_opens = count;
    }

    /// Successful opens since creation
    pub fn open_count(&self) -> u64 {
        self.state.lock().opened
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close a session from the server side
    pub fn drop_session(&self, session_id: &str) -> bool {
        let mut state = self.state.lock();
        let existed = state.sessions.contains_key(session_id);
        state.remove_session(session_id);
        existed
    }

    pub fn drop_all_sessions(&self) {
        let mut state = self.state.lock();
        let ids: Vec<String> = state.sessions.keys().cloned().collect();
        for id in ids {
            state.remove_session(&id);
        }
    }

    pub fn room_members(&self, cart_id: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .state
            .lock()
            .rooms
            .get(cart_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub fn wishlist_subscribers(&self, user_id: &str) -> Vec<String> {
        let mut sessions: Vec<String> = self
            .state
            .lock()
            .wishlist_subscribers
            .get(user_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        sessions.sort();
        sessions
    }

    /// Push a wishlist price drop to every session subscribed for the user
    pub fn publish_price_drop(&self, user_id: &str, data: Value) -> usize {
        let state = self.state.lock();
        let frame = Frame::new(names::PRICE_DROP, data);
        state
            .wishlist_subscribers
            .get(user_id)
            .map(|sessions| {
                sessions
                    .iter()
                    .filter(|session_id| state.send_to(session_id, frame.clone()))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Emit an arbitrary server event to a cart room
    pub fn emit_to_room(&self, cart_id: &str, event: &str, data: Value) -> usize {
        self.state
            .lock()
            .send_to_room(cart_id, &Frame::new(event, data))
    }

    /// Frames received from clients, with the sending session id
    pub fn received(&self) -> Vec<(String, Frame)> {
        self.state.lock().received.clone()
    }

    fn accept(&self) -> Result<PushLink, TransportError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, mut from_client) = mpsc::unbounded_channel::<Frame>();

        {
            let mut state = self.state.lock();
            if state.refuse_opens > 0 {
                state.refuse_opens -= 1;
                return Err(TransportError::Connect(
                    "memory hub refused connection".to_string(),
                ));
            }
            state.sessions.insert(session_id.clone(), to_client);
            state.opened += 1;
        }

        let hub = self.clone();
        let sid = session_id.clone();
        tokio::spawn(async move {
            while let Some(frame) = from_client.recv().await {
                hub.handle(&sid, frame);
            }
            debug!("Client closed session {}", sid);
            hub.state.lock().remove_session(&sid);
        });

        Ok(PushLink {
            session_id,
            outbound,
            inbound,
        })
    }

    fn handle(&self, session_id: &str, frame: Frame) {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(session_id) {
            // Dropped by the server, the client has not noticed yet
            return;
        }
        state.received.push((session_id.to_string(), frame.clone()));

        let Some(command) = ClientCommand::from_frame(&frame) else {
            debug!("Hub ignoring frame {}", frame.event);
            return;
        };

        match command {
            ClientCommand::SubscribeToWishlists { user_id } => {
                state
                    .wishlist_subscribers
                    .entry(user_id)
                    .or_default()
                    .insert(session_id.to_string());
            }
            ClientCommand::JoinCart { cart_id } => {
                state
                    .rooms
                    .entry(cart_id)
                    .or_default()
                    .insert(session_id.to_string());
            }
            ClientCommand::LeaveCart { cart_id } => {
                if let Some(members) = state.rooms.get_mut(&cart_id) {
                    members.remove(session_id);
                }
            }
            ClientCommand::SendMessage(chat) => {
                let data = frame.data.clone();
                state.send_to_room(&chat.cart_id, &Frame::new(names::RECEIVE_MESSAGE, data.clone()));
                state.send_to_room(
                    &chat.cart_id,
                    &Frame::new(names::NEW_CHAT_NOTIFICATION, data),
                );
            }
            ClientCommand::TestCartNotification { cart_id, data } => {
                state.send_to_room(&cart_id, &Frame::new(names::PRICE_DROP, data));
            }
            ClientCommand::GetActiveRooms => {
                let mut rooms: Vec<String> = state
                    .rooms
                    .iter()
                    .filter(|(_, members)| members.contains(session_id))
                    .map(|(room, _)| room.clone())
                    .collect();
                rooms.sort();
                let reply = Frame::new(names::ACTIVE_ROOMS, serde_json::json!(rooms));
                state.send_to(session_id, reply);
            }
        }
    }
}

/// Connector that opens sessions on a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryConnector {
    hub: MemoryHub,
}

#[async_trait]
impl PushConnector for MemoryConnector {
    async fn open(&self) -> Result<PushLink, TransportError> {
        self.hub.accept()
    }
}
