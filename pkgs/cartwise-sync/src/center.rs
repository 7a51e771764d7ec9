//! Chat notification badges
//!
//! Keeps chat notifications per cart and the time each cart was last read.
//! Unread counts come from those two alone, so they survive restarts and
//! are shared by every context on the same cache.

use cartwise_store::{CacheKey, LocalCache};
use cartwise_transport::{EventKind, PushEvent, Transport};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::models::{ChatNotificationPayload, PriceDropNotification, UserIdentity};

#[derive(Default)]
struct CenterState {
    notifications: Vec<PriceDropNotification>,
    last_read: HashMap<String, DateTime<Utc>>,
}

impl CenterState {
    fn is_unread(&self, n: &PriceDropNotification) -> bool {
        if !n.is_chat() || n.is_read {
            return false;
        }
        let Some(cart_id) = &n.cart_id else {
            return false;
        };
        match self.last_read.get(cart_id) {
            Some(read_at) => n.change_date > *read_at,
            None => true,
        }
    }

    fn is_duplicate(&self, n: &PriceDropNotification) -> bool {
        self.notifications.iter().any(|existing| {
            existing.cart_id == n.cart_id
                && existing.product_name == n.product_name
                && existing.change_date == n.change_date
                && sender_of(existing) == sender_of(n)
        })
    }
}

fn sender_of(n: &PriceDropNotification) -> Option<&str> {
    n.sender_id.as_deref().or(n.sender_name.as_deref())
}

struct CenterInner {
    identity: UserIdentity,
    cache: LocalCache,
    window: chrono::Duration,
    state: Mutex<CenterState>,
    listener: Mutex<Option<CancellationToken>>,
}

/// Unread chat notifications of the signed-in user
#[derive(Clone)]
pub struct NotificationCenter {
    inner: Arc<CenterInner>,
}

impl NotificationCenter {
    /// Load notifications and read markers from the cache
    pub async fn load(cache: LocalCache, identity: UserIdentity, window: chrono::Duration) -> Self {
        let notifications: Vec<PriceDropNotification> = cache
            .load(&CacheKey::ChatNotifications)
            .await
            .unwrap_or_default();
        let last_read: HashMap<String, DateTime<Utc>> = cache
            .load(&CacheKey::LastReadChatNotifications)
            .await
            .unwrap_or_default();
        debug!(
            "Loaded {} chat notifications, {} read markers",
            notifications.len(),
            last_read.len()
        );

        Self {
            inner: Arc::new(CenterInner {
                identity,
                cache,
                window,
                state: Mutex::new(CenterState {
                    notifications: notifications.into_iter().filter(|n| n.is_chat()).collect(),
                    last_read,
                }),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Record a `new-chat-notification` payload
    ///
    /// Returns false for the user's own messages, duplicates and payloads
    /// without a cart.
    pub async fn on_chat_notification(
        &self,
        payload: serde_json::Value,
        session_id: Option<&str>,
    ) -> bool {
        let payload: ChatNotificationPayload = match serde_json::from_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Ignoring malformed chat notification: {}", e);
                return false;
            }
        };
        match payload.into_notification(Utc::now()) {
            Some(notification) => self.add(notification, session_id).await,
            None => false,
        }
    }

    /// Record a chat notification
    pub async fn add(&self, notification: PriceDropNotification, session_id: Option<&str>) -> bool {
        if self.is_self_sent(&notification, session_id) {
            debug!("Skipping notification for own message");
            return false;
        }

        {
            let mut state = self.inner.state.lock();
            if state.is_duplicate(&notification) {
                return false;
            }
            state.notifications.push(notification);
        }
        self.persist_notifications().await;
        true
    }

    fn is_self_sent(&self, n: &PriceDropNotification, session_id: Option<&str>) -> bool {
        if n.client_id.is_some() && n.client_id.as_deref() == session_id {
            return true;
        }
        let identity = &self.inner.identity;
        match &n.sender_id {
            Some(sender_id) => *sender_id == identity.user_id,
            None => n
                .sender_name
                .as_deref()
                .is_some_and(|name| !name.is_empty() && name == identity.display_name),
        }
    }

    /// Mark every notification of a cart as read
    ///
    /// The marker moves to `read_at` or to the newest entry of the cart,
    /// whichever is later, so entries stamped by a sender whose clock runs
    /// ahead do not come back as unread. It never moves backwards.
    #[instrument(skip(self))]
    pub async fn mark_cart_read(&self, cart_id: &str, read_at: DateTime<Utc>) {
        let (last_read, flipped) = {
            let mut state = self.inner.state.lock();
            let mut flipped = 0;
            let mut newest = read_at;
            for n in state
                .notifications
                .iter_mut()
                .filter(|n| n.cart_id.as_deref() == Some(cart_id))
            {
                newest = newest.max(n.change_date);
                if !n.is_read {
                    n.is_read = true;
                    flipped += 1;
                }
            }

            let marker = state.last_read.entry(cart_id.to_string()).or_insert(newest);
            if *marker < newest {
                *marker = newest;
            }
            (state.last_read.clone(), flipped)
        };
        self.inner
            .cache
            .store(&CacheKey::LastReadChatNotifications, &last_read)
            .await;
        if flipped > 0 {
            debug!("Marked {} notifications in {} read", flipped, cart_id);
            self.persist_notifications().await;
        }
    }

    pub fn unread_count(&self, cart_id: &str) -> usize {
        let state = self.inner.state.lock();
        state
            .notifications
            .iter()
            .filter(|n| n.cart_id.as_deref() == Some(cart_id) && state.is_unread(n))
            .count()
    }

    pub fn total_unread(&self) -> usize {
        let state = self.inner.state.lock();
        state
            .notifications
            .iter()
            .filter(|n| state.is_unread(n))
            .count()
    }

    pub fn unread_by_cart(&self) -> HashMap<String, usize> {
        let state = self.inner.state.lock();
        let mut counts = HashMap::new();
        for n in state.notifications.iter().filter(|n| state.is_unread(n)) {
            if let Some(cart_id) = &n.cart_id {
                *counts.entry(cart_id.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Notifications of one cart, newest first
    pub fn notifications_for(&self, cart_id: &str) -> Vec<PriceDropNotification> {
        let state = self.inner.state.lock();
        let mut list: Vec<PriceDropNotification> = state
            .notifications
            .iter()
            .filter(|n| n.cart_id.as_deref() == Some(cart_id))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.change_date.cmp(&a.change_date));
        list
    }

    pub fn last_read(&self, cart_id: &str) -> Option<DateTime<Utc>> {
        self.inner.state.lock().last_read.get(cart_id).copied()
    }

    /// Forget all notifications of a cart
    pub async fn dismiss_cart(&self, cart_id: &str) -> usize {
        let removed = {
            let mut state = self.inner.state.lock();
            let before = state.notifications.len();
            state
                .notifications
                .retain(|n| n.cart_id.as_deref() != Some(cart_id));
            before - state.notifications.len()
        };
        if removed > 0 {
            self.persist_notifications().await;
        }
        removed
    }

    /// Drop notifications outside the recency window
    pub async fn purge_stale(&self, now: DateTime<Utc>) -> usize {
        let window = self.inner.window;
        let removed = {
            let mut state = self.inner.state.lock();
            let before = state.notifications.len();
            state.notifications.retain(|n| n.is_fresh(now, window));
            before - state.notifications.len()
        };
        if removed > 0 {
            self.persist_notifications().await;
        }
        removed
    }

    /// Start listening for chat notifications on a transport
    ///
    /// Also sweeps stale notifications every `purge_every`. Replaces any
    /// previous listener.
    pub fn attach(&self, transport: &Transport, purge_every: Duration) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.listener.lock().replace(token.clone()) {
            previous.cancel();
        }

        let center = self.clone();
        let transport = transport.clone();
        let mut events = transport.subscribe(&[EventKind::ChatNotification]);
        tokio::spawn(async move {
            let mut purge = interval_at(Instant::now() + purge_every, purge_every);
            purge.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = purge.tick() => {
                        let removed = center.purge_stale(Utc::now()).await;
                        if removed > 0 {
                            debug!("Purged {} stale chat notifications", removed);
                        }
                    }
                    event = events.recv() => match event {
                        Some(PushEvent::ChatNotification(data)) => {
                            let session_id = transport.session_id();
                            center.on_chat_notification(data, session_id.as_deref()).await;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
            debug!("Chat notification listener stopped");
        });
    }

    pub fn detach(&self) {
        if let Some(token) = self.inner.listener.lock().take() {
            token.cancel();
        }
    }

    async fn persist_notifications(&self) {
        let snapshot = self.inner.state.lock().notifications.clone();
        self.inner
            .cache
            .store(&CacheKey::ChatNotifications, &snapshot)
            .await;
    }
}
