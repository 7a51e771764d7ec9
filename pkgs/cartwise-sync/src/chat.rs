//! Shared-cart chat
//!
//! A `ChatSession` keeps the message list of the open cart chat. Messages
//! arrive from the cache, from `GET /chat/{cartId}`, from the push room and
//! from other contexts writing the same cache key. All of them go through
//! [`merge_messages`], so the list never holds the same message twice.
//!
//! Every piece of state belongs to the scope of the cart that is open.
//! Switching carts or closing the session cancels the scope, and a fetch
//! that completes afterwards is discarded.

use cartwise_store::{CacheKey, LocalCache, StorageChange};
use cartwise_transport::{EventKind, OutgoingChat, PushEvent, Transport};
use chrono::{SecondsFormat, SubsecRound, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::{CartwiseApi, NewChatMessage};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::{ChatMessage, MessageKey, UserIdentity};
use crate::scope::{run_scoped, sleep_scoped};

/// Shown when messages cannot be loaded and nothing is cached
pub const LOAD_FAILED_BANNER: &str = "Could not load messages. Please try again.";

/// Union of two message lists, ordered by send time
///
/// Entries of `local` win over entries of `server`. A message is the same
/// as another when their server ids match, or when their content matches
/// and at least one of them has no server id yet; in that case the merged
/// entry picks up the id. Merging the result again with either input
/// changes nothing.
pub fn merge_messages(local: &[ChatMessage], server: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut merged: Vec<ChatMessage> = Vec::with_capacity(local.len() + server.len());
    let mut ids: HashSet<String> = HashSet::new();
    let mut by_content: HashMap<MessageKey, Vec<usize>> = HashMap::new();

    for message in local.iter().chain(server) {
        if let Some(id) = &message.id {
            if ids.contains(id) {
                continue;
            }
        }

        let content = message.content_key();
        let twins = by_content.get(&content).map(Vec::as_slice).unwrap_or_default();
        match &message.id {
            None if !twins.is_empty() => continue,
            Some(id) => {
                if let Some(&idx) = twins.iter().find(|&&idx| merged[idx].id.is_none()) {
                    merged[idx].id = Some(id.clone());
                    ids.insert(id.clone());
                    continue;
                }
                ids.insert(id.clone());
            }
            None => {}
        }

        by_content.entry(content).or_default().push(merged.len());
        merged.push(message.clone());
    }

    merged.sort_by_key(|m| m.timestamp);
    merged
}

/// Result of a message fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Server list merged in
    Updated { total: usize },
    /// Server answered with something other than a list
    NoUpdate,
    /// Request failed; cached messages, if any, stay on screen
    Failed { used_cache: bool },
    /// The cart was switched or closed before the response arrived
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub message: ChatMessage,
    /// Server accepted the message and its id is in the list
    pub persisted: bool,
    pub attempts: u32,
}

struct ChatState {
    cart_id: Option<String>,
    messages: Vec<ChatMessage>,
    error_banner: Option<String>,
    scope: CancellationToken,
}

struct ChatInner {
    identity: UserIdentity,
    config: SyncConfig,
    transport: Transport,
    api: Arc<dyn CartwiseApi>,
    cache: LocalCache,
    state: Mutex<ChatState>,
    /// Held across the load and store of a cache write
    write_lock: tokio::sync::Mutex<()>,
}

/// The chat view of one cart
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<ChatInner>,
}

impl ChatSession {
    /// Open the chat of a cart: join its room, paint from cache, fetch
    pub async fn open(
        cart_id: &str,
        identity: UserIdentity,
        transport: Transport,
        api: Arc<dyn CartwiseApi>,
        cache: LocalCache,
        config: SyncConfig,
    ) -> Self {
        let closed = CancellationToken::new();
        closed.cancel();
        let session = Self {
            inner: Arc::new(ChatInner {
                identity,
                config,
                transport,
                api,
                cache,
                state: Mutex::new(ChatState {
                    cart_id: None,
                    messages: Vec::new(),
                    error_banner: None,
                    scope: closed,
                }),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        };
        session.enter(cart_id);
        session.fetch_messages().await;
        session
    }

    fn enter(&self, cart_id: &str) {
        let scope = CancellationToken::new();
        {
            let mut state = self.inner.state.lock();
            state.scope.cancel();
            state.cart_id = Some(cart_id.to_string());
            state.messages.clear();
            state.error_banner = None;
            state.scope = scope.clone();
        }
        info!("Opened chat for cart {}", cart_id);
        self.inner.transport.join_cart_room(cart_id);
        self.spawn_push_listener(cart_id.to_string(), scope.clone());
        self.spawn_storage_watcher(cart_id.to_string(), scope);
    }

    fn spawn_push_listener(&self, cart_id: String, scope: CancellationToken) {
        let inner = Arc::clone(&self.inner);
        let mut events = inner
            .transport
            .subscribe(&[EventKind::ChatMessage, EventKind::Connected]);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = scope.cancelled() => break,
                    event = events.recv() => match event {
                        Some(PushEvent::ChatMessage(data)) => {
                            inner.on_push_message(&cart_id, &scope, data).await;
                        }
                        Some(PushEvent::Connected { .. }) => {
                            inner.transport.join_cart_room(&cart_id);
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
            debug!("Chat push listener for {} stopped", cart_id);
        });
    }

    fn spawn_storage_watcher(&self, cart_id: String, scope: CancellationToken) {
        let inner = Arc::clone(&self.inner);
        let mut watcher = inner.cache.watch();
        let key = CacheKey::chat_messages(cart_id);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = scope.cancelled() => break,
                    change = watcher.recv() => match change {
                        Some(change) if change.cache_key().as_ref() == Some(&key) => {
                            inner.on_storage_change(&scope, &change);
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        });
    }

    /// Paint from cache, then merge the server's list
    pub async fn fetch_messages(&self) -> FetchOutcome {
        let inner = &self.inner;
        let Some((cart_id, scope)) = inner.current() else {
            return FetchOutcome::Abandoned;
        };
        let key = CacheKey::chat_messages(cart_id.as_str());

        let cached: Vec<ChatMessage> = inner.cache.load(&key).await.unwrap_or_default();
        let used_cache = !cached.is_empty();
        if used_cache {
            let mut state = inner.state.lock();
            if scope.is_cancelled() {
                return FetchOutcome::Abandoned;
            }
            state.messages = merge_messages(&state.messages, &cached);
        }

        match run_scoped(&scope, inner.api.chat_messages(&cart_id)).await {
            Ok(Some(server)) => {
                let merged = {
                    let mut state = inner.state.lock();
                    if scope.is_cancelled() {
                        return FetchOutcome::Abandoned;
                    }
                    state.messages = merge_messages(&state.messages, &server);
                    state.error_banner = None;
                    state.messages.clone()
                };
                inner.write_through(&key, &merged).await;
                debug!("Cart {} chat has {} messages", cart_id, merged.len());
                FetchOutcome::Updated {
                    total: merged.len(),
                }
            }
            Ok(None) => {
                warn!("Chat endpoint for {} did not return a list", cart_id);
                FetchOutcome::NoUpdate
            }
            Err(SyncError::Cancelled) => FetchOutcome::Abandoned,
            Err(e) => {
                warn!("Failed to load chat for {}: {}", cart_id, e);
                let mut state = inner.state.lock();
                if scope.is_cancelled() {
                    return FetchOutcome::Abandoned;
                }
                if state.messages.is_empty() {
                    state.error_banner = Some(LOAD_FAILED_BANNER.to_string());
                }
                FetchOutcome::Failed { used_cache }
            }
        }
    }

    /// Send a message: show it at once, push it to the room, then persist
    ///
    /// The server id is patched into the list once a persist attempt
    /// succeeds. If all attempts fail the message stays local.
    #[instrument(skip(self, text))]
    pub async fn handle_send(&self, text: &str) -> Result<SendOutcome, SyncError> {
        let inner = &self.inner;
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let (cart_id, scope) = inner.current().ok_or(SyncError::NoActiveCart)?;
        let key = CacheKey::chat_messages(cart_id.as_str());

        let message = ChatMessage {
            id: None,
            sender: inner.identity.display_name.clone(),
            sender_id: inner.identity.user_id.clone(),
            message: text.to_string(),
            timestamp: Utc::now().trunc_subsecs(3),
            client_id: inner.transport.session_id().unwrap_or_default(),
            cart_id: Some(cart_id.clone()),
        };

        let snapshot = {
            let mut state = inner.state.lock();
            state.messages = merge_messages(&state.messages, std::slice::from_ref(&message));
            state.messages.clone()
        };
        inner.write_through(&key, &snapshot).await;

        let pushed = inner.transport.send_chat_message(OutgoingChat {
            sender: message.sender.clone(),
            sender_id: message.sender_id.clone(),
            message: message.message.clone(),
            timestamp: message
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            client_id: message.client_id.clone(),
            cart_id: cart_id.clone(),
            user_name: inner.identity.display_name.clone(),
        });
        if !pushed {
            debug!("Not connected, message for {} is not pushed live", cart_id);
        }

        let body = NewChatMessage::from(&message);
        let max_attempts = inner.config.send_max_attempts.max(1);
        let mut attempts = 0;
        let mut stored = None;
        while attempts < max_attempts {
            attempts += 1;
            match run_scoped(&scope, inner.api.post_chat_message(&cart_id, &body)).await {
                Ok(saved) => {
                    stored = Some(saved);
                    break;
                }
                Err(SyncError::Cancelled) => break,
                Err(e) => {
                    warn!(
                        "Persisting message failed (attempt {}/{}): {}",
                        attempts, max_attempts, e
                    );
                    if attempts < max_attempts
                        && !sleep_scoped(&scope, inner.config.send_retry_delay).await
                    {
                        break;
                    }
                }
            }
        }

        let Some(server_id) = stored.and_then(|saved| saved.id) else {
            return Ok(SendOutcome {
                message,
                persisted: false,
                attempts,
            });
        };

        inner.patch_id(&cart_id, &scope, &message, &server_id).await;
        let mut message = message;
        message.id = Some(server_id);
        Ok(SendOutcome {
            message,
            persisted: true,
            attempts,
        })
    }

    /// Leave the current cart and open another
    pub async fn switch_cart(&self, cart_id: &str) -> FetchOutcome {
        if let Some(previous) = self.cart_id() {
            if previous == cart_id {
                return self.fetch_messages().await;
            }
            self.inner.transport.leave_cart_room(&previous);
        }
        self.enter(cart_id);
        self.fetch_messages().await
    }

    /// Leave the room and end the scope; the session can be reopened
    pub fn close(&self) {
        let cart_id = {
            let mut state = self.inner.state.lock();
            state.scope.cancel();
            state.messages.clear();
            state.error_banner = None;
            state.cart_id.take()
        };
        if let Some(cart_id) = cart_id {
            self.inner.transport.leave_cart_room(&cart_id);
            info!("Closed chat for cart {}", cart_id);
        }
    }

    pub fn cart_id(&self) -> Option<String> {
        self.inner.state.lock().cart_id.clone()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.state.lock().messages.clone()
    }

    pub fn error_banner(&self) -> Option<String> {
        self.inner.state.lock().error_banner.clone()
    }

    pub fn clear_error(&self) {
        self.inner.state.lock().error_banner = None;
    }
}

impl ChatInner {
    fn current(&self) -> Option<(String, CancellationToken)> {
        let state = self.state.lock();
        let cart_id = state.cart_id.clone()?;
        Some((cart_id, state.scope.clone()))
    }

    async fn on_push_message(
        &self,
        cart_id: &str,
        scope: &CancellationToken,
        data: serde_json::Value,
    ) {
        let message: ChatMessage = match serde_json::from_value(data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed chat message: {}", e);
                return;
            }
        };
        if message.cart_id.as_deref().is_some_and(|id| id != cart_id) {
            return;
        }
        let own_session = self.transport.session_id();
        if !message.client_id.is_empty() && own_session.as_deref() == Some(message.client_id.as_str()) {
            debug!("Skipping echo of own message");
            return;
        }

        let snapshot = {
            let mut state = self.state.lock();
            if scope.is_cancelled() {
                return;
            }
            let before = state.messages.len();
            state.messages = merge_messages(&state.messages, std::slice::from_ref(&message));
            if state.messages.len() == before {
                return;
            }
            state.messages.clone()
        };
        self.write_through(&CacheKey::chat_messages(cart_id), &snapshot)
            .await;
    }

    /// Another context wrote this cart's messages; take what is new
    fn on_storage_change(&self, scope: &CancellationToken, change: &StorageChange) {
        let Some(incoming) = change.decode::<Vec<ChatMessage>>() else {
            return;
        };
        let mut state = self.state.lock();
        if scope.is_cancelled() {
            return;
        }
        let before = state.messages.len();
        state.messages = merge_messages(&state.messages, &incoming);
        let added = state.messages.len() - before;
        if added > 0 {
            debug!("Took {} messages from another context", added);
        }
    }

    /// Attach the server id to the optimistic entry
    async fn patch_id(
        &self,
        cart_id: &str,
        scope: &CancellationToken,
        sent: &ChatMessage,
        server_id: &str,
    ) {
        let key = CacheKey::chat_messages(cart_id);
        let mut stored = sent.clone();
        stored.id = Some(server_id.to_string());

        let in_view = {
            let mut state = self.state.lock();
            if scope.is_cancelled() {
                None
            } else {
                state.messages = merge_messages(&state.messages, std::slice::from_ref(&stored));
                Some(state.messages.clone())
            }
        };

        // The cart may have been left while persisting; the cache entry is fixed up either way
        let snapshot = in_view.unwrap_or_else(|| vec![stored]);
        self.write_through(&key, &snapshot).await;
    }

    /// Store `snapshot` merged over what the cache holds now
    ///
    /// Writers of the same session are serialized, so a late snapshot
    /// cannot drop entries or ids written by an earlier one.
    async fn write_through(&self, key: &CacheKey, snapshot: &[ChatMessage]) {
        let _guard = self.write_lock.lock().await;
        let cached: Vec<ChatMessage> = self.cache.load(key).await.unwrap_or_default();
        let merged = merge_messages(snapshot, &cached);
        self.cache.store(key, &merged).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn msg(id: Option<&str>, sender: &str, text: &str, secs: i64) -> ChatMessage {
        ChatMessage {
            id: id.map(str::to_string),
            sender: sender.to_string(),
            sender_id: String::new(),
            message: text.to_string(),
            timestamp: at(secs),
            client_id: String::new(),
            cart_id: Some("c1".to_string()),
        }
    }

    #[test]
    fn test_merge_is_union_sorted_by_time() {
        let local = vec![msg(Some("m2"), "Ann", "second", 2)];
        let server = vec![msg(Some("m1"), "Bob", "first", 1), msg(Some("m2"), "Ann", "second", 2)];
        let merged = merge_messages(&local, &server);
        let ids: Vec<_> = merged.iter().map(|m| m.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let local = vec![msg(None, "Ann", "hi", 1), msg(Some("m3"), "Cy", "yo", 3)];
        let server = vec![msg(Some("m1"), "Ann", "hi", 1), msg(Some("m2"), "Bob", "hey", 2)];
        let once = merge_messages(&local, &server);
        assert_eq!(merge_messages(&once, &server), once);
        assert_eq!(merge_messages(&once, &local), once);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_merge_adopts_server_id_for_optimistic_entry() {
        let local = vec![msg(None, "Ann", "hi", 1)];
        let server = vec![msg(Some("m1"), "Ann", "hi", 1)];
        let merged = merge_messages(&local, &server);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id.as_deref(), Some("m1"));
    }

    #[test]
    fn test_merge_keeps_distinct_ids_with_same_content() {
        let local = vec![msg(Some("m1"), "Ann", "ok", 1)];
        let server = vec![msg(Some("m2"), "Ann", "ok", 1)];
        assert_eq!(merge_messages(&local, &server).len(), 2);
    }

    #[test]
    fn test_local_entry_wins() {
        let mut mine = msg(Some("m1"), "Ann", "hi", 1);
        mine.client_id = "tab-1".to_string();
        let theirs = msg(Some("m1"), "Ann", "hi", 1);
        let merged = merge_messages(&[mine], &[theirs]);
        assert_eq!(merged[0].client_id, "tab-1");
    }
}
