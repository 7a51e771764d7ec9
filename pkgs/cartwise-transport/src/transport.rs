//! The push transport: one owned connection, rooms, and event fan-out

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::connector::{PushConnector, PushLink};
use crate::events::{ClientCommand, ConnectionStatus, EventKind, Frame, OutgoingChat, PushEvent};
use crate::listeners::{ListenerId, ListenerRegistry, Subscription};
use crate::TransportConfig;

struct ActiveLink {
    session_id: String,
    outbound: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
    generation: u64,
}

struct Inner {
    connector: Arc<dyn PushConnector>,
    config: TransportConfig,
    listeners: Arc<ListenerRegistry>,
    link: Mutex<Option<ActiveLink>>,
    status: watch::Sender<ConnectionStatus>,
    generation: AtomicU64,
    /// Set by `disconnect`, cleared by `connect`; stops background retries
    closed: AtomicBool,
    /// Serializes connect cycles
    connect_lock: tokio::sync::Mutex<()>,
}

/// Push-channel connection shared by the sync services
///
/// Clones share the same connection and listeners. At most one link is
/// live at a time; reconnecting replaces it without touching listeners,
/// so handlers are never stacked.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub fn new(connector: Arc<dyn PushConnector>, config: TransportConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                listeners: Arc::new(ListenerRegistry::default()),
                link: Mutex::new(None),
                status,
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Open the connection, replacing any existing one
    ///
    /// Failures are retried per [`TransportConfig`] and logged; the final
    /// state is returned instead of an error.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> ConnectionStatus {
        self.inner.closed.store(false, Ordering::SeqCst);
        let _guard = self.inner.connect_lock.lock().await;
        self.inner.teardown();
        self.inner.open_with_retry().await
    }

    /// Same as [`Transport::connect`]
    pub async fn reconnect(&self) -> ConnectionStatus {
        self.connect().await
    }

    /// Tear the connection down; a no-op when already disconnected
    pub fn disconnect(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if self.inner.teardown() {
            info!("Push transport disconnected");
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Id of the live connection, used to recognize echoes of our own sends
    pub fn session_id(&self) -> Option<String> {
        self.inner
            .link
            .lock()
            .as_ref()
            .map(|link| link.session_id.clone())
    }

    /// Subscribe to one or more event kinds
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        self.inner.listeners.register(kinds)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn on_price_drop(&self) -> Subscription {
        self.subscribe(&[EventKind::PriceDrop])
    }

    pub fn on_chat_message(&self) -> Subscription {
        self.subscribe(&[EventKind::ChatMessage])
    }

    pub fn on_chat_notification(&self) -> Subscription {
        self.subscribe(&[EventKind::ChatNotification])
    }

    pub fn on_lifecycle(&self) -> Subscription {
        self.subscribe(&EventKind::LIFECYCLE)
    }

    /// Number of live subscriptions
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Ask for wishlist price drops of a user; needed again after every reconnect
    pub fn subscribe_to_wishlist_updates(&self, user_id: &str) -> bool {
        self.emit(ClientCommand::SubscribeToWishlists {
            user_id: user_id.to_string(),
        })
    }

    pub fn join_cart_room(&self, cart_id: &str) -> bool {
        self.emit(ClientCommand::JoinCart {
            cart_id: cart_id.to_string(),
        })
    }

    pub fn leave_cart_room(&self, cart_id: &str) -> bool {
        self.emit(ClientCommand::LeaveCart {
            cart_id: cart_id.to_string(),
        })
    }

    pub fn send_chat_message(&self, chat: OutgoingChat) -> bool {
        self.emit(ClientCommand::SendMessage(chat))
    }

    /// Debug: the reply arrives as [`PushEvent::ActiveRooms`]
    pub fn request_active_rooms(&self) -> bool {
        self.emit(ClientCommand::GetActiveRooms)
    }

    /// Debug: ask the server to push a cart price drop to the room
    pub fn test_cart_notification(&self, cart_id: &str, data: serde_json::Value) -> bool {
        self.emit(ClientCommand::TestCartNotification {
            cart_id: cart_id.to_string(),
            data,
        })
    }

    /// Send a command on the live link; dropped with a log line when offline
    pub fn emit(&self, command: ClientCommand) -> bool {
        let link = self.inner.link.lock();
        match link.as_ref() {
            Some(link) => {
                if link.outbound.send(command.to_frame()).is_ok() {
                    true
                } else {
                    warn!("Push link closed, dropping {}", command.name());
                    false
                }
            }
            None => {
                debug!("Not connected, dropping {}", command.name());
                false
            }
        }
    }
}

impl Inner {
    /// Drop the current link; returns whether there was one
    fn teardown(&self) -> bool {
        let previous = self.link.lock().take();
        self.status.send_replace(ConnectionStatus::Disconnected);
        match previous {
            Some(link) => {
                debug!("Tearing down push link {}", link.session_id);
                link.cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn open_with_retry(self: &Arc<Self>) -> ConnectionStatus {
        let max_attempts = self.config.max_attempts.max(1);
        self.status.send_replace(ConnectionStatus::Connecting);

        for attempt in 1..=max_attempts {
            if self.closed.load(Ordering::SeqCst) {
                self.status.send_replace(ConnectionStatus::Disconnected);
                return ConnectionStatus::Disconnected;
            }

            match self.connector.open().await {
                Ok(link) => {
                    if self.closed.load(Ordering::SeqCst) {
                        debug!("Disconnected while opening, discarding link");
                        self.status.send_replace(ConnectionStatus::Disconnected);
                        return ConnectionStatus::Disconnected;
                    }
                    return self.install(link);
                }
                Err(e) => {
                    warn!(
                        "Push connection attempt {}/{} failed: {}",
                        attempt, max_attempts, e
                    );
                    self.listeners.dispatch(&PushEvent::ConnectError {
                        attempt,
                        error: e.to_string(),
                    });
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        error!("Push connection failed after {} attempts", max_attempts);
        self.status.send_replace(ConnectionStatus::Failed);
        ConnectionStatus::Failed
    }

    fn install(self: &Arc<Self>, link: PushLink) -> ConnectionStatus {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let PushLink {
            session_id,
            outbound,
            inbound,
        } = link;

        *self.link.lock() = Some(ActiveLink {
            session_id: session_id.clone(),
            outbound,
            cancel: cancel.clone(),
            generation,
        });

        tokio::spawn(pump(self.clone(), inbound, cancel, generation));

        let status = ConnectionStatus::Connected {
            session_id: session_id.clone(),
        };
        self.status.send_replace(status.clone());
        info!("Push transport connected, session {}", session_id);
        self.listeners
            .dispatch(&PushEvent::Connected { session_id });
        status
    }

    /// Background reconnect after the server dropped the link
    fn reconnect_in_background(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let _guard = self.connect_lock.lock().await;
            let has_link = self.link.lock().is_some();
            if has_link || self.closed.load(Ordering::SeqCst) {
                return;
            }
            self.open_with_retry().await;
        })
    }
}

/// Reads frames from one link and dispatches them until it ends
async fn pump(
    inner: Arc<Inner>,
    mut inbound: mpsc::UnboundedReceiver<Frame>,
    cancel: CancellationToken,
    generation: u64,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            frame = inbound.recv() => match frame {
                Some(frame) => {
                    let name = frame.event.clone();
                    match PushEvent::from_frame(frame) {
                        Some(event) => {
                            let delivered = inner.listeners.dispatch(&event);
                            debug!("Dispatched {} to {} listeners", name, delivered);
                        }
                        None => debug!("Ignoring unhandled push event {}", name),
                    }
                }
                None => break,
            }
        }
    }

    // Only the pump of the current link reports the drop
    let was_current = {
        let mut link = inner.link.lock();
        if link.as_ref().map(|l| l.generation) == Some(generation) {
            link.take();
            true
        } else {
            false
        }
    };
    if !was_current {
        return;
    }

    warn!("Push link closed by server");
    inner.status.send_replace(ConnectionStatus::Disconnected);
    inner.listeners.dispatch(&PushEvent::Disconnected {
        reason: "link closed by server".to_string(),
    });

    if inner.config.auto_reconnect && !inner.closed.load(Ordering::SeqCst) {
        inner.reconnect_in_background().await;
    }
}
