//! Multi-subscriber event fan-out
//!
//! Each subscription owns its own channel and can be removed on its own;
//! registering a new listener never replaces an existing one.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;

use crate::events::{EventKind, PushEvent};

/// Identifies one subscription
pub type ListenerId = u64;

struct Listener {
    id: ListenerId,
    kinds: Vec<EventKind>,
    tx: mpsc::UnboundedSender<PushEvent>,
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

impl ListenerRegistry {
    pub(crate) fn register(self: &Arc<Self>, kinds: &[EventKind]) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();

        self.listeners.lock().push(Listener {
            id,
            kinds: kinds.to_vec(),
            tx,
        });
        debug!("Registered listener {} for {:?}", id, kinds);

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(self),
        }
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        before != listeners.len()
    }

    /// Deliver to every listener of the event's kind, returning how many got it
    pub(crate) fn dispatch(&self, event: &PushEvent) -> usize {
        let kind = event.kind();
        let mut delivered = 0;
        let mut listeners = self.listeners.lock();

        listeners.retain(|listener| {
            if !listener.kinds.contains(&kind) {
                return true;
            }
            match listener.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                // Receiver gone without unsubscribing
                Err(_) => false,
            }
        });

        delivered
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// A live event subscription; dropping it unsubscribes
pub struct Subscription {
    id: ListenerId,
    rx: mpsc::UnboundedReceiver<PushEvent>,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Next event; `None` once unsubscribed or the transport is gone
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }

    /// Next already-delivered event, without waiting
    pub fn try_recv(&mut self) -> Option<PushEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
