//! Deduplicated, filtered notification list
//!
//! Push events, the periodic poll and on-demand polls all feed the same
//! reconciler. An entry is admitted once, no matter how many sources
//! report it, and only while it is recent and owned by the current user.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::models::{NotificationKind, PriceDropNotification, UserIdentity, Wishlist};

/// Where a notification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestSource {
    Push,
    PeriodicPoll,
    OnDemandPoll,
    /// Durable mirror reloaded at startup
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Added,
    Duplicate,
    /// Older than the recency window
    Stale,
    /// Scoped to a wishlist that is not the user's
    ForeignWishlist,
    /// A chat entry this user sent
    SelfSent,
    /// New price not below the old one
    NotADrop,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DropKey {
    Price {
        product_id: String,
        store_id: String,
        wishlist_id: Option<String>,
        /// Set only for cart aggregates
        cart_id: Option<String>,
        kind: NotificationKind,
        cents: i64,
    },
    Chat {
        cart_id: Option<String>,
        sender: String,
        text: String,
        at: DateTime<Utc>,
    },
}

impl DropKey {
    fn of(n: &PriceDropNotification) -> Self {
        match n.kind {
            NotificationKind::Chat => DropKey::Chat {
                cart_id: n.cart_id.clone(),
                sender: n
                    .sender_id
                    .clone()
                    .or_else(|| n.sender_name.clone())
                    .unwrap_or_default(),
                text: n.product_name.clone(),
                at: n.change_date,
            },
            kind => DropKey::Price {
                product_id: n.product_id.clone(),
                store_id: n.store_id.clone(),
                wishlist_id: n.wishlist_id.clone(),
                cart_id: (kind == NotificationKind::CartPriceDrop)
                    .then(|| n.cart_id.clone())
                    .flatten(),
                kind,
                cents: to_cents(n.new_price),
            },
        }
    }

    fn with_cents(&self, cents: i64) -> Self {
        let mut key = self.clone();
        if let DropKey::Price { cents: c, .. } = &mut key {
            *c = cents;
        }
        key
    }

    fn cents(&self) -> Option<i64> {
        match self {
            DropKey::Price { cents, .. } => Some(*cents),
            DropKey::Chat { .. } => None,
        }
    }
}

/// Absorbs float noise so a difference of exactly the tolerance is distinct
const PRICE_EPSILON: f64 = 1e-9;

fn to_cents(price: f64) -> i64 {
    (price * 100.0).round() as i64
}

/// The single notification list of one signed-in user
#[derive(Debug, Clone)]
pub struct NotificationReconciler {
    identity: UserIdentity,
    wishlist_id: Option<String>,
    session_id: Option<String>,
    window: chrono::Duration,
    tolerance: f64,
    entries: HashMap<DropKey, PriceDropNotification>,
    by_id: HashMap<String, DropKey>,
}

impl NotificationReconciler {
    pub fn new(identity: UserIdentity, window: chrono::Duration, tolerance: f64) -> Self {
        Self {
            identity,
            wishlist_id: None,
            session_id: None,
            window,
            tolerance,
            entries: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    /// Current wishlist; wishlist-scoped entries must match it
    pub fn set_wishlist_id(&mut self, wishlist_id: Option<String>) {
        self.wishlist_id = wishlist_id;
    }

    pub fn wishlist_id(&self) -> Option<&str> {
        self.wishlist_id.as_deref()
    }

    /// Push session of this client, used to drop chat echoes
    pub fn set_session_id(&mut self, session_id: Option<String>) {
        self.session_id = session_id;
    }

    /// Admit a notification unless it is stale, foreign, self-sent or known
    pub fn ingest(
        &mut self,
        source: IngestSource,
        notification: PriceDropNotification,
        now: DateTime<Utc>,
    ) -> IngestOutcome {
        let outcome = self.admit(&notification, now);
        if outcome == IngestOutcome::Added {
            debug!(
                "Added {:?} notification {} from {:?}",
                notification.kind, notification.id, source
            );
            let key = DropKey::of(&notification);
            if let Some(previous) = self.by_id.insert(notification.id.clone(), key.clone()) {
                // Id reused by a different entry: the newer one wins
                self.entries.remove(&previous);
            }
            self.entries.insert(key, notification);
        } else {
            debug!(
                "Skipped notification {} from {:?}: {:?}",
                notification.id, source, outcome
            );
        }
        outcome
    }

    fn admit(&self, n: &PriceDropNotification, now: DateTime<Utc>) -> IngestOutcome {
        if !n.is_fresh(now, self.window) {
            return IngestOutcome::Stale;
        }
        if !n.is_true_drop() {
            return IngestOutcome::NotADrop;
        }
        if let Some(wishlist_id) = &n.wishlist_id {
            if self.wishlist_id.as_deref() != Some(wishlist_id.as_str()) {
                return IngestOutcome::ForeignWishlist;
            }
        }
        if n.kind == NotificationKind::Chat && self.is_self_sent(n) {
            return IngestOutcome::SelfSent;
        }
        if self.by_id.contains_key(&n.id) || self.find(n).is_some() {
            return IngestOutcome::Duplicate;
        }
        IngestOutcome::Added
    }

    fn is_self_sent(&self, n: &PriceDropNotification) -> bool {
        if let (Some(client), Some(session)) = (&n.client_id, &self.session_id) {
            if client == session {
                return true;
            }
        }
        match &n.sender_id {
            Some(sender_id) => *sender_id == self.identity.user_id,
            // Legacy entries without a sender id
            None => n
                .sender_name
                .as_deref()
                .is_some_and(|name| !name.is_empty() && name == self.identity.display_name),
        }
    }

    /// Existing entry that counts as the same drop
    fn find(&self, n: &PriceDropNotification) -> Option<&DropKey> {
        let key = DropKey::of(n);
        let Some(cents) = key.cents() else {
            return self.entries.get_key_value(&key).map(|(k, _)| k);
        };

        let span = (self.tolerance * 100.0).ceil().max(0.0) as i64;
        (cents - span..=cents + span)
            .map(|c| key.with_cents(c))
            .find_map(|candidate| {
                self.entries
                    .get_key_value(&candidate)
                    .filter(|(_, existing)| {
                        (existing.new_price - n.new_price).abs() < self.tolerance - PRICE_EPSILON
                    })
                    .map(|(k, _)| k)
            })
    }

    /// Drop entries that fell out of the recency window
    pub fn purge_stale(&mut self, now: DateTime<Utc>) -> usize {
        let window = self.window;
        let before = self.entries.len();
        self.entries.retain(|_, n| n.is_fresh(now, window));
        let entries = &self.entries;
        self.by_id.retain(|_, key| entries.contains_key(key));
        before - self.entries.len()
    }

    pub fn dismiss(&mut self, id: &str) -> bool {
        match self.by_id.remove(id) {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }

    pub fn dismiss_all(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.by_id.clear();
        removed
    }

    /// Only chat entries carry read state
    pub fn mark_read(&mut self, id: &str) -> bool {
        let Some(key) = self.by_id.get(id) else {
            return false;
        };
        match self.entries.get_mut(key) {
            Some(n) if n.is_chat() && !n.is_read => {
                n.is_read = true;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&PriceDropNotification> {
        self.by_id.get(id).and_then(|key| self.entries.get(key))
    }

    pub fn notifications(&self) -> Vec<PriceDropNotification> {
        self.entries.values().cloned().collect()
    }

    /// Newest first
    pub fn sorted_by_recency(&self) -> Vec<PriceDropNotification> {
        let mut all = self.notifications();
        all.sort_by(|a, b| {
            b.change_date
                .cmp(&a.change_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    /// Entries the current user should see
    ///
    /// Wishlist and unscoped drops must be for a product still on the
    /// wishlist; cart and chat entries must belong to one of the user's carts.
    pub fn visible_for(
        &self,
        wishlist: Option<&Wishlist>,
        cart_ids: &HashSet<String>,
    ) -> Vec<PriceDropNotification> {
        self.sorted_by_recency()
            .into_iter()
            .filter(|n| match &n.cart_id {
                Some(cart_id) if n.wishlist_id.is_none() || n.kind != NotificationKind::PriceDrop => {
                    cart_ids.contains(cart_id)
                }
                _ => wishlist.is_some_and(|w| w.contains(&n.product_id)),
            })
            .collect()
    }

    /// Reload the durable mirror through the same admission rules
    pub fn restore(&mut self, entries: Vec<PriceDropNotification>, now: DateTime<Utc>) -> usize {
        entries
            .into_iter()
            .filter(|n| self.ingest(IngestSource::Restore, n.clone(), now) == IngestOutcome::Added)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reconciler() -> NotificationReconciler {
        let mut r = NotificationReconciler::new(
            UserIdentity::new("u1", "Ann"),
            Duration::hours(24),
            0.01,
        );
        r.set_wishlist_id(Some("w1".to_string()));
        r
    }

    fn drop_at(product: &str, new_price: f64, at: DateTime<Utc>) -> PriceDropNotification {
        let mut n = PriceDropNotification::price_drop(product, "s1", "Milk", 3.0, new_price, at);
        n.wishlist_id = Some("w1".to_string());
        n
    }

    fn chat(sender_id: Option<&str>, sender: &str, at: DateTime<Utc>) -> PriceDropNotification {
        let mut n = PriceDropNotification::price_drop("", "", "hello", 0.0, 0.0, at);
        n.kind = NotificationKind::Chat;
        n.cart_id = Some("c1".to_string());
        n.sender_id = sender_id.map(str::to_string);
        n.sender_name = Some(sender.to_string());
        n
    }

    #[test]
    fn test_same_drop_from_every_source_is_kept_once() {
        let now = Utc::now();
        let at = now - Duration::hours(1);
        let mut r = reconciler();

        assert_eq!(r.ingest(IngestSource::Push, drop_at("p1", 2.5, at), now), IngestOutcome::Added);
        assert_eq!(
            r.ingest(IngestSource::PeriodicPoll, drop_at("p1", 2.5, at), now),
            IngestOutcome::Duplicate
        );
        assert_eq!(
            r.ingest(IngestSource::OnDemandPoll, drop_at("p1", 2.499, at), now),
            IngestOutcome::Duplicate
        );
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_tolerance_is_strict() {
        let now = Utc::now();
        let mut r = reconciler();
        r.ingest(IngestSource::Push, drop_at("p1", 2.50, now), now);
        assert_eq!(r.ingest(IngestSource::Push, drop_at("p1", 2.51, now), now), IngestOutcome::Added);
        assert_eq!(r.ingest(IngestSource::Push, drop_at("p1", 2.40, now), now), IngestOutcome::Added);
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn test_stale_and_foreign_entries_rejected() {
        let now = Utc::now();
        let mut r = reconciler();
        assert_eq!(
            r.ingest(IngestSource::Push, drop_at("p1", 2.5, now - Duration::hours(25)), now),
            IngestOutcome::Stale
        );

        let mut foreign = drop_at("p2", 2.5, now);
        foreign.wishlist_id = Some("w9".to_string());
        assert_eq!(r.ingest(IngestSource::Push, foreign, now), IngestOutcome::ForeignWishlist);

        let rising = drop_at("p3", 3.5, now);
        assert_eq!(r.ingest(IngestSource::Push, rising, now), IngestOutcome::NotADrop);
        assert!(r.is_empty());
    }

    #[test]
    fn test_purge_keeps_recent_entries() {
        let now = Utc::now();
        let mut r = reconciler();
        r.ingest(IngestSource::Push, drop_at("p1", 2.5, now - Duration::hours(1)), now);
        let old = drop_at("p2", 2.5, now - Duration::hours(23));
        let old_id = old.id.clone();
        r.ingest(IngestSource::Push, old, now);

        assert_eq!(r.purge_stale(now + Duration::minutes(30)), 0);
        assert_eq!(r.len(), 2);

        // Two hours later the second entry is 25h old
        assert_eq!(r.purge_stale(now + Duration::hours(2)), 1);
        assert!(r.get(&old_id).is_none());
        assert!(!r.dismiss(&old_id));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_chat_self_suppression() {
        let now = Utc::now();
        let mut r = reconciler();
        assert_eq!(
            r.ingest(IngestSource::Push, chat(Some("u1"), "Someone", now), now),
            IngestOutcome::SelfSent
        );
        // Another user sharing the display name is not suppressed
        assert_eq!(
            r.ingest(IngestSource::Push, chat(Some("u2"), "Ann", now), now),
            IngestOutcome::Added
        );
        assert_eq!(
            r.ingest(IngestSource::Push, chat(None, "Ann", now), now),
            IngestOutcome::SelfSent
        );

        r.set_session_id(Some("sess-1".to_string()));
        let mut echo = chat(Some("u3"), "Cy", now);
        echo.client_id = Some("sess-1".to_string());
        assert_eq!(r.ingest(IngestSource::Push, echo, now), IngestOutcome::SelfSent);
    }

    #[test]
    fn test_cart_aggregate_key_includes_cart() {
        let now = Utc::now();
        let mut r = reconciler();
        let mut a = PriceDropNotification::price_drop("", "", "2 items", 6.0, 4.5, now);
        a.kind = NotificationKind::CartPriceDrop;
        a.cart_id = Some("c1".to_string());
        let mut b = a.clone();
        b.id = "other".to_string();
        b.cart_id = Some("c2".to_string());

        assert_eq!(r.ingest(IngestSource::OnDemandPoll, a.clone(), now), IngestOutcome::Added);
        assert_eq!(r.ingest(IngestSource::OnDemandPoll, b, now), IngestOutcome::Added);
        let mut again = a;
        again.id = "third".to_string();
        assert_eq!(r.ingest(IngestSource::OnDemandPoll, again, now), IngestOutcome::Duplicate);
    }

    #[test]
    fn test_dismiss_mark_read_and_order() {
        let now = Utc::now();
        let mut r = reconciler();
        let older = drop_at("p1", 2.5, now - Duration::hours(3));
        let newer = drop_at("p2", 2.5, now - Duration::hours(1));
        let (older_id, newer_id) = (older.id.clone(), newer.id.clone());
        r.ingest(IngestSource::Push, older, now);
        r.ingest(IngestSource::Push, newer, now);

        let ids: Vec<String> = r.sorted_by_recency().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![newer_id.clone(), older_id.clone()]);

        assert!(!r.mark_read(&older_id), "price drops have no read state");
        let message = chat(Some("u2"), "Bob", now);
        let message_id = message.id.clone();
        r.ingest(IngestSource::Push, message, now);
        assert!(r.mark_read(&message_id));
        assert!(!r.mark_read(&message_id));
        assert!(r.dismiss(&message_id));
        assert!(r.dismiss(&newer_id));
        assert!(!r.dismiss(&newer_id));
        assert_eq!(r.dismiss_all(), 1);
        assert!(r.is_empty());
    }

    #[test]
    fn test_visibility_follows_wishlist_and_carts() {
        let now = Utc::now();
        let mut r = reconciler();
        r.ingest(IngestSource::Push, drop_at("p1", 2.5, now), now);
        r.ingest(IngestSource::Push, drop_at("p2", 2.5, now), now);
        let mut cart_drop = PriceDropNotification::price_drop("p3", "s1", "Eggs", 3.0, 2.0, now);
        cart_drop.cart_id = Some("c1".to_string());
        r.ingest(IngestSource::Push, cart_drop, now);

        let wishlist = Wishlist {
            id: "w1".to_string(),
            name: "Weekly".to_string(),
            user_id: "u1".to_string(),
            products: vec!["p1".to_string()],
        };
        let carts = HashSet::from(["c1".to_string()]);
        let visible: Vec<String> = r
            .visible_for(Some(&wishlist), &carts)
            .into_iter()
            .map(|n| n.product_id)
            .collect();
        assert_eq!(visible.len(), 2);
        assert!(visible.contains(&"p1".to_string()));
        assert!(visible.contains(&"p3".to_string()));

        assert_eq!(r.visible_for(None, &HashSet::new()).len(), 0);
    }

    #[test]
    fn test_restore_applies_admission_rules() {
        let now = Utc::now();
        let fresh = drop_at("p1", 2.5, now);
        let stale = drop_at("p2", 2.5, now - Duration::days(2));
        let mut r = reconciler();
        assert_eq!(r.restore(vec![fresh.clone(), stale, fresh], now), 1);
    }
}
