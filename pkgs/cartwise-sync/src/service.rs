//! Price-drop service
//!
//! Owns the notification reconciler and everything that feeds it: the
//! push listener, the periodic poll, the hourly purge and cart room
//! membership. All three sources go through the same reconciler, so a
//! drop reported by push and by poll is kept once.

use cartwise_store::{CacheKey, LocalCache};
use cartwise_transport::{EventKind, PushEvent, Transport};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::CartwiseApi;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::{PriceDropNotification, PushedPriceDrop, UserIdentity, Wishlist};
use crate::price_drops::{cart_aggregate, drops_from_items, record_to_notification};
use crate::reconciler::{IngestOutcome, IngestSource, NotificationReconciler};
use crate::scope::run_scoped;

/// Background price-drop tracking for one user
#[derive(Clone)]
pub struct PriceDropService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    identity: UserIdentity,
    config: SyncConfig,
    transport: Transport,
    api: Arc<dyn CartwiseApi>,
    cache: LocalCache,
    reconciler: Mutex<NotificationReconciler>,
    wishlist: Mutex<Option<Wishlist>>,
    product_wishlist_names: Mutex<HashMap<String, String>>,
    /// Carts the user belongs to
    cart_ids: Mutex<HashSet<String>>,
    /// Cart rooms this client should be in
    rooms: Mutex<HashSet<String>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PriceDropService {
    pub fn new(
        identity: UserIdentity,
        transport: Transport,
        api: Arc<dyn CartwiseApi>,
        cache: LocalCache,
        config: SyncConfig,
    ) -> Self {
        let reconciler = NotificationReconciler::new(
            identity.clone(),
            config.recency_window_chrono(),
            config.price_tolerance,
        );
        Self {
            inner: Arc::new(ServiceInner {
                identity,
                config,
                transport,
                api,
                cache,
                reconciler: Mutex::new(reconciler),
                wishlist: Mutex::new(None),
                product_wishlist_names: Mutex::new(HashMap::new()),
                cart_ids: Mutex::new(HashSet::new()),
                rooms: Mutex::new(HashSet::new()),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Restore cached state, resolve ownership, join rooms and start tasks
    ///
    /// Failures of individual steps are logged; the service still starts
    /// with whatever state it could recover.
    #[instrument(skip(self), fields(user = %self.inner.identity.user_id))]
    pub async fn start(&self) {
        let inner = &self.inner;
        info!("Starting price-drop service for {}", inner.identity.user_id);

        let restored = inner.restore().await;
        debug!("Restored {} cached notifications", restored);

        if let Err(e) = inner.refresh_wishlist().await {
            warn!("Could not resolve wishlist: {}", e);
        }

        // Listen before connecting so the Connected event re-subscribes
        self.spawn_push_listener();
        if inner.transport.is_connected() {
            inner.on_connected(inner.transport.session_id());
        } else {
            inner.transport.connect().await;
        }

        if let Err(e) = self.sync_cart_rooms().await {
            warn!("Could not sync cart rooms: {}", e);
        }

        self.spawn_timers();

        match self.check_recent().await {
            Ok(added) => debug!("Initial check added {} notifications", added),
            Err(e) => warn!("Initial price check failed: {}", e),
        }
        match self.check_carts().await {
            Ok(added) => debug!("Initial cart check added {} aggregates", added),
            Err(e) => warn!("Initial cart check failed: {}", e),
        }
    }

    fn spawn_push_listener(&self) {
        let inner = Arc::clone(&self.inner);
        let mut events = inner
            .transport
            .subscribe(&[EventKind::PriceDrop, EventKind::Connected]);
        let cancel = inner.cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(PushEvent::PriceDrop(data)) => inner.on_push_price_drop(data).await,
                        Some(PushEvent::Connected { session_id }) => {
                            inner.on_connected(Some(session_id));
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
            debug!("Price-drop push listener stopped");
        });
        self.inner.tasks.lock().push(handle);
    }

    fn spawn_timers(&self) {
        let poll_every = self.inner.config.poll_interval;
        let purge_every = self.inner.config.purge_interval;

        let service = self.clone();
        let cancel = self.inner.cancel.clone();
        let poll = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + poll_every, poll_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match service.poll_since_last_check().await {
                            Ok(added) if added > 0 => info!("Periodic check found {} price drops", added),
                            Ok(_) => {}
                            Err(SyncError::Cancelled) => break,
                            Err(e) => warn!("Periodic price check failed: {}", e),
                        }
                        match service.check_carts().await {
                            Ok(added) if added > 0 => info!("Periodic check found {} cart drops", added),
                            Ok(_) => {}
                            Err(SyncError::Cancelled) => break,
                            Err(e) => warn!("Periodic cart check failed: {}", e),
                        }
                    }
                }
            }
        });

        let service = self.clone();
        let cancel = self.inner.cancel.clone();
        let purge = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + purge_every, purge_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        service.purge_now().await;
                    }
                }
            }
        });

        self.inner.tasks.lock().extend([poll, purge]);
    }

    /// Fetch changes since the last successful periodic check
    #[instrument(skip(self))]
    pub async fn poll_since_last_check(&self) -> Result<usize, SyncError> {
        let inner = &self.inner;
        let now = Utc::now();
        let since = inner
            .cache
            .load::<DateTime<Utc>>(&CacheKey::LastPriceCheck)
            .await
            .unwrap_or_else(|| now - inner.config.recency_window_chrono());

        let added = inner.fetch_changes(since, IngestSource::PeriodicPoll).await?;
        inner.cache.store(&CacheKey::LastPriceCheck, &now).await;
        Ok(added)
    }

    /// Fetch changes from the whole recency window
    pub async fn check_recent(&self) -> Result<usize, SyncError> {
        let since = Utc::now() - self.inner.config.recency_window_chrono();
        self.inner
            .fetch_changes(since, IngestSource::OnDemandPoll)
            .await
    }

    /// Derive drops from the price histories of specific wishlist products
    pub async fn check_products(&self, product_ids: &[String]) -> Result<usize, SyncError> {
        let inner = &self.inner;
        let items = run_scoped(
            &inner.cancel,
            inner
                .api
                .items_with_recent_prices(product_ids, true, &inner.identity.user_id),
        )
        .await?;

        let now = Utc::now();
        let drops = {
            let wishlist = inner.wishlist.lock();
            let names = inner.product_wishlist_names.lock();
            drops_from_items(
                &items,
                wishlist.as_ref(),
                &names,
                now,
                inner.config.recency_window_chrono(),
            )
        };
        Ok(inner.ingest_all(IngestSource::OnDemandPoll, drops, now).await)
    }

    /// Derive one aggregate per cart where several products dropped
    pub async fn check_carts(&self) -> Result<usize, SyncError> {
        let inner = &self.inner;
        let carts = run_scoped(&inner.cancel, inner.api.user_carts(&inner.identity.user_id)).await?;

        let mut aggregates = Vec::new();
        for cart in carts.iter().filter(|c| c.notifications_enabled()) {
            let product_ids = cart.product_ids();
            if product_ids.len() < 2 {
                continue;
            }
            let items = match run_scoped(
                &inner.cancel,
                inner
                    .api
                    .items_with_recent_prices(&product_ids, false, &inner.identity.user_id),
            )
            .await
            {
                Ok(items) => items,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!("Could not load prices for cart {}: {}", cart.id, e);
                    continue;
                }
            };

            let now = Utc::now();
            let drops = drops_from_items(
                &items,
                None,
                &HashMap::new(),
                now,
                inner.config.recency_window_chrono(),
            );
            if let Some(aggregate) = cart_aggregate(cart, &drops, now) {
                aggregates.push(aggregate);
            }
        }

        Ok(inner
            .ingest_all(IngestSource::OnDemandPoll, aggregates, Utc::now())
            .await)
    }

    /// Bring cart room membership in line with the user's carts
    ///
    /// Falls back to the cached cart list when the server is unreachable.
    #[instrument(skip(self))]
    pub async fn sync_cart_rooms(&self) -> Result<usize, SyncError> {
        let inner = &self.inner;
        let wanted: HashSet<String> =
            match run_scoped(&inner.cancel, inner.api.user_carts(&inner.identity.user_id)).await {
                Ok(carts) => {
                    let all: Vec<String> = carts.iter().map(|c| c.id.clone()).collect();
                    let alerting: Vec<String> = carts
                        .iter()
                        .filter(|c| c.notifications_enabled())
                        .map(|c| c.id.clone())
                        .collect();
                    inner.cache.store(&CacheKey::UserCarts, &all).await;
                    inner.cache.store(&CacheKey::AlertCarts, &alerting).await;
                    *inner.cart_ids.lock() = all.into_iter().collect();
                    alerting.into_iter().collect()
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    let cached: Vec<String> = inner
                        .cache
                        .load(&CacheKey::UserCarts)
                        .await
                        .ok_or(e)?;
                    *inner.cart_ids.lock() = cached.iter().cloned().collect();
                    // Without the alert set the current rooms are left as they are
                    let Some(alerting) = inner
                        .cache
                        .load::<Vec<String>>(&CacheKey::AlertCarts)
                        .await
                    else {
                        warn!("No cached alert carts, keeping current rooms");
                        return Ok(inner.rooms.lock().len());
                    };
                    warn!("Using {} cached alert carts for room membership", alerting.len());
                    alerting.into_iter().collect()
                }
            };

        let (to_leave, to_join) = {
            let mut rooms = inner.rooms.lock();
            let to_leave: Vec<String> = rooms.difference(&wanted).cloned().collect();
            let to_join: Vec<String> = wanted.difference(&rooms).cloned().collect();
            *rooms = wanted;
            (to_leave, to_join)
        };
        for cart_id in &to_leave {
            inner.transport.leave_cart_room(cart_id);
        }
        for cart_id in &to_join {
            inner.transport.join_cart_room(cart_id);
        }
        debug!("Cart rooms: joined {}, left {}", to_join.len(), to_leave.len());
        Ok(inner.rooms.lock().len())
    }

    /// Re-resolve the user's wishlist
    pub async fn refresh_wishlist(&self) -> Result<Option<Wishlist>, SyncError> {
        self.inner.refresh_wishlist().await
    }

    pub async fn dismiss(&self, id: &str) -> bool {
        let removed = self.inner.reconciler.lock().dismiss(id);
        if removed {
            self.inner.persist().await;
        }
        removed
    }

    pub async fn dismiss_all(&self) -> usize {
        let removed = self.inner.reconciler.lock().dismiss_all();
        self.inner.persist().await;
        removed
    }

    pub async fn mark_read(&self, id: &str) -> bool {
        let changed = self.inner.reconciler.lock().mark_read(id);
        if changed {
            self.inner.persist().await;
        }
        changed
    }

    /// Sweep notifications older than the recency window
    pub async fn purge_now(&self) -> usize {
        let removed = self.inner.reconciler.lock().purge_stale(Utc::now());
        if removed > 0 {
            debug!("Purged {} stale notifications", removed);
            self.inner.persist().await;
        }
        removed
    }

    /// All notifications, newest first
    pub fn notifications(&self) -> Vec<PriceDropNotification> {
        self.inner.reconciler.lock().sorted_by_recency()
    }

    /// Notifications the user should currently see
    pub fn visible(&self) -> Vec<PriceDropNotification> {
        let wishlist = self.inner.wishlist.lock().clone();
        let cart_ids = self.inner.cart_ids.lock().clone();
        self.inner
            .reconciler
            .lock()
            .visible_for(wishlist.as_ref(), &cart_ids)
    }

    pub fn joined_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.inner.rooms.lock().iter().cloned().collect();
        rooms.sort();
        rooms
    }

    pub fn wishlist(&self) -> Option<Wishlist> {
        self.inner.wishlist.lock().clone()
    }

    /// Stop all tasks and leave cart rooms; in-flight fetches are discarded
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.cancel.cancel();

        let rooms: Vec<String> = inner.rooms.lock().drain().collect();
        for cart_id in &rooms {
            inner.transport.leave_cart_room(cart_id);
        }

        let tasks: Vec<JoinHandle<()>> = inner.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Price-drop task ended abnormally: {}", e);
            }
        }
        info!("Price-drop service stopped");
    }
}

impl ServiceInner {
    async fn restore(&self) -> usize {
        if let Some(names) = self
            .cache
            .load::<HashMap<String, String>>(&CacheKey::ProductWishlistMap)
            .await
        {
            *self.product_wishlist_names.lock() = names;
        }

        let cached: Vec<PriceDropNotification> = self
            .cache
            .load(&CacheKey::PriceDropNotifications)
            .await
            .unwrap_or_default();
        if cached.is_empty() {
            return 0;
        }

        // Ownership is checked once the wishlist is known
        let mut reconciler = self.reconciler.lock();
        let wishlist_ids: HashSet<String> =
            cached.iter().filter_map(|n| n.wishlist_id.clone()).collect();
        let previous = reconciler.wishlist_id().map(str::to_string);
        if previous.is_none() && wishlist_ids.len() == 1 {
            reconciler.set_wishlist_id(wishlist_ids.into_iter().next());
        }
        reconciler.restore(cached, Utc::now())
    }

    async fn refresh_wishlist(&self) -> Result<Option<Wishlist>, SyncError> {
        let wishlist =
            run_scoped(&self.cancel, self.api.user_wishlist(&self.identity.user_id)).await?;

        if let Some(wishlist) = &wishlist {
            let names: HashMap<String, String> = wishlist
                .products
                .iter()
                .map(|product_id| (product_id.clone(), wishlist.name.clone()))
                .collect();
            self.cache.store(&CacheKey::ProductWishlistMap, &names).await;
            *self.product_wishlist_names.lock() = names;
        }

        let removed = {
            let mut reconciler = self.reconciler.lock();
            let changed = reconciler.wishlist_id() != wishlist.as_ref().map(|w| w.id.as_str());
            reconciler.set_wishlist_id(wishlist.as_ref().map(|w| w.id.clone()));
            if changed {
                // Re-admit under the new owner
                let kept = reconciler.notifications();
                reconciler.dismiss_all();
                let total = kept.len();
                total - reconciler.restore(kept, Utc::now())
            } else {
                0
            }
        };
        if removed > 0 {
            info!("Dropped {} notifications for another wishlist", removed);
            self.persist().await;
        }

        *self.wishlist.lock() = wishlist.clone();
        Ok(wishlist)
    }

    fn on_connected(&self, session_id: Option<String>) {
        self.reconciler.lock().set_session_id(session_id);
        self.transport
            .subscribe_to_wishlist_updates(&self.identity.user_id);
        let rooms: Vec<String> = self.rooms.lock().iter().cloned().collect();
        for cart_id in &rooms {
            self.transport.join_cart_room(cart_id);
        }
        debug!("Re-subscribed wishlist updates and {} cart rooms", rooms.len());
    }

    async fn on_push_price_drop(&self, data: serde_json::Value) {
        let pushed: PushedPriceDrop = match serde_json::from_value(data) {
            Ok(pushed) => pushed,
            Err(e) => {
                warn!("Ignoring malformed price-drop event: {}", e);
                return;
            }
        };
        let now = Utc::now();
        let mut notification = pushed.into_notification(now);
        if notification.wishlist_name.is_none() && notification.wishlist_id.is_some() {
            notification.wishlist_name = self
                .product_wishlist_names
                .lock()
                .get(&notification.product_id)
                .cloned();
        }
        self.ingest_all(IngestSource::Push, vec![notification], now)
            .await;
    }

    async fn fetch_changes(
        &self,
        since: DateTime<Utc>,
        source: IngestSource,
    ) -> Result<usize, SyncError> {
        let records = run_scoped(
            &self.cancel,
            self.api
                .wishlist_price_changes(since, true, &self.identity.user_id),
        )
        .await?;
        let drops = records.iter().map(record_to_notification).collect();
        Ok(self.ingest_all(source, drops, Utc::now()).await)
    }

    async fn ingest_all(
        &self,
        source: IngestSource,
        notifications: Vec<PriceDropNotification>,
        now: DateTime<Utc>,
    ) -> usize {
        if self.cancel.is_cancelled() {
            return 0;
        }
        let added = {
            let mut reconciler = self.reconciler.lock();
            notifications
                .into_iter()
                .filter(|n| reconciler.ingest(source, n.clone(), now) == IngestOutcome::Added)
                .count()
        };
        if added > 0 {
            self.persist().await;
        }
        added
    }

    /// Write the list to its durable mirror
    async fn persist(&self) {
        let snapshot = self.reconciler.lock().sorted_by_recency();
        self.cache
            .store(&CacheKey::PriceDropNotifications, &snapshot)
            .await;
    }
}
