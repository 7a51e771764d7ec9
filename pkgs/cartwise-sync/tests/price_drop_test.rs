//! Price-drop service against a mock backend and the in-process hub

mod common;

use cartwise_store::CacheKey;
use cartwise_sync::{NotificationKind, PriceDropNotification, PriceDropService};
use cartwise_transport::{MemoryHub, Transport};
use chrono::{Duration, Utc};
use common::*;
use serde_json::json;
use std::sync::Arc;

fn service_for(
    api: &Arc<MockApi>,
    transport: &Transport,
    cache: &cartwise_store::LocalCache,
) -> PriceDropService {
    PriceDropService::new(
        alice(),
        transport.clone(),
        api.clone(),
        cache.clone(),
        fast_config(),
    )
}

#[tokio::test]
async fn test_push_and_poll_report_one_drop() {
    let hub = MemoryHub::new();
    let api = MockApi::new();
    let now = Utc::now();
    {
        let mut state = api.state();
        state.wishlist = Some(wishlist(&["p1", "p2"]));
        state.price_changes = vec![change("p1", "s1", 3.0, 2.5, now)];
    }
    let transport = fast_transport(&hub);
    let cache = memory_cache();
    let service = service_for(&api, &transport, &cache);

    service.start().await;
    assert_eq!(service.notifications().len(), 1);
    wait_until(|| hub.wishlist_subscribers("u1").len() == 1).await;

    // Same drop over push, then a different one to know the first was handled
    hub.publish_price_drop(
        "u1",
        json!({
            "productId": "p1", "storeId": "s1", "productName": "Product p1",
            "oldPrice": 3.0, "newPrice": 2.5, "changeDate": now,
            "wishlistId": "w1"
        }),
    );
    hub.publish_price_drop(
        "u1",
        json!({
            "productId": "p2", "storeId": "s1", "productName": "Product p2",
            "oldPrice": 5.0, "newPrice": 4.0, "wishlistId": "w1"
        }),
    );
    wait_until(|| service.notifications().len() == 2).await;

    assert_eq!(service.poll_since_last_check().await.unwrap(), 0);
    assert_eq!(service.notifications().len(), 2);

    let mirror: Vec<PriceDropNotification> =
        cache.load(&CacheKey::PriceDropNotifications).await.unwrap();
    assert_eq!(mirror.len(), 2);
    assert_eq!(mirror[0].product_id, "p2", "mirror is newest first");

    service.shutdown().await;
}

#[tokio::test]
async fn test_poll_advances_last_check() {
    let hub = MemoryHub::new();
    let api = MockApi::new();
    api.state().wishlist = Some(wishlist(&["p1"]));
    let cache = memory_cache();
    let transport = fast_transport(&hub);
    let service = service_for(&api, &transport, &cache);

    let before = Utc::now();
    service.poll_since_last_check().await.unwrap();
    let first_since = api.state().change_queries[0];
    assert!(before - first_since >= Duration::hours(23));

    let checked: chrono::DateTime<Utc> = cache.load(&CacheKey::LastPriceCheck).await.unwrap();
    service.poll_since_last_check().await.unwrap();
    assert_eq!(api.state().change_queries[1], checked);
}

#[tokio::test]
async fn test_poll_failure_keeps_state() {
    let hub = MemoryHub::new();
    let api = MockApi::new();
    api.state().wishlist = Some(wishlist(&["p1"]));
    api.state().price_changes = vec![change("p1", "s1", 3.0, 2.5, Utc::now())];
    let cache = memory_cache();
    let transport = fast_transport(&hub);
    let service = service_for(&api, &transport, &cache);
    service.start().await;
    assert_eq!(service.notifications().len(), 1);

    api.state().offline = true;
    assert!(service.poll_since_last_check().await.is_err());
    assert_eq!(service.notifications().len(), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn test_foreign_wishlist_push_ignored() {
    let hub = MemoryHub::new();
    let api = MockApi::new();
    api.state().wishlist = Some(wishlist(&["p1"]));
    let transport = fast_transport(&hub);
    let service = service_for(&api, &transport, &memory_cache());
    service.start().await;
    wait_until(|| !hub.wishlist_subscribers("u1").is_empty()).await;

    hub.publish_price_drop(
        "u1",
        json!({"productId": "p1", "storeId": "s1", "oldPrice": 3.0, "newPrice": 2.0, "wishlistId": "w-other"}),
    );
    hub.publish_price_drop(
        "u1",
        json!({"productId": "p1", "storeId": "s1", "oldPrice": 3.0, "newPrice": 2.0, "wishlistId": "w1"}),
    );
    wait_until(|| service.notifications().len() == 1).await;
    assert_eq!(service.notifications()[0].wishlist_id.as_deref(), Some("w1"));
    service.shutdown().await;
}

#[tokio::test]
async fn test_cart_rooms_follow_cart_settings() {
    let hub = MemoryHub::new();
    let api = MockApi::new();
    api.state().carts = vec![
        cart("c1", &["p1"], None),
        cart("c2", &["p2"], Some(false)),
    ];
    let transport = fast_transport(&hub);
    let service = service_for(&api, &transport, &memory_cache());
    service.start().await;

    assert_eq!(service.joined_rooms(), vec!["c1".to_string()]);
    let session = transport.session_id().unwrap();
    wait_until(|| hub.room_members("c1") == vec![session.clone()]).await;
    assert!(hub.room_members("c2").is_empty());

    // A cart drop sent by another member reaches this client
    let other = fast_transport(&hub);
    other.connect().await;
    other.join_cart_room("c1");
    wait_until(|| hub.room_members("c1").len() == 2).await;
    other.test_cart_notification(
        "c1",
        json!({"productId": "p1", "storeId": "s1", "productName": "Milk", "oldPrice": 2.0, "newPrice": 1.5}),
    );
    wait_until(|| service.visible().len() == 1).await;
    assert_eq!(service.visible()[0].cart_id.as_deref(), Some("c1"));

    // Turning alerts off leaves the room
    api.state().carts[0].notifications = Some(false);
    service.sync_cart_rooms().await.unwrap();
    assert!(service.joined_rooms().is_empty());
    wait_until(|| hub.room_members("c1").len() == 1).await;

    service.shutdown().await;
}

#[tokio::test]
async fn test_rooms_restored_after_server_drop() {
    let hub = MemoryHub::new();
    let api = MockApi::new();
    api.state().carts = vec![cart("c1", &["p1"], None)];
    let transport = fast_transport(&hub);
    let service = service_for(&api, &transport, &memory_cache());
    service.start().await;

    let first = transport.session_id().unwrap();
    wait_until(|| hub.room_members("c1") == vec![first.clone()]).await;
    hub.drop_session(&first);

    wait_until(|| {
        let members = hub.room_members("c1");
        members.len() == 1 && members[0] != first
    })
    .await;
    wait_until(|| hub.wishlist_subscribers("u1").len() == 1).await;
    service.shutdown().await;
}

fn item(id: &str, old: f64, new: f64) -> cartwise_sync::ItemRecord {
    let now = Utc::now();
    cartwise_sync::ItemRecord {
        id: id.to_string(),
        name: format!("Product {id}"),
        image: None,
        store_prices: vec![cartwise_sync::StorePrices {
            store_id: "s1".to_string(),
            store_name: None,
            prices: vec![
                cartwise_sync::PricePoint { price: old, date: now - Duration::days(2) },
                cartwise_sync::PricePoint { price: new, date: now - Duration::hours(1) },
            ],
        }],
    }
}

#[tokio::test]
async fn test_cart_aggregate_needs_two_drops() {
    let hub = MemoryHub::new();
    let api = MockApi::new();
    {
        let mut state = api.state();
        state.carts = vec![cart("c1", &["p1", "p2", "p3"], None)];
        state.items = vec![item("p1", 4.0, 3.0), item("p2", 2.0, 1.5), item("p3", 1.0, 1.2)];
    }
    let transport = fast_transport(&hub);
    let service = service_for(&api, &transport, &memory_cache());

    assert_eq!(service.check_carts().await.unwrap(), 1);
    let aggregate = &service.notifications()[0];
    assert_eq!(aggregate.kind, NotificationKind::CartPriceDrop);
    assert_eq!(aggregate.product_name, "2 items in Cart c1 dropped in price");

    // Checking again finds the same aggregate
    assert_eq!(service.check_carts().await.unwrap(), 0);

    api.state().items = vec![item("p1", 4.0, 3.0)];
    let lone = service_for(&api, &transport, &memory_cache());
    assert_eq!(lone.check_carts().await.unwrap(), 0);
}

#[tokio::test]
async fn test_check_products_scopes_to_wishlist() {
    let hub = MemoryHub::new();
    let api = MockApi::new();
    let now = Utc::now();
    {
        let mut state = api.state();
        state.wishlist = Some(wishlist(&["p1"]));
        state.items = vec![cartwise_sync::ItemRecord {
            id: "p1".to_string(),
            name: "Milk".to_string(),
            image: None,
            store_prices: vec![cartwise_sync::StorePrices {
                store_id: "s1".to_string(),
                store_name: None,
                prices: vec![
                    cartwise_sync::PricePoint { price: 3.0, date: now - Duration::days(1) },
                    cartwise_sync::PricePoint { price: 2.5, date: now - Duration::hours(2) },
                ],
            }],
        }];
    }
    let transport = fast_transport(&hub);
    let service = service_for(&api, &transport, &memory_cache());
    service.refresh_wishlist().await.unwrap();

    assert_eq!(service.check_products(&["p1".to_string()]).await.unwrap(), 1);
    let drop = &service.visible()[0];
    assert_eq!(drop.wishlist_id.as_deref(), Some("w1"));
    assert_eq!(drop.wishlist_name.as_deref(), Some("Weekly"));
}

#[tokio::test]
async fn test_mirror_survives_restart_offline() {
    let hub = MemoryHub::new();
    let api = MockApi::new();
    api.state().wishlist = Some(wishlist(&["p1"]));
    api.state().price_changes = vec![change("p1", "s1", 3.0, 2.5, Utc::now())];
    let cache = memory_cache();

    let transport = fast_transport(&hub);
    let first = service_for(&api, &transport, &cache);
    first.start().await;
    assert_eq!(first.notifications().len(), 1);
    first.shutdown().await;

    api.state().offline = true;
    hub.refuse_next_opens(10);
    let offline_transport = fast_transport(&hub);
    let second = service_for(&api, &offline_transport, &cache.new_context());
    second.start().await;

    assert_eq!(second.notifications().len(), 1);
    assert!(!offline_transport.is_connected());
    second.shutdown().await;
}

#[tokio::test]
async fn test_dismiss_updates_mirror() {
    let hub = MemoryHub::new();
    let api = MockApi::new();
    let now = Utc::now();
    api.state().wishlist = Some(wishlist(&["p1", "p2"]));
    api.state().price_changes = vec![
        change("p1", "s1", 3.0, 2.5, now),
        change("p2", "s1", 3.0, 2.5, now - Duration::hours(1)),
    ];
    let cache = memory_cache();
    let transport = fast_transport(&hub);
    let service = service_for(&api, &transport, &cache);
    service.start().await;

    let newest = service.notifications()[0].id.clone();
    assert!(service.dismiss(&newest).await);
    let mirror: Vec<PriceDropNotification> =
        cache.load(&CacheKey::PriceDropNotifications).await.unwrap();
    assert_eq!(mirror.len(), 1);

    assert_eq!(service.dismiss_all().await, 1);
    let mirror: Vec<PriceDropNotification> =
        cache.load(&CacheKey::PriceDropNotifications).await.unwrap();
    assert!(mirror.is_empty());
    service.shutdown().await;
}

#[tokio::test]
async fn test_running_service_reports_cart_aggregate_once() {
    let hub = MemoryHub::new();
    let api = MockApi::new();
    {
        let mut state = api.state();
        state.carts = vec![cart("c1", &["p1", "p2", "p3"], None)];
        state.items = vec![item("p1", 4.0, 3.0), item("p2", 2.0, 1.5), item("p3", 1.0, 1.2)];
    }
    let transport = fast_transport(&hub);
    let config = cartwise_sync::SyncConfig {
        poll_interval: std::time::Duration::from_millis(30),
        ..fast_config()
    };
    let service = PriceDropService::new(alice(), transport, api.clone(), memory_cache(), config);
    service.start().await;

    let aggregates = |service: &PriceDropService| {
        service
            .visible()
            .into_iter()
            .filter(|n| n.kind == NotificationKind::CartPriceDrop)
            .count()
    };
    assert_eq!(aggregates(&service), 1);

    // Several periodic ticks later it is still a single entry
    let queries = api.state().change_queries.len();
    wait_until(|| api.state().change_queries.len() >= queries + 3).await;
    assert_eq!(aggregates(&service), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn test_offline_rooms_skip_carts_without_alerts() {
    let hub = MemoryHub::new();
    let api = MockApi::new();
    api.state().carts = vec![
        cart("c1", &["p1"], None),
        cart("c2", &["p2"], Some(false)),
    ];
    let cache = memory_cache();

    let first = service_for(&api, &fast_transport(&hub), &cache);
    first.start().await;
    assert_eq!(first.joined_rooms(), vec!["c1".to_string()]);
    first.shutdown().await;

    api.state().offline = true;
    let transport = fast_transport(&hub);
    let second = service_for(&api, &transport, &cache);
    second.start().await;
    assert_eq!(second.joined_rooms(), vec!["c1".to_string()]);
    let session = transport.session_id().unwrap();
    wait_until(|| hub.room_members("c1") == vec![session.clone()]).await;
    assert!(hub.room_members("c2").is_empty());
    second.shutdown().await;
}
