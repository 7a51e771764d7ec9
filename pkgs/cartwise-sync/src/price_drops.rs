//! Price-drop derivation from item price histories

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::models::{
    Cart, ItemRecord, NotificationKind, PriceChangeRecord, PriceDropNotification, StorePrices,
    Wishlist,
};

/// Latest price movement at one store
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreDrop {
    pub old_price: f64,
    pub new_price: f64,
    pub date: DateTime<Utc>,
}

/// Compare the two most recent price points of a store
///
/// `None` unless the latest price is strictly below the one before it.
pub fn latest_drop(store: &StorePrices) -> Option<StoreDrop> {
    let mut points: Vec<_> = store.prices.iter().collect();
    if points.len() < 2 {
        return None;
    }
    points.sort_by_key(|point| point.date);

    let latest = points[points.len() - 1];
    let previous = points[points.len() - 2];
    (latest.price < previous.price).then_some(StoreDrop {
        old_price: previous.price,
        new_price: latest.price,
        date: latest.date,
    })
}

/// Notifications for recent drops in the given items
///
/// `wishlist` scopes the results to the user's wishlist; `names` maps
/// product ids to the wishlist name shown in the notification.
pub fn drops_from_items(
    items: &[ItemRecord],
    wishlist: Option<&Wishlist>,
    names: &HashMap<String, String>,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> Vec<PriceDropNotification> {
    let mut drops = Vec::new();
    for item in items {
        for store in &item.store_prices {
            let Some(drop) = latest_drop(store) else {
                continue;
            };
            if now.signed_duration_since(drop.date) >= window {
                continue;
            }

            let mut notification = PriceDropNotification::price_drop(
                item.id.clone(),
                store.store_id.clone(),
                item.name.clone(),
                drop.old_price,
                drop.new_price,
                drop.date,
            );
            notification.image = item.image.clone();
            if let Some(wishlist) = wishlist {
                notification.wishlist_id = Some(wishlist.id.clone());
                notification.wishlist_name = names
                    .get(&item.id)
                    .cloned()
                    .or_else(|| Some(wishlist.name.clone()).filter(|n| !n.is_empty()));
            }
            drops.push(notification);
        }
    }
    drops
}

/// One summary entry when several products of a cart dropped together
///
/// Only the largest drop per product counts. A single product is left to
/// its own notification and produces no aggregate.
pub fn cart_aggregate(
    cart: &Cart,
    drops: &[PriceDropNotification],
    now: DateTime<Utc>,
) -> Option<PriceDropNotification> {
    let in_cart: HashSet<String> = cart.product_ids().into_iter().collect();

    let mut best: HashMap<&str, &PriceDropNotification> = HashMap::new();
    for drop in drops
        .iter()
        .filter(|d| d.is_true_drop() && in_cart.contains(&d.product_id))
    {
        best.entry(drop.product_id.as_str())
            .and_modify(|current| {
                if drop.old_price - drop.new_price > current.old_price - current.new_price {
                    *current = drop;
                }
            })
            .or_insert(drop);
    }

    if best.len() <= 1 {
        return None;
    }

    let mut old_total = 0.0;
    let mut new_total = 0.0;
    let mut latest = None;
    for (product_id, drop) in &best {
        let quantity = f64::from(cart.quantity_of(product_id));
        old_total += drop.old_price * quantity;
        new_total += drop.new_price * quantity;
        latest = latest.max(Some(drop.change_date));
    }

    let mut aggregate = PriceDropNotification::price_drop(
        String::new(),
        String::new(),
        format!("{} items in {} dropped in price", best.len(), cart.display_name()),
        round_cents(old_total),
        round_cents(new_total),
        latest.unwrap_or(now),
    );
    aggregate.kind = NotificationKind::CartPriceDrop;
    aggregate.cart_id = Some(cart.id.clone());
    aggregate.wishlist_name = Some(cart.display_name().to_string());
    Some(aggregate)
}

/// Notification for a row of the price-change feed
pub fn record_to_notification(record: &PriceChangeRecord) -> PriceDropNotification {
    PriceDropNotification::from(record)
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CartItem, PricePoint};
    use chrono::Duration;

    fn store(id: &str, points: &[(f64, DateTime<Utc>)]) -> StorePrices {
        StorePrices {
            store_id: id.to_string(),
            store_name: None,
            prices: points
                .iter()
                .map(|(price, date)| PricePoint {
                    price: *price,
                    date: *date,
                })
                .collect(),
        }
    }

    fn item(id: &str, stores: Vec<StorePrices>) -> ItemRecord {
        ItemRecord {
            id: id.to_string(),
            name: format!("Item {id}"),
            image: None,
            store_prices: stores,
        }
    }

    fn cart(products: &[&str]) -> Cart {
        Cart {
            id: "c1".to_string(),
            name: "Groceries".to_string(),
            owner_id: "u1".to_string(),
            participants: vec!["u1".to_string(), "u2".to_string()],
            items: products
                .iter()
                .map(|p| CartItem {
                    product_id: p.to_string(),
                    quantity: 1,
                })
                .collect(),
            notifications: None,
        }
    }

    #[test]
    fn test_latest_drop_uses_two_most_recent_points() {
        let now = Utc::now();
        // Out of order on purpose
        let s = store(
            "s1",
            &[
                (2.0, now - Duration::hours(1)),
                (5.0, now - Duration::days(3)),
                (3.0, now - Duration::days(1)),
            ],
        );
        let drop = latest_drop(&s).unwrap();
        assert_eq!(drop.old_price, 3.0);
        assert_eq!(drop.new_price, 2.0);

        let rising = store("s1", &[(2.0, now - Duration::days(1)), (3.0, now)]);
        assert!(latest_drop(&rising).is_none());
        assert!(latest_drop(&store("s1", &[(2.0, now)])).is_none());
    }

    #[test]
    fn test_drops_from_items_filters_old_and_scopes_to_wishlist() {
        let now = Utc::now();
        let items = vec![
            item("p1", vec![store("s1", &[(3.0, now - Duration::days(2)), (2.5, now - Duration::hours(2))])]),
            item("p2", vec![store("s1", &[(3.0, now - Duration::days(3)), (2.0, now - Duration::hours(30))])]),
        ];
        let wishlist = Wishlist {
            id: "w1".to_string(),
            name: "Weekly".to_string(),
            user_id: "u1".to_string(),
            products: vec!["p1".to_string(), "p2".to_string()],
        };
        let names = HashMap::from([("p1".to_string(), "Pantry".to_string())]);

        let drops = drops_from_items(&items, Some(&wishlist), &names, now, Duration::hours(24));
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].product_id, "p1");
        assert_eq!(drops[0].wishlist_id.as_deref(), Some("w1"));
        assert_eq!(drops[0].wishlist_name.as_deref(), Some("Pantry"));
    }

    #[test]
    fn test_cart_aggregate_needs_two_products() {
        let now = Utc::now();
        let at = now - Duration::hours(1);
        let d1 = PriceDropNotification::price_drop("p1", "s1", "A", 4.0, 3.0, at);
        let d2 = PriceDropNotification::price_drop("p2", "s1", "B", 2.0, 1.5, at);
        let outside = PriceDropNotification::price_drop("p9", "s1", "Z", 9.0, 1.0, at);

        let three = cart(&["p1", "p2", "p3"]);
        let aggregate = cart_aggregate(&three, &[d1.clone(), d2, outside.clone()], now).unwrap();
        assert_eq!(aggregate.kind, NotificationKind::CartPriceDrop);
        assert_eq!(aggregate.cart_id.as_deref(), Some("c1"));
        assert_eq!(aggregate.product_name, "2 items in Groceries dropped in price");
        assert_eq!(aggregate.old_price, 6.0);
        assert_eq!(aggregate.new_price, 4.5);

        assert!(cart_aggregate(&three, &[d1, outside], now).is_none());
    }

    #[test]
    fn test_cart_aggregate_counts_products_not_stores() {
        let now = Utc::now();
        let at = now - Duration::hours(1);
        let s1 = PriceDropNotification::price_drop("p1", "s1", "A", 4.0, 3.0, at);
        let s2 = PriceDropNotification::price_drop("p1", "s2", "A", 4.0, 2.0, at);
        assert!(cart_aggregate(&cart(&["p1", "p2"]), &[s1, s2], now).is_none());
    }
}
