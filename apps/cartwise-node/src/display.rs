use cartwise_sync::{ChatMessage, ClientSession, NotificationKind, PriceDropNotification};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Terminal output; remembers what was already printed
#[derive(Default)]
pub struct Display {
    shown: HashSet<String>,
    unread: HashMap<String, usize>,
}

impl Display {
    pub fn show_history(&self, cart_id: &str, messages: &[ChatMessage]) {
        println!("--- Chat for cart {} ({} messages) ---", cart_id, messages.len());
        for message in messages {
            print_message(message);
        }
    }

    /// Print price drops and unread counts not seen yet; true when anything was printed
    pub fn show_new_notifications(&mut self, session: &ClientSession) -> bool {
        let mut printed = false;

        let mut fresh: Vec<PriceDropNotification> = session
            .price_drops()
            .visible()
            .into_iter()
            .filter(|n| !self.shown.contains(&n.id))
            .collect();
        fresh.sort_by_key(|n| n.change_date);
        for notification in fresh {
            self.shown.insert(notification.id.clone());
            println!("\n{}", describe(&notification));
            printed = true;
        }

        let unread = session.notifications().unread_by_cart();
        for (cart_id, count) in &unread {
            if self.unread.get(cart_id) != Some(count) {
                println!("\n💬 {} unread in cart {}", count, cart_id);
                printed = true;
            }
        }
        self.unread = unread;
        printed
    }

    pub fn show_live_message(&self, session: &ClientSession, data: &Value) {
        let Ok(message) = serde_json::from_value::<ChatMessage>(data.clone()) else {
            return;
        };
        let open_cart = session.chat().and_then(|chat| chat.cart_id());
        if open_cart.is_none() || message.cart_id != open_cart {
            return;
        }
        if session.transport().session_id().as_deref() == Some(message.client_id.as_str()) {
            return;
        }
        println!();
        print_message(&message);
        crate::prompt();
    }

    pub fn list(&self, notifications: &[PriceDropNotification]) {
        if notifications.is_empty() {
            println!("No notifications");
            return;
        }
        for notification in notifications {
            println!("{}", describe(notification));
        }
    }
}

pub fn print_message(message: &ChatMessage) {
    let pending = if message.id.is_none() { " (unsent)" } else { "" };
    println!(
        "[{}] {}: {}{}",
        message.timestamp.format("%H:%M"),
        message.sender,
        message.message,
        pending
    );
}

fn describe(notification: &PriceDropNotification) -> String {
    match notification.kind {
        NotificationKind::PriceDrop => {
            let list = notification
                .wishlist_name
                .as_deref()
                .map(|name| format!(" [{}]", name))
                .unwrap_or_default();
            format!(
                "↓ {}: {:.2} → {:.2}{}",
                notification.product_name,
                notification.old_price,
                notification.new_price,
                list
            )
        }
        NotificationKind::CartPriceDrop => format!(
            "🛒 {}: {:.2} → {:.2}",
            notification.product_name, notification.old_price, notification.new_price
        ),
        NotificationKind::Chat => format!(
            "💬 {}: {}",
            notification.sender_name.as_deref().unwrap_or("Someone"),
            notification.product_name
        ),
    }
}
