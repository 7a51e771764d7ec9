use crate::display::{print_message, Display};
use cartwise_sync::{ClientSession, FetchOutcome, SyncError};
use chrono::Utc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

fn print_help() {
    println!("Commands:");
    println!("  /open <cart-id>   Open the chat of a cart");
    println!("  /close            Close the open chat");
    println!("  /refresh          Poll prices and reload the chat");
    println!("  /read             Mark the open cart's chat as read");
    println!("  /alerts           List visible price drops");
    println!("  /dismiss-all      Dismiss every price drop");
    println!("  /rooms            Show joined cart rooms");
    println!("  /quit             Exit");
    println!("Anything else is sent to the open chat.");
}

pub async fn handle_command(
    input: &str,
    session: &mut ClientSession,
    display: &mut Display,
) -> Flow {
    let (command, arg) = match input.split_once(' ') {
        Some((command, arg)) => (command, arg.trim()),
        None => (input, ""),
    };

    match command {
        "/quit" | "/exit" => return Flow::Quit,
        "/help" => print_help(),
        "/open" => {
            if arg.is_empty() {
                println!("Usage: /open <cart-id>");
            } else {
                let chat = session.open_chat(arg).await;
                display.show_history(arg, &chat.messages());
                if let Some(banner) = chat.error_banner() {
                    println!("⚠ {}", banner);
                }
            }
        }
        "/close" => session.close_chat(),
        "/refresh" => refresh(session, display).await,
        "/read" => match session.chat().and_then(|chat| chat.cart_id()) {
            Some(cart_id) => {
                session
                    .notifications()
                    .mark_cart_read(&cart_id, Utc::now())
                    .await;
                println!("Marked cart {} as read", cart_id);
            }
            None => println!("No chat open"),
        },
        "/alerts" => display.list(&session.price_drops().visible()),
        "/dismiss-all" => {
            let count = session.price_drops().dismiss_all().await;
            println!("Dismissed {} notifications", count);
        }
        "/rooms" => {
            let rooms = session.price_drops().joined_rooms();
            if rooms.is_empty() {
                println!("Not in any cart room");
            } else {
                println!("Joined: {}", rooms.join(", "));
            }
        }
        _ if command.starts_with('/') => {
            println!("Unknown command {}; try /help", command);
        }
        _ => send(input, session).await,
    }
    Flow::Continue
}

async fn refresh(session: &ClientSession, display: &mut Display) {
    let price_drops = session.price_drops();
    match price_drops.poll_since_last_check().await {
        Ok(added) => println!("{} new price drops", added),
        Err(e) => warn!("Price check failed: {}", e),
    }
    if let Err(e) = price_drops.check_carts().await {
        warn!("Cart check failed: {}", e);
    }

    if let Some(chat) = session.chat() {
        match chat.fetch_messages().await {
            FetchOutcome::Updated { .. } => {
                if let Some(cart_id) = chat.cart_id() {
                    display.show_history(&cart_id, &chat.messages());
                }
            }
            FetchOutcome::Failed { .. } => {
                if let Some(banner) = chat.error_banner() {
                    println!("⚠ {}", banner);
                } else {
                    println!("⚠ Could not reach the server, showing cached messages");
                }
            }
            FetchOutcome::NoUpdate | FetchOutcome::Abandoned => {}
        }
    }
    display.show_new_notifications(session);
}

async fn send(text: &str, session: &ClientSession) {
    let Some(chat) = session.chat() else {
        println!("Open a cart chat with /open <cart-id> first");
        return;
    };
    match chat.handle_send(text).await {
        Ok(outcome) => {
            print_message(&outcome.message);
            if !outcome.persisted {
                println!(
                    "⚠ Not saved on the server after {} attempts; kept locally",
                    outcome.attempts
                );
            }
        }
        Err(SyncError::EmptyMessage) => {}
        Err(e) => println!("⚠ {}", e),
    }
}
