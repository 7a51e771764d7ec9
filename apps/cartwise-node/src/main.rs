use anyhow::Context;
use cartwise_store::{CacheConfig, LocalCache, SqliteBackend};
use cartwise_sync::{ClientSession, HttpApi, HttpApiConfig, SyncConfig, UserIdentity};
use cartwise_transport::{
    EventKind, MemoryHub, PushConnector, PushEvent, Transport, TransportConfig, WsConnector,
};
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod display;

use commands::{handle_command, Flow};
use display::Display;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API root
    #[arg(long, env = "CARTWISE_API_URL", default_value = "http://localhost:5000/api")]
    api_url: String,

    /// Push server WebSocket URL
    #[arg(long, env = "CARTWISE_PUSH_URL", default_value = "ws://localhost:5000/ws")]
    push_url: String,

    /// SQLite file for the local cache
    #[arg(long, env = "CARTWISE_DB", default_value = "cartwise-cache.db")]
    db: PathBuf,

    /// Signed-in user id
    #[arg(short, long, env = "CARTWISE_USER_ID")]
    user_id: String,

    /// Name shown to other cart members
    #[arg(short, long, env = "CARTWISE_DISPLAY_NAME")]
    display_name: String,

    /// Open the chat of this cart on start
    #[arg(short, long)]
    cart: Option<String>,

    /// How often to poll for price changes
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5m")]
    poll_interval: Duration,

    /// Use an in-process push hub instead of the push server
    #[arg(long)]
    offline: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "cartwise=info")]
    log_level: String,
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn connector(args: &Args, config: &TransportConfig) -> anyhow::Result<Arc<dyn PushConnector>> {
    if args.offline {
        info!("Using in-process push hub");
        return Ok(Arc::new(MemoryHub::new().connector()));
    }
    let ws = WsConnector::new(&args.push_url, config.handshake_timeout)
        .with_context(|| format!("invalid push URL {}", args.push_url))?;
    Ok(Arc::new(ws))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let cache_config = CacheConfig {
        db_path: args.db.clone(),
        ..Default::default()
    };
    let backend = SqliteBackend::open(&cache_config)
        .await
        .with_context(|| format!("failed to open cache at {}", args.db.display()))?;
    let cache = LocalCache::with_capacity(Arc::new(backend), cache_config.change_capacity);

    let api = HttpApi::new(&HttpApiConfig {
        base_url: args.api_url.clone(),
        ..Default::default()
    })
    .context("failed to build API client")?;

    let transport_config = TransportConfig::default();
    let transport = Transport::new(connector(&args, &transport_config)?, transport_config);
    let mut feed = transport.subscribe(&[
        EventKind::ChatMessage,
        EventKind::Connected,
        EventKind::Disconnected,
    ]);

    let config = SyncConfig {
        poll_interval: args.poll_interval,
        ..Default::default()
    };
    let identity = UserIdentity::new(args.user_id.clone(), args.display_name.clone());
    println!("Signed in as {} ({})", identity.display_name, identity.user_id);

    let mut session =
        ClientSession::start(identity, transport.clone(), Arc::new(api), cache, config).await;
    let mut display = Display::default();

    if let Some(cart_id) = &args.cart {
        let chat = session.open_chat(cart_id).await;
        display.show_history(cart_id, &chat.messages());
    }
    display.show_new_notifications(&session);
    println!("Type a message, or /help for commands");
    prompt();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut refresh = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                info!("Interrupted, shutting down");
                break;
            }

            event = feed.recv() => match event {
                Some(PushEvent::ChatMessage(data)) => {
                    display.show_live_message(&session, &data);
                }
                Some(PushEvent::Connected { session_id }) => {
                    println!("\n✓ Connected ({})", session_id);
                    prompt();
                }
                Some(PushEvent::Disconnected { reason }) => {
                    println!("\n✗ Disconnected: {}", reason);
                    prompt();
                }
                Some(_) => {}
                None => break,
            },

            _ = refresh.tick() => {
                if display.show_new_notifications(&session) {
                    prompt();
                }
            }

            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                let input = line.trim();
                if input.is_empty() {
                    prompt();
                    continue;
                }
                if handle_command(input, &mut session, &mut display).await == Flow::Quit {
                    break;
                }
                prompt();
            }
        }
    }

    session.shutdown().await;
    println!("Goodbye");
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}
