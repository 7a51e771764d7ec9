//! WebSocket connector speaking JSON frames

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::connector::{PushConnector, PushLink};
use crate::error::TransportError;
use crate::events::{names, Frame};

/// Connects to a push server over WebSocket
///
/// The server is expected to greet with `{"event":"session","data":{"id":..}}`.
/// Without a greeting inside the handshake timeout a random session id is
/// used, and any non-greeting first frame is delivered normally.
pub struct WsConnector {
    url: Url,
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: &str, handshake_timeout: Duration) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self {
                url,
                handshake_timeout,
            }),
            other => Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {other}"
            ))),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

fn session_from_greeting(frame: &Frame) -> Option<String> {
    if frame.event != names::SESSION {
        return None;
    }
    frame
        .data
        .get("id")
        .and_then(|id| id.as_str())
        .map(str::to_string)
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn open(&self) -> Result<PushLink, TransportError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let mut pending = None;
        let session_id = match tokio::time::timeout(self.handshake_timeout, source.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let frame: Frame = serde_json::from_str(text.as_str())?;
                match session_from_greeting(&frame) {
                    Some(id) => id,
                    None => {
                        pending = Some(frame);
                        uuid::Uuid::new_v4().to_string()
                    }
                }
            }
            Ok(Some(Err(e))) => return Err(TransportError::Handshake(e.to_string())),
            Ok(None) => {
                return Err(TransportError::Handshake(
                    "connection closed during handshake".to_string(),
                ))
            }
            Ok(Some(Ok(_))) | Err(_) => {
                debug!("No session greeting, generating a session id");
                uuid::Uuid::new_v4().to_string()
            }
        };

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<Frame>();

        if let Some(frame) = pending {
            let _ = inbound_tx.send(frame);
        }

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode {} frame: {}", frame.event, e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(text)).await {
                    warn!("WebSocket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(text.as_str()) {
                        Ok(frame) => {
                            if inbound_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("Ignoring malformed frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(PushLink {
            session_id,
            outbound,
            inbound,
        })
    }
}
