//! Connector seam between the transport and a concrete push server

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::events::Frame;

/// An open link to the push server
///
/// Dropping `outbound` closes the link from the client side; the server
/// closing its side ends `inbound`.
pub struct PushLink {
    /// Server-assigned id of this connection
    pub session_id: String,
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

/// Opens links to a push server
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn open(&self) -> Result<PushLink, TransportError>;
}
