//! Error types for transport operations

use thiserror::Error;

/// Errors a connector can report while opening a link
///
/// These never escape [`crate::Transport`]; they are logged and retried.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
