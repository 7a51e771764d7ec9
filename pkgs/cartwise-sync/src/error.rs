//! Error types for REST access and sync operations

use cartwise_store::StoreError;
use thiserror::Error;

/// Errors from the REST collaborator
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request to {url} failed with HTTP {status}")]
    Status { status: u16, url: String },
    #[error("Invalid response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),
    #[error("Cache error: {0}")]
    Store(#[from] StoreError),
    #[error("Message is empty")]
    EmptyMessage,
    #[error("No cart chat is open")]
    NoActiveCart,
    #[error("Operation abandoned, its scope has ended")]
    Cancelled,
}
