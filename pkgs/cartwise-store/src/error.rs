//! Error types for cache operations

use sea_orm::DbErr;
use thiserror::Error;

/// Errors that can occur while reading or writing the durable cache
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid database path: {0}")]
    InvalidPath(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}
