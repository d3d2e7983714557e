//! Error types shared across the ranking engine

use thiserror::Error;

/// Failure reading or writing one of the server-side stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Promotion weight outside 1..=10, rejected before it reaches the selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("promotion weight must be between 1 and 10, got {0}")]
pub struct InvalidPromotionWeight(pub i64);
