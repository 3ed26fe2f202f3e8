//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// Transport problems of any shape collapse into the single `NotConnected`
/// kind; everything else propagates unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store not connected: {0}")]
    NotConnected(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown index {index} on table {table}")]
    UnknownIndex { table: String, index: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::NotConnected(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::NotConnected(_))
    }
}
