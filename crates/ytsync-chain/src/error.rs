//! Chain and query-node error types.

use thiserror::Error;

/// Result type for runtime operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Result type for query-node operations.
pub type QueryNodeResult<T> = Result<T, QueryNodeError>;

/// Errors surfaced by the runtime client.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Chain API not connected: {0}")]
    ApiNotConnected(String),

    #[error("Application not found on chain: {0}")]
    AppNotFound(String),

    #[error("Extrinsic dispatch failed: {0}")]
    Failed(String),

    #[error("Signing cancelled")]
    SignCancelled,

    #[error("Finalized block is missing required event {0}")]
    MissingRequiredEvent(&'static str),

    #[error("Channel collaborator not found: {0}")]
    CollaboratorNotFound(String),

    #[error("Storage voucher size limit exceeded for channel {0}")]
    VoucherLimit(u64),

    #[error("Unknown chain error: {0}")]
    Unknown(String),
}

impl ChainError {
    /// Retryable without touching video state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::ApiNotConnected(_) | ChainError::SignCancelled)
    }
}

/// Errors surfaced by the read-model client.
#[derive(Debug, Error)]
pub enum QueryNodeError {
    #[error("Query node not connected: {0}")]
    NotConnected(String),

    #[error("Query node state is behind the chain: {0}")]
    OutdatedState(String),

    #[error("Unexpected query response: {0}")]
    BadResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl QueryNodeError {
    pub fn bad_response(msg: impl Into<String>) -> Self {
        Self::BadResponse(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryNodeError::NotConnected(_)
                | QueryNodeError::Network(_)
                | QueryNodeError::OutdatedState(_)
        )
    }
}
