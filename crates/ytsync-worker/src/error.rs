//! Engine error types.

use thiserror::Error;

use ytsync_chain::{ChainError, QueryNodeError};
use ytsync_models::ModelError;
use ytsync_storage::StorageNodeError;
use ytsync_store::StoreError;
use ytsync_youtube::YoutubeError;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Model invariant violated: {0}")]
    Model(#[from] ModelError),

    #[error("YouTube error: {0}")]
    Youtube(#[from] YoutubeError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Query node error: {0}")]
    QueryNode(#[from] QueryNodeError),

    #[error("Storage node error: {0}")]
    StorageNode(#[from] StorageNodeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Quota exhaustion aborts the current cycle for the affected pool.
    pub fn is_quota_exhaustion(&self) -> bool {
        matches!(self, SyncError::Youtube(YoutubeError::QuotaLimitExceeded(_)))
    }

    /// Transient errors the stage swallows with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(e) => e.is_retryable(),
            SyncError::Youtube(e) => e.is_retryable(),
            SyncError::Chain(e) => e.is_retryable(),
            SyncError::QueryNode(e) => e.is_retryable(),
            SyncError::StorageNode(e) => e.is_failover(),
            SyncError::Io(_) => true,
            _ => false,
        }
    }
}
