//! Storage-node error types.

use thiserror::Error;

/// Result type for storage-node operations.
pub type StorageNodeResult<T> = Result<T, StorageNodeError>;

#[derive(Debug, Error)]
pub enum StorageNodeError {
    #[error("No active storage provider for bag {0}")]
    NoActiveStorageProvider(String),

    #[error("Upload rejected with status {status}: {message}")]
    UploadRejected { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageNodeError {
    /// Failures that should fail over to the next candidate bucket.
    pub fn is_failover(&self) -> bool {
        matches!(
            self,
            StorageNodeError::UploadRejected { .. }
                | StorageNodeError::Network(_)
                | StorageNodeError::Io(_)
        )
    }
}
