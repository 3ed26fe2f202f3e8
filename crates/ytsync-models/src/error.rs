//! Model error types.

use thiserror::Error;

use crate::video::VideoState;

/// Result type for model-level invariant checks.
pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid video state transition: {from} -> {to}")]
    InvalidTransition { from: VideoState, to: VideoState },

    #[error("Stale creator action: timestamp {submitted} does not exceed lastActedAt {recorded}")]
    StaleAction { submitted: String, recorded: String },

    #[error("State {0} requires an on-chain video record")]
    MissingOnChainRecord(VideoState),

    #[error("Unknown participation status: {0}")]
    UnknownStatus(String),
}
