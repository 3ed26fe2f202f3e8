//! Channel synchronization engine.
//!
//! This crate hosts the pipeline that mirrors enrolled channels on chain:
//! - quota accounting over the external metadata API
//! - the creator registry view and metadata poller
//! - the download, on-chain creation and upload stages
//! - the orchestrator owning schedules and graceful shutdown

pub mod config;
pub mod context;
pub mod creator;
pub mod downloader;
pub mod error;
pub mod orchestrator;
pub mod poller;
pub mod quota;
pub mod registry;
pub mod retry;
pub mod uploader;

pub use config::SyncConfig;
pub use context::{DiskBudget, KeyedLock, SyncContext, VideoKey};
pub use creator::ChainCreator;
pub use downloader::Downloader;
pub use error::{SyncError, SyncResult};
pub use orchestrator::Orchestrator;
pub use poller::MetadataPoller;
pub use quota::{QuotaAccountant, SyncQuotaSink, SIGNUP_POOL, SYNC_POOL};
pub use registry::CreatorRegistry;
pub use retry::{retry_async, BackoffTracker, RetryConfig};
pub use uploader::Uploader;
