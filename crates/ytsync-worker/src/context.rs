//! Shared service handles and small shared resources.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tracing::info;

use ytsync_chain::{ChainOps, QueryNodeApi};
use ytsync_storage::{LatencyBook, StorageNodeOps};
use ytsync_store::{ChannelsRepository, VideosRepository, WhitelistRepository};
use ytsync_youtube::{MediaFetcher, YoutubeApi};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::quota::QuotaAccountant;

/// Primary key of a video, the only payload carried on the stage queues.
/// Workers re-read the authoritative record at the head of every step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoKey {
    pub channel_id: String,
    pub video_id: String,
}

impl VideoKey {
    pub fn new(channel_id: impl Into<String>, video_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            video_id: video_id.into(),
        }
    }
}

impl std::fmt::Display for VideoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.video_id)
    }
}

/// Every owned service handle the stages share, threaded through
/// constructors instead of living as process-wide singletons.
pub struct SyncContext {
    pub config: SyncConfig,
    pub channels: Arc<ChannelsRepository>,
    pub videos: Arc<VideosRepository>,
    pub whitelist: Arc<WhitelistRepository>,
    pub quota: Arc<QuotaAccountant>,
    pub youtube: Arc<dyn YoutubeApi>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub chain: Arc<dyn ChainOps>,
    pub query_node: Arc<dyn QueryNodeApi>,
    pub storage_nodes: Arc<dyn StorageNodeOps>,
    pub latency: Arc<LatencyBook>,
    pub disk: Arc<DiskBudget>,
}

impl SyncContext {
    pub fn asset_dir(&self) -> PathBuf {
        self.config.asset_dir()
    }
}

/// Byte budget for the local asset directory, guarded by one critical
/// section.
#[derive(Debug)]
pub struct DiskBudget {
    limit: u64,
    used: Mutex<u64>,
}

impl DiskBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: Mutex::new(0),
        }
    }

    /// Build a budget seeded with the bytes already staged under `dir`.
    pub async fn with_usage_from_dir(limit: u64, dir: &Path) -> SyncResult<Self> {
        let mut used = 0u64;
        if dir.exists() {
            let mut entries = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if let Ok(metadata) = entry.metadata().await {
                    if metadata.is_file() {
                        used += metadata.len();
                    }
                }
            }
        }
        info!(used, limit, "Asset directory usage at startup");
        Ok(Self {
            limit,
            used: Mutex::new(used),
        })
    }

    /// Whether new downloads may be admitted.
    pub fn can_admit(&self) -> bool {
        *self.used.lock().expect("disk budget poisoned") < self.limit
    }

    pub fn add(&self, bytes: u64) {
        let mut used = self.used.lock().expect("disk budget poisoned");
        *used += bytes;
    }

    pub fn release(&self, bytes: u64) {
        let mut used = self.used.lock().expect("disk budget poisoned");
        *used = used.saturating_sub(bytes);
    }

    pub fn used(&self) -> u64 {
        *self.used.lock().expect("disk budget poisoned")
    }
}

/// One exclusive section per key.
///
/// The downloader holds a channel's section across each video fetch, which
/// keeps per-channel downloads sequential and their store writes in order.
#[derive(Default)]
pub struct KeyedLock {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut inner = self.inner.lock().expect("keyed lock poisoned");
            inner
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_budget_accounting() {
        let budget = DiskBudget::new(100);
        assert!(budget.can_admit());

        budget.add(60);
        assert!(budget.can_admit());
        budget.add(40);
        assert!(!budget.can_admit());

        budget.release(1);
        assert!(budget.can_admit());
        budget.release(1_000);
        assert_eq!(budget.used(), 0);
    }

    #[tokio::test]
    async fn test_disk_budget_seeded_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.mp4"), vec![0u8; 30])
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("b.jpg"), vec![0u8; 12])
            .await
            .unwrap();

        let budget = DiskBudget::with_usage_from_dir(100, dir.path()).await.unwrap();
        assert_eq!(budget.used(), 42);
    }
}
