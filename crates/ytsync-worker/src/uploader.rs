//! Uploader: ships staged assets to the storage fleet.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use ytsync_chain::QueryNodeError;
use ytsync_models::{VideoState, YtVideo};
use ytsync_storage::{rank, BucketCandidate};
use ytsync_youtube::{media_path, thumbnail_path};

use crate::context::{SyncContext, VideoKey};
use crate::error::SyncResult;
use crate::retry::{retry_async, BackoffTracker, RetryConfig};

const BACKOFF_BASE: Duration = Duration::from_secs(60);
const BACKOFF_MAX: Duration = Duration::from_secs(3_600);

/// Drains videos with on-chain records but pending bytes.
pub struct Uploader {
    ctx: Arc<SyncContext>,
    backoff: Arc<Mutex<BackoffTracker>>,
}

impl Uploader {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            ctx,
            backoff: Arc::new(Mutex::new(BackoffTracker::new(BACKOFF_BASE, BACKOFF_MAX))),
        }
    }

    /// Sweep the pending-upload set, failed uploads first.
    pub async fn run_cycle(&self) -> SyncResult<()> {
        let batch = self.ctx.config.limits.max_concurrent_uploads.max(1);
        let pending = self.ctx.videos.pending_uploads(batch).await?;
        if pending.is_empty() {
            return Ok(());
        }
        debug!(count = pending.len(), "Upload sweep");

        let semaphore = Arc::new(Semaphore::new(batch));
        let mut join: JoinSet<()> = JoinSet::new();
        for video in pending {
            let key = VideoKey::new(&video.channel_id, &video.id);
            if !self
                .backoff
                .lock()
                .expect("backoff poisoned")
                .is_due(&key.to_string())
            {
                continue;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("upload semaphore closed");
            let task = UploadTask {
                ctx: self.ctx.clone(),
                backoff: self.backoff.clone(),
            };
            join.spawn(async move {
                let _permit = permit;
                if let Err(e) = task.upload_one(&key).await {
                    error!(video = %key, "Upload task failed: {e}");
                }
            });
        }
        while join.join_next().await.is_some() {}
        Ok(())
    }

    /// Queue entry point: upload one video now.
    pub async fn handle_key(&self, key: VideoKey) {
        let task = UploadTask {
            ctx: self.ctx.clone(),
            backoff: self.backoff.clone(),
        };
        if let Err(e) = task.upload_one(&key).await {
            error!(video = %key, "Upload task failed: {e}");
        }
    }
}

struct UploadTask {
    ctx: Arc<SyncContext>,
    backoff: Arc<Mutex<BackoffTracker>>,
}

impl UploadTask {
    async fn upload_one(&self, key: &VideoKey) -> SyncResult<()> {
        let Some(mut video) = self.ctx.videos.get(&key.channel_id, &key.video_id).await? else {
            return Ok(());
        };
        if !matches!(
            video.state,
            VideoState::VideoCreated | VideoState::UploadFailed
        ) {
            return Ok(());
        }
        let Some(on_chain) = video.joystream_video.clone() else {
            error!(video = %key, state = %video.state, "Record in upload state without on-chain video");
            return Ok(());
        };

        let Some(channel) = self
            .ctx
            .channels
            .by_joystream_id(video.joystream_channel_id)
            .await?
        else {
            warn!(video = %key, "No channel record for video, skipping");
            return Ok(());
        };
        if !channel.is_sync_candidate() {
            debug!(video = %key, "Channel no longer a sync candidate");
            return Ok(());
        }

        // Bytes must be staged; a missing file sends the video back through
        // the downloader via the UploadFailed re-entry.
        let asset_dir = self.ctx.asset_dir();
        let media = media_path(&asset_dir, &video.id);
        let thumbnail = thumbnail_path(&asset_dir, &video.id);
        if tokio::fs::metadata(&media).await.is_err()
            || tokio::fs::metadata(&thumbnail).await.is_err()
        {
            debug!(video = %key, "Assets not staged, deferring to the downloader");
            return self.mark_failed(video, key).await;
        }

        let bag_id = format!("dynamic:channel:{}", video.joystream_channel_id);
        let retry = RetryConfig::new("buckets_for_bag").with_base_delay(Duration::from_millis(200));
        let buckets = retry_async(&retry, |e: &QueryNodeError| e.is_retryable(), || {
            self.ctx.query_node.buckets_for_bag(&bag_id)
        })
        .await?;

        let mut candidates: Vec<BucketCandidate> = buckets
            .into_iter()
            .map(|b| BucketCandidate {
                latency_ms: self.ctx.latency.get(&b.id),
                id: b.id,
                endpoint: b.endpoint,
                free_capacity: b.free_capacity,
                free_objects: b.free_objects,
            })
            .collect();
        rank(&mut candidates);

        if candidates.is_empty() {
            warn!(video = %key, bag = %bag_id, "No active storage provider");
            return self.mark_failed(video, key).await;
        }

        for bucket in &candidates {
            let media_upload = self
                .ctx
                .storage_nodes
                .upload_file(&bucket.endpoint, &bag_id, on_chain.media_object_id(), &media)
                .await;
            let pair = match media_upload {
                Ok(()) => {
                    self.ctx
                        .storage_nodes
                        .upload_file(
                            &bucket.endpoint,
                            &bag_id,
                            on_chain.thumbnail_object_id(),
                            &thumbnail,
                        )
                        .await
                }
                Err(e) => Err(e),
            };

            match pair {
                Ok(()) => {
                    return self.finish_success(video, key, &channel.user_id, &media, &thumbnail).await;
                }
                Err(e) => {
                    warn!(
                        video = %key,
                        bucket = %bucket.id,
                        "Bucket rejected upload, failing over: {e}"
                    );
                    self.ctx.latency.penalize(&bucket.id);
                }
            }
        }

        warn!(video = %key, "All candidate buckets exhausted");
        self.mark_failed(video, key).await
    }

    async fn finish_success(
        &self,
        mut video: YtVideo,
        key: &VideoKey,
        owner_user_id: &str,
        media: &std::path::Path,
        thumbnail: &std::path::Path,
    ) -> SyncResult<()> {
        let media_size = video.media_size.unwrap_or(0);
        video.transition_to(VideoState::UploadSucceeded)?;
        self.ctx.videos.save(&video).await?;

        // Historical videos count against the creator's synced-size
        // allowance.
        if let Some(mut channel) = self.ctx.channels.get(owner_user_id, &video.channel_id).await? {
            if video.is_historical(channel.created_at) {
                channel.add_historical_synced(media_size);
                self.ctx.channels.save(&channel).await?;
            }
        }

        // Staged bytes are no longer needed.
        tokio::fs::remove_file(media).await.ok();
        tokio::fs::remove_file(thumbnail).await.ok();
        self.ctx.disk.release(media_size);

        self.backoff
            .lock()
            .expect("backoff poisoned")
            .clear(&key.to_string());
        info!(video = %key, size = media_size, "Upload complete");
        Ok(())
    }

    async fn mark_failed(&self, mut video: YtVideo, key: &VideoKey) -> SyncResult<()> {
        if video.state != VideoState::UploadFailed {
            video.transition_to(VideoState::UploadFailed)?;
            self.ctx.videos.save(&video).await?;
        }
        self.backoff
            .lock()
            .expect("backoff poisoned")
            .note_failure(&key.to_string());
        Ok(())
    }
}
