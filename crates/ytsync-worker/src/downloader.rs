//! Download worker: stages media bytes into the local asset directory.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use ytsync_models::{VideoState, YtVideo};

use crate::context::{KeyedLock, SyncContext, VideoKey};
use crate::error::SyncResult;
use crate::retry::BackoffTracker;

/// Cool-down bounds for transiently failing downloads.
const BACKOFF_BASE: Duration = Duration::from_secs(60);
const BACKOFF_MAX: Duration = Duration::from_secs(3_600);

/// Drains unsynced videos and stages their bytes locally.
pub struct Downloader {
    ctx: Arc<SyncContext>,
    creations: mpsc::Sender<VideoKey>,
    uploads: mpsc::Sender<VideoKey>,
    channel_locks: Arc<KeyedLock>,
    backoff: Arc<Mutex<BackoffTracker>>,
}

impl Downloader {
    pub fn new(
        ctx: Arc<SyncContext>,
        creations: mpsc::Sender<VideoKey>,
        uploads: mpsc::Sender<VideoKey>,
    ) -> Self {
        Self {
            ctx,
            creations,
            uploads,
            channel_locks: Arc::new(KeyedLock::new()),
            backoff: Arc::new(Mutex::new(BackoffTracker::new(BACKOFF_BASE, BACKOFF_MAX))),
        }
    }

    /// Sweep the store's unsynced set and stage whatever is due.
    pub async fn run_cycle(&self) -> SyncResult<()> {
        let unsynced = self.ctx.videos.unsynced().await?;
        if unsynced.is_empty() {
            return Ok(());
        }
        debug!(count = unsynced.len(), "Download sweep");

        let parallelism = self.ctx.config.limits.max_concurrent_downloads.max(1);
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut join: JoinSet<()> = JoinSet::new();

        for video in unsynced {
            let key = VideoKey::new(&video.channel_id, &video.id);
            if !self.backoff.lock().expect("backoff poisoned").is_due(&key.to_string()) {
                continue;
            }
            if !self.ctx.disk.can_admit() {
                warn!(used = self.ctx.disk.used(), "Disk budget reached, pausing admissions");
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("download semaphore closed");
            let this = self.clone_handles();
            join.spawn(async move {
                let _permit = permit;
                if let Err(e) = this.download_one(&key).await {
                    error!(video = %key, "Download task failed: {e}");
                }
            });
        }

        while join.join_next().await.is_some() {}
        Ok(())
    }

    /// Queue entry point: stage one video now.
    pub async fn handle_key(&self, key: VideoKey) {
        if let Err(e) = self.download_one(&key).await {
            error!(video = %key, "Download task failed: {e}");
        }
    }

    fn clone_handles(&self) -> DownloadTask {
        DownloadTask {
            ctx: self.ctx.clone(),
            creations: self.creations.clone(),
            uploads: self.uploads.clone(),
            channel_locks: self.channel_locks.clone(),
            backoff: self.backoff.clone(),
        }
    }

    async fn download_one(&self, key: &VideoKey) -> SyncResult<()> {
        self.clone_handles().download_one(key).await
    }
}

/// The per-task view of the downloader's shared handles.
struct DownloadTask {
    ctx: Arc<SyncContext>,
    creations: mpsc::Sender<VideoKey>,
    uploads: mpsc::Sender<VideoKey>,
    channel_locks: Arc<KeyedLock>,
    backoff: Arc<Mutex<BackoffTracker>>,
}

impl DownloadTask {
    async fn download_one(&self, key: &VideoKey) -> SyncResult<()> {
        // One download at a time per channel keeps per-channel ordering.
        let _channel_section = self.channel_locks.acquire(&key.channel_id).await;

        // Authoritative re-read; the queued key may be stale.
        let Some(mut video) = self.ctx.videos.get(&key.channel_id, &key.video_id).await? else {
            return Ok(());
        };
        if !matches!(
            video.state,
            VideoState::New | VideoState::VideoCreationFailed | VideoState::UploadFailed
        ) {
            return Ok(());
        }
        if video.state == VideoState::New && !video.passes_download_filter() {
            return Ok(());
        }

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

        if let Some(max_duration) = self.ctx.config.limits.max_video_duration_sec {
            if video.duration > max_duration {
                info!(video = %key, duration = video.duration, "Video exceeds duration limit");
                return self.mark_unavailable(video).await;
            }
        }

        let asset_dir = self.ctx.asset_dir();
        let staged = match self.ctx.fetcher.fetch_media(&video, &asset_dir).await {
            Ok(staged) => staged,
            Err(e) => return self.handle_fetch_error(video, key, e).await,
        };
        if let Err(e) = self.ctx.fetcher.fetch_thumbnail(&video, &asset_dir).await {
            return self.handle_fetch_error(video, key, e).await;
        }

        if let Some(max_mb) = self.ctx.config.limits.max_video_size_mb {
            if staged.size > max_mb * 1024 * 1024 {
                info!(video = %key, size = staged.size, "Video exceeds size limit");
                tokio::fs::remove_file(&staged.path).await.ok();
                return self.mark_unavailable(video).await;
            }
        }

        let previously_staged = video.media_size.is_some();
        video.media_size = Some(staged.size);
        self.ctx.videos.save(&video).await?;
        if !previously_staged {
            self.ctx.disk.add(staged.size);
        }
        self.backoff
            .lock()
            .expect("backoff poisoned")
            .clear(&key.to_string());

        info!(video = %key, size = staged.size, "Media staged");
        // Videos that already exist on chain go straight back to the
        // uploader; the rest await on-chain creation.
        let routed = if video.state == VideoState::UploadFailed {
            self.uploads.try_send(key.clone())
        } else {
            self.creations.try_send(key.clone())
        };
        if routed.is_err() {
            debug!(video = %key, "Stage queue full, sweep will pick the video up");
        }
        Ok(())
    }

    async fn handle_fetch_error(
        &self,
        video: YtVideo,
        key: &VideoKey,
        error: ytsync_youtube::YoutubeError,
    ) -> SyncResult<()> {
        if error.is_video_terminal() {
            warn!(video = %key, "Media gone upstream: {error}");
            return self.mark_unavailable(video).await;
        }
        warn!(video = %key, "Transient download failure: {error}");
        self.backoff
            .lock()
            .expect("backoff poisoned")
            .note_failure(&key.to_string());
        Ok(())
    }

    /// Sink the video where the lifecycle graph allows it. Videos that
    /// already carry an on-chain record keep their state and simply retry
    /// later.
    async fn mark_unavailable(&self, mut video: YtVideo) -> SyncResult<()> {
        let key = VideoKey::new(&video.channel_id, &video.id);
        if video.state.can_transition_to(VideoState::VideoUnavailable) {
            video.transition_to(VideoState::VideoUnavailable)?;
            self.ctx.videos.save(&video).await?;
            self.backoff
                .lock()
                .expect("backoff poisoned")
                .clear(&key.to_string());
        } else {
            warn!(video = %key, state = %video.state, "Upstream gone for on-chain video");
            self.backoff
                .lock()
                .expect("backoff poisoned")
                .note_failure(&key.to_string());
        }
        Ok(())
    }
}
