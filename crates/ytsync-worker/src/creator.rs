//! On-chain creator: turns staged videos into chain records.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use ytsync_chain::{
    find_created_video, AssetSpec, ChainError, CreateVideoRequest, TxOutcome, VideoMeta,
};
use ytsync_models::{SuspensionReason, VideoState, YtChannel, YtVideo};
use ytsync_store::QueryOptions;
use ytsync_youtube::{media_path, thumbnail_path};

use crate::context::{SyncContext, VideoKey};
use crate::error::SyncResult;
use crate::retry::BackoffTracker;

const BACKOFF_BASE: Duration = Duration::from_secs(60);
const BACKOFF_MAX: Duration = Duration::from_secs(3_600);

/// A staged asset pair ready to attach to the extrinsic.
struct StagedAssets {
    media: (PathBuf, u64),
    thumbnail: (PathBuf, u64),
}

/// Issues `createVideo` for videos whose bytes are staged locally.
///
/// Submissions are driven one video at a time: the chain client serializes
/// per collaborator anyway, and sequential processing keeps per-channel
/// submission order intact.
pub struct ChainCreator {
    ctx: Arc<SyncContext>,
    uploads: mpsc::Sender<VideoKey>,
    /// Channels halted after a voucher-limit dispatch failure, until the
    /// next metadata refresh.
    halted: Mutex<HashSet<String>>,
    backoff: Mutex<BackoffTracker>,
}

impl ChainCreator {
    pub fn new(ctx: Arc<SyncContext>, uploads: mpsc::Sender<VideoKey>) -> Self {
        Self {
            ctx,
            uploads,
            halted: Mutex::new(HashSet::new()),
            backoff: Mutex::new(BackoffTracker::new(BACKOFF_BASE, BACKOFF_MAX)),
        }
    }

    /// Lift voucher halts; called when channel records get refreshed.
    pub fn clear_halts(&self) {
        self.halted.lock().expect("halt set poisoned").clear();
    }

    /// Sweep for staged videos awaiting an on-chain record.
    pub async fn run_cycle(&self) -> SyncResult<()> {
        let mut candidates = self
            .ctx
            .videos
            .by_state(VideoState::New, QueryOptions::default())
            .await?;
        candidates.extend(
            self.ctx
                .videos
                .by_state(VideoState::VideoCreationFailed, QueryOptions::default())
                .await?,
        );

        for video in candidates {
            let key = VideoKey::new(&video.channel_id, &video.id);
            if !self
                .backoff
                .lock()
                .expect("backoff poisoned")
                .is_due(&key.to_string())
            {
                continue;
            }
            if let Err(e) = self.create_one(&key).await {
                error!(video = %key, "Creation task failed: {e}");
            }
        }
        Ok(())
    }

    /// Queue entry point: create one video now.
    pub async fn handle_key(&self, key: VideoKey) {
        if let Err(e) = self.create_one(&key).await {
            error!(video = %key, "Creation task failed: {e}");
        }
    }

    async fn create_one(&self, key: &VideoKey) -> SyncResult<()> {
        // Authoritative re-read; queue messages carry only the key.
        let Some(mut video) = self.ctx.videos.get(&key.channel_id, &key.video_id).await? else {
            return Ok(());
        };
        if !matches!(
            video.state,
            VideoState::New | VideoState::VideoCreationFailed
        ) {
            return Ok(());
        }
        if self
            .halted
            .lock()
            .expect("halt set poisoned")
            .contains(&video.channel_id)
        {
            debug!(video = %key, "Channel halted on voucher limit");
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

        let Some(assets) = self.staged_assets(&video).await else {
            debug!(video = %key, "Assets not staged yet");
            return Ok(());
        };

        let request = build_request(&self.ctx, &channel, &video, &assets);
        let outcome = match self.ctx.chain.create_video(&request).await {
            Ok(outcome) => outcome,
            Err(ChainError::CollaboratorNotFound(details)) => {
                // Terminal for the channel: nothing can be signed for it.
                warn!(channel_id = %channel.id, "Suspending channel: {details}");
                let mut channel = channel;
                channel.suspend(SuspensionReason::CollaboratorMissing);
                self.ctx.channels.save(&channel).await?;
                return Ok(());
            }
            Err(e) if e.is_retryable() => {
                warn!(video = %key, "Submission retryable: {e}");
                self.note_failure(key);
                return Ok(());
            }
            Err(e) => {
                error!(video = %key, "Submission failed: {e}");
                video.transition_to(VideoState::VideoCreationFailed)?;
                self.ctx.videos.save(&video).await?;
                self.note_failure(key);
                return Ok(());
            }
        };

        match outcome {
            TxOutcome::Finalized { events } => match find_created_video(&events) {
                Some(on_chain) => {
                    info!(
                        video = %key,
                        joystream_video_id = on_chain.id,
                        "Video created on chain"
                    );
                    video.set_created(on_chain)?;
                    self.ctx.videos.save(&video).await?;
                    self.backoff
                        .lock()
                        .expect("backoff poisoned")
                        .clear(&key.to_string());
                    let _ = self.uploads.try_send(key.clone());
                }
                None => {
                    let missing = ChainError::MissingRequiredEvent("VideoCreated");
                    error!(video = %key, "Finalized without required events: {missing}");
                    video.transition_to(VideoState::VideoCreationFailed)?;
                    self.ctx.videos.save(&video).await?;
                    self.note_failure(key);
                }
            },
            outcome @ TxOutcome::Failed { .. } if outcome.is_voucher_limit() => {
                warn!(
                    channel_id = %video.channel_id,
                    "Voucher size limit reached, halting channel until next refresh"
                );
                self.halted
                    .lock()
                    .expect("halt set poisoned")
                    .insert(video.channel_id.clone());
            }
            TxOutcome::Failed { message, .. } => {
                error!(video = %key, "Dispatch failed: {message}");
                video.transition_to(VideoState::VideoCreationFailed)?;
                self.ctx.videos.save(&video).await?;
                self.note_failure(key);
            }
            TxOutcome::Rejected => {
                warn!(video = %key, "Submission rejected by the pool, will retry");
                self.note_failure(key);
            }
        }
        Ok(())
    }

    fn note_failure(&self, key: &VideoKey) {
        self.backoff
            .lock()
            .expect("backoff poisoned")
            .note_failure(&key.to_string());
    }

    /// Both assets staged and non-empty, or nothing.
    async fn staged_assets(&self, video: &YtVideo) -> Option<StagedAssets> {
        let dir = self.ctx.asset_dir();
        let media = media_path(&dir, &video.id);
        let thumbnail = thumbnail_path(&dir, &video.id);

        let media_size = tokio::fs::metadata(&media).await.ok()?.len();
        let thumbnail_size = tokio::fs::metadata(&thumbnail).await.ok()?.len();
        if media_size == 0 || thumbnail_size == 0 {
            return None;
        }
        Some(StagedAssets {
            media: (media, media_size),
            thumbnail: (thumbnail, thumbnail_size),
        })
    }
}

fn build_request(
    ctx: &SyncContext,
    channel: &YtChannel,
    video: &YtVideo,
    assets: &StagedAssets,
) -> CreateVideoRequest {
    CreateVideoRequest {
        channel_id: video.joystream_channel_id,
        collaborator_member_id: ctx.config.joystream.channel_collaborator.member_id.clone(),
        meta: VideoMeta {
            title: video.title.clone(),
            description: video.description.clone(),
            category: video.category.clone(),
            language: video.language.clone(),
            duration: video.duration,
            published_before_joystream: video
                .is_historical(channel.created_at)
                .then_some(video.published_at),
        },
        media: AssetSpec {
            size: assets.media.1,
            source: assets.media.0.clone(),
        },
        thumbnail: AssetSpec {
            size: assets.thumbnail.1,
            source: assets.thumbnail.0.clone(),
        },
    }
}
