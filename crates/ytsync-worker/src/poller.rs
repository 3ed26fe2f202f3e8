//! Metadata poller: reconciles upstream channel uploads into the store.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use ytsync_models::{SuspensionReason, VideoState, YtChannel, YtVideo};
use ytsync_youtube::{RemoteVideo, YoutubeError};

use crate::context::{SyncContext, VideoKey};
use crate::error::SyncResult;
use crate::registry::CreatorRegistry;

/// Per-cycle metadata ingestion for every eligible channel.
pub struct MetadataPoller {
    ctx: Arc<SyncContext>,
    registry: CreatorRegistry,
    downloads: mpsc::Sender<VideoKey>,
}

impl MetadataPoller {
    pub fn new(ctx: Arc<SyncContext>, downloads: mpsc::Sender<VideoKey>) -> Self {
        let registry = CreatorRegistry::new(ctx.channels.clone());
        Self {
            ctx,
            registry,
            downloads,
        }
    }

    /// One poll cycle over the eligible channels.
    ///
    /// Channel fan-out is bounded by `intervals.youtubePollingFanout`; a
    /// quota refusal aborts the remainder of the cycle but never the
    /// process.
    pub async fn run_cycle(&self) -> SyncResult<()> {
        let channels = self.registry.next_cycle().await?;
        if channels.is_empty() {
            debug!("No eligible channels this cycle");
            return Ok(());
        }
        info!(channels = channels.len(), "Starting metadata poll cycle");

        let fanout = self.ctx.config.intervals.youtube_polling_fanout.max(1);
        let semaphore = Arc::new(Semaphore::new(fanout));
        let mut pending = channels.into_iter();
        let mut join: JoinSet<SyncResult<()>> = JoinSet::new();
        let mut quota_exhausted = false;

        loop {
            // Admit work up to the fan-out bound, unless the pool ran dry.
            while !quota_exhausted && join.len() < fanout {
                let Some(channel) = pending.next() else {
                    break;
                };
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("poller semaphore closed");
                let ctx = self.ctx.clone();
                let downloads = self.downloads.clone();
                join.spawn(async move {
                    let _permit = permit;
                    poll_channel(&ctx, channel, &downloads).await
                });
            }

            match join.join_next().await {
                None => break,
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) if e.is_quota_exhaustion() => {
                    warn!("Aborting metadata cycle: {e}");
                    quota_exhausted = true;
                }
                Some(Ok(Err(e))) => warn!("Channel poll failed: {e}"),
                Some(Err(e)) if e.is_cancelled() => {}
                Some(Err(e)) => error!("Channel poll panicked: {e}"),
            }
        }

        if quota_exhausted {
            info!("Metadata cycle ended early on quota exhaustion");
        }
        Ok(())
    }
}

/// Poll one channel's uploads and reconcile them into the store.
async fn poll_channel(
    ctx: &SyncContext,
    mut channel: YtChannel,
    downloads: &mpsc::Sender<VideoKey>,
) -> SyncResult<()> {
    let remote_videos = match ctx.youtube.uploads(&channel).await {
        Ok(videos) => videos,
        Err(e) if e.is_auth_failure() => {
            warn!(channel_id = %channel.id, "Authorization failed, suspending channel: {e}");
            channel.suspend(SuspensionReason::AuthFailed);
            ctx.channels.save(&channel).await?;
            return Ok(());
        }
        Err(e @ YoutubeError::QuotaLimitExceeded(_)) => return Err(e.into()),
        Err(e) => {
            warn!(channel_id = %channel.id, "Skipping channel this cycle: {e}");
            return Ok(());
        }
    };

    let mut inserted = 0usize;
    let mut refreshed = 0usize;
    for remote in &remote_videos {
        match ctx.videos.get(&channel.id, &remote.id).await? {
            None => {
                let video = new_video(&channel, remote);
                ctx.videos.save(&video).await?;
                inserted += 1;
                if video.passes_download_filter() {
                    // Best effort; the downloader sweep picks up drops.
                    let _ = downloads.try_send(VideoKey::new(&channel.id, &video.id));
                }
            }
            Some(existing) => {
                if let Some(updated) = refresh_video(existing, remote) {
                    ctx.videos.save(&updated).await?;
                    refreshed += 1;
                }
            }
        }
    }

    info!(
        channel_id = %channel.id,
        upstream = remote_videos.len(),
        inserted,
        refreshed,
        "Channel reconciled"
    );
    Ok(())
}

/// Build the initial record for a newly discovered upstream video.
fn new_video(channel: &YtChannel, remote: &RemoteVideo) -> YtVideo {
    let now = Utc::now();
    YtVideo {
        channel_id: channel.id.clone(),
        id: remote.id.clone(),
        title: remote.title.clone(),
        description: remote.description.clone(),
        duration: remote.duration,
        thumbnails: remote.thumbnails.clone(),
        published_at: remote.published_at,
        upload_status: remote.upload_status.clone(),
        privacy_status: remote.privacy_status,
        live_broadcast_content: remote.live_broadcast_content,
        license: remote.license,
        container: remote.container.clone(),
        view_count: remote.view_count,
        joystream_channel_id: channel.joystream_channel_id,
        category: remote
            .category_id
            .clone()
            .or_else(|| channel.video_category_id.clone())
            .unwrap_or_default(),
        language: remote.language.clone().or_else(|| channel.language.clone()),
        media_size: None,
        state: VideoState::New,
        joystream_video: None,
        created_at: now,
        updated_at: now,
    }
}

/// Refresh mutable attributes of an existing record.
///
/// Never regresses lifecycle state. When the upstream reports the video as
/// no longer publicly available, the record moves to `VideoUnavailable`
/// where the graph allows it (states without an on-chain record).
fn refresh_video(mut existing: YtVideo, remote: &RemoteVideo) -> Option<YtVideo> {
    if existing.state.is_terminal() {
        return None;
    }

    let mut changed = false;
    if existing.title != remote.title {
        existing.title = remote.title.clone();
        changed = true;
    }
    if existing.description != remote.description {
        existing.description = remote.description.clone();
        changed = true;
    }
    if existing.view_count != remote.view_count {
        existing.view_count = remote.view_count;
        changed = true;
    }
    if existing.privacy_status != remote.privacy_status {
        existing.privacy_status = remote.privacy_status;
        changed = true;
    }
    if existing.upload_status != remote.upload_status {
        existing.upload_status = remote.upload_status.clone();
        changed = true;
    }
    if existing.live_broadcast_content != remote.live_broadcast_content {
        existing.live_broadcast_content = remote.live_broadcast_content;
        changed = true;
    }

    let gone_upstream = remote.privacy_status == ytsync_models::PrivacyStatus::Private
        || matches!(remote.upload_status.as_str(), "rejected" | "deleted" | "failed");
    if gone_upstream && existing.state.can_transition_to(VideoState::VideoUnavailable) {
        existing
            .transition_to(VideoState::VideoUnavailable)
            .expect("checked edge");
        changed = true;
    }

    changed.then_some(existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ytsync_models::{LiveBroadcastContent, PrivacyStatus, Thumbnails, VideoLicense};

    fn remote(id: &str) -> RemoteVideo {
        RemoteVideo {
            id: id.to_string(),
            title: "Title".to_string(),
            description: "Desc".to_string(),
            duration: 100,
            thumbnails: Thumbnails::default(),
            thumbnail_url: None,
            published_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            upload_status: "processed".to_string(),
            privacy_status: PrivacyStatus::Public,
            live_broadcast_content: LiveBroadcastContent::None,
            license: VideoLicense::Youtube,
            view_count: 5,
            container: "mp4".to_string(),
            language: None,
            category_id: Some("22".to_string()),
        }
    }

    fn channel() -> YtChannel {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        YtChannel {
            user_id: "user-1".to_string(),
            id: "UCabc".to_string(),
            title: "Channel".to_string(),
            description: String::new(),
            thumbnails: Thumbnails::default(),
            user_access_token: "at".to_string(),
            user_refresh_token: "rt".to_string(),
            uploads_playlist_id: "UUabc".to_string(),
            joystream_channel_id: 7,
            referrer_channel_id: None,
            language: Some("en".to_string()),
            video_category_id: Some("10".to_string()),
            should_be_ingested: true,
            allow_operator_ingestion: true,
            perform_unauthorized_sync: false,
            ypp_status: ytsync_models::YppStatus::Verified(ytsync_models::VerifiedTier::Bronze),
            historical_video_synced_size: 0,
            last_acted_at: t,
            phantom_key: "phantomData".to_string(),
            created_at: t,
            updated_at: t,
        }
    }

    #[test]
    fn test_new_video_synthesizes_category_and_language() {
        let video = new_video(&channel(), &remote("vid-1"));
        assert_eq!(video.state, VideoState::New);
        assert_eq!(video.joystream_channel_id, 7);
        // Upstream category wins over the channel default.
        assert_eq!(video.category, "22");
        assert_eq!(video.language.as_deref(), Some("en"));
        assert!(video.joystream_video.is_none());

        let mut bare = remote("vid-2");
        bare.category_id = None;
        let video = new_video(&channel(), &bare);
        assert_eq!(video.category, "10");
    }

    #[test]
    fn test_refresh_updates_mutables_without_state_change() {
        let existing = new_video(&channel(), &remote("vid-1"));
        let mut newer = remote("vid-1");
        newer.title = "Renamed".to_string();
        newer.view_count = 999;

        let updated = refresh_video(existing, &newer).unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.view_count, 999);
        assert_eq!(updated.state, VideoState::New);
    }

    #[test]
    fn test_refresh_unchanged_is_noop() {
        let existing = new_video(&channel(), &remote("vid-1"));
        assert!(refresh_video(existing, &remote("vid-1")).is_none());
    }

    #[test]
    fn test_refresh_marks_gone_videos_unavailable() {
        let existing = new_video(&channel(), &remote("vid-1"));
        let mut gone = remote("vid-1");
        gone.privacy_status = PrivacyStatus::Private;

        let updated = refresh_video(existing, &gone).unwrap();
        assert_eq!(updated.state, VideoState::VideoUnavailable);
    }

    #[test]
    fn test_refresh_never_touches_terminal_records() {
        let mut existing = new_video(&channel(), &remote("vid-1"));
        existing.state = VideoState::VideoUnavailable;
        let mut newer = remote("vid-1");
        newer.title = "Renamed".to_string();
        assert!(refresh_video(existing, &newer).is_none());
    }
}
