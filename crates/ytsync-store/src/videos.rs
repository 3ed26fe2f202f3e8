//! Video repository.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

use ytsync_models::{VideoState, YtVideo};

use crate::backend::{ItemKey, QueryOptions, TableBackend, VIDEOS_BY_STATE, VIDEOS_TABLE};
use crate::error::StoreResult;

/// Repository for video records.
///
/// Writers on the videos table share one critical section, so per-video
/// state transitions are totally ordered. Compound list reads (the unsynced
/// and pending-upload sets) are taken under the same section and therefore
/// observe a consistent snapshot.
pub struct VideosRepository {
    backend: Arc<dyn TableBackend>,
    table_lock: Mutex<()>,
}

fn key_of(video: &YtVideo) -> ItemKey {
    ItemKey::composite(&video.channel_id, &video.id)
}

impl VideosRepository {
    pub fn new(backend: Arc<dyn TableBackend>) -> Self {
        Self {
            backend,
            table_lock: Mutex::new(()),
        }
    }

    /// Point lookup by `(channelId, videoId)`.
    pub async fn get(&self, channel_id: &str, video_id: &str) -> StoreResult<Option<YtVideo>> {
        let _guard = self.table_lock.lock().await;
        let item = self
            .backend
            .get(VIDEOS_TABLE, &ItemKey::composite(channel_id, video_id))
            .await?;
        item.map(|v| serde_json::from_value(v).map_err(Into::into))
            .transpose()
    }

    /// Upsert a video. The store stamps `updatedAt` on every write.
    pub async fn save(&self, video: &YtVideo) -> StoreResult<()> {
        let mut stored = video.clone();
        stored.updated_at = Utc::now();

        let _guard = self.table_lock.lock().await;
        self.backend
            .put(VIDEOS_TABLE, &key_of(&stored), serde_json::to_value(&stored)?)
            .await?;
        debug!(video_id = %stored.id, state = %stored.state, "Saved video");
        Ok(())
    }

    /// Best-effort bulk upsert.
    pub async fn batch_save(&self, videos: &[YtVideo]) -> StoreResult<()> {
        let now = Utc::now();
        let items = videos
            .iter()
            .map(|v| {
                let mut stored = v.clone();
                stored.updated_at = now;
                Ok((key_of(&stored), serde_json::to_value(&stored)?))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let _guard = self.table_lock.lock().await;
        self.backend.batch_put(VIDEOS_TABLE, items).await
    }

    /// Videos in one state, ordered by `updatedAt`.
    pub async fn by_state(&self, state: VideoState, opts: QueryOptions) -> StoreResult<Vec<YtVideo>> {
        let _guard = self.table_lock.lock().await;
        self.by_state_locked(state, opts).await
    }

    async fn by_state_locked(
        &self,
        state: VideoState,
        opts: QueryOptions,
    ) -> StoreResult<Vec<YtVideo>> {
        let items = self
            .backend
            .query_index(VIDEOS_TABLE, VIDEOS_BY_STATE, &json!(state.as_str()), opts)
            .await?;
        items
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }

    /// The download stage's input set, as one consistent snapshot:
    /// publishable `New` videos by `updatedAt` ascending, then videos whose
    /// on-chain creation failed, then videos whose upload failed.
    pub async fn unsynced(&self) -> StoreResult<Vec<YtVideo>> {
        let _guard = self.table_lock.lock().await;

        let mut videos: Vec<YtVideo> = self
            .by_state_locked(VideoState::New, QueryOptions::default())
            .await?
            .into_iter()
            .filter(YtVideo::passes_download_filter)
            .collect();
        videos.extend(
            self.by_state_locked(VideoState::VideoCreationFailed, QueryOptions::default())
                .await?,
        );
        videos.extend(
            self.by_state_locked(VideoState::UploadFailed, QueryOptions::default())
                .await?,
        );
        Ok(videos)
    }

    /// The uploader's input set: up to `limit` videos, failed uploads first,
    /// then freshly created ones, `updatedAt` ascending within each bucket.
    pub async fn pending_uploads(&self, limit: usize) -> StoreResult<Vec<YtVideo>> {
        let _guard = self.table_lock.lock().await;

        let mut videos = self
            .by_state_locked(
                VideoState::UploadFailed,
                QueryOptions {
                    ascending: true,
                    limit: Some(limit),
                },
            )
            .await?;
        if videos.len() < limit {
            videos.extend(
                self.by_state_locked(
                    VideoState::VideoCreated,
                    QueryOptions {
                        ascending: true,
                        limit: Some(limit - videos.len()),
                    },
                )
                .await?,
            );
        }
        Ok(videos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use ytsync_models::{JoystreamVideo, PrivacyStatus};

    fn video(id: &str, state: VideoState) -> YtVideo {
        use chrono::TimeZone;
        let t = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        YtVideo {
            channel_id: "UCabc".to_string(),
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            duration: 60,
            thumbnails: Default::default(),
            published_at: t,
            upload_status: "processed".to_string(),
            privacy_status: PrivacyStatus::Public,
            live_broadcast_content: ytsync_models::LiveBroadcastContent::None,
            license: ytsync_models::VideoLicense::Youtube,
            container: "mp4".to_string(),
            view_count: 0,
            joystream_channel_id: 7,
            category: "22".to_string(),
            language: None,
            media_size: None,
            state,
            joystream_video: state.has_on_chain_record().then(|| JoystreamVideo {
                id: 1,
                asset_ids: [10, 11],
            }),
            created_at: t,
            updated_at: t,
        }
    }

    #[tokio::test]
    async fn test_state_round_trips_through_index() {
        let repo = VideosRepository::new(Arc::new(MemoryBackend::new()));
        repo.save(&video("vid-1", VideoState::New)).await.unwrap();
        repo.save(&video("vid-2", VideoState::VideoCreated))
            .await
            .unwrap();

        let new = repo
            .by_state(VideoState::New, QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].id, "vid-1");
    }

    #[tokio::test]
    async fn test_unsynced_excludes_filtered_new_videos() {
        let repo = VideosRepository::new(Arc::new(MemoryBackend::new()));

        repo.save(&video("vid-public", VideoState::New)).await.unwrap();

        let mut private = video("vid-private", VideoState::New);
        private.privacy_status = PrivacyStatus::Private;
        repo.save(&private).await.unwrap();

        repo.save(&video("vid-retry", VideoState::VideoCreationFailed))
            .await
            .unwrap();
        repo.save(&video("vid-reup", VideoState::UploadFailed))
            .await
            .unwrap();
        repo.save(&video("vid-done", VideoState::UploadSucceeded))
            .await
            .unwrap();

        let unsynced = repo.unsynced().await.unwrap();
        let ids: Vec<_> = unsynced.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["vid-public", "vid-retry", "vid-reup"]);
    }

    #[tokio::test]
    async fn test_pending_uploads_orders_failed_first() {
        let repo = VideosRepository::new(Arc::new(MemoryBackend::new()));
        repo.save(&video("vid-created", VideoState::VideoCreated))
            .await
            .unwrap();
        // Saved later, so its updatedAt is newer; the failed bucket must
        // still come first.
        repo.save(&video("vid-failed", VideoState::UploadFailed))
            .await
            .unwrap();

        let pending = repo.pending_uploads(10).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["vid-failed", "vid-created"]);

        let limited = repo.pending_uploads(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, "vid-failed");
    }
}
