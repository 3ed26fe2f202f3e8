//! Channel repository.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

use ytsync_models::YtChannel;

use crate::backend::{
    ItemKey, QueryOptions, TableBackend, CHANNELS_BY_JOYSTREAM_ID, CHANNELS_BY_PHANTOM_KEY,
    CHANNELS_BY_REFERRER, CHANNELS_TABLE,
};
use crate::error::StoreResult;
use ytsync_models::channel::PHANTOM_KEY;

/// Repository for channel records.
///
/// All writers and list readers funnel through the table-level critical
/// section, which makes operations linearizable and list reads
/// snapshot-consistent. The section is never held across calls outside the
/// store.
pub struct ChannelsRepository {
    backend: Arc<dyn TableBackend>,
    table_lock: Mutex<()>,
}

fn key_of(channel: &YtChannel) -> ItemKey {
    ItemKey::composite(&channel.user_id, &channel.id)
}

impl ChannelsRepository {
    pub fn new(backend: Arc<dyn TableBackend>) -> Self {
        Self {
            backend,
            table_lock: Mutex::new(()),
        }
    }

    /// Point lookup by `(userId, channelId)`.
    pub async fn get(&self, user_id: &str, channel_id: &str) -> StoreResult<Option<YtChannel>> {
        let _guard = self.table_lock.lock().await;
        let item = self
            .backend
            .get(CHANNELS_TABLE, &ItemKey::composite(user_id, channel_id))
            .await?;
        item.map(|v| serde_json::from_value(v).map_err(Into::into))
            .transpose()
    }

    /// Upsert a channel. The store stamps `updatedAt`; callers cannot skew it.
    pub async fn save(&self, channel: &YtChannel) -> StoreResult<()> {
        let mut stored = channel.clone();
        stored.updated_at = Utc::now();

        let _guard = self.table_lock.lock().await;
        self.backend
            .put(CHANNELS_TABLE, &key_of(&stored), serde_json::to_value(&stored)?)
            .await?;
        debug!(channel_id = %stored.id, "Saved channel");
        Ok(())
    }

    /// Best-effort bulk upsert.
    pub async fn batch_save(&self, channels: &[YtChannel]) -> StoreResult<()> {
        let now = Utc::now();
        let items = channels
            .iter()
            .map(|c| {
                let mut stored = c.clone();
                stored.updated_at = now;
                Ok((key_of(&stored), serde_json::to_value(&stored)?))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let _guard = self.table_lock.lock().await;
        self.backend.batch_put(CHANNELS_TABLE, items).await
    }

    /// Snapshot of every tracked channel.
    pub async fn list_all(&self) -> StoreResult<Vec<YtChannel>> {
        let _guard = self.table_lock.lock().await;
        let items = self.backend.scan(CHANNELS_TABLE).await?;
        items
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }

    /// Secondary lookup by on-chain channel id.
    pub async fn by_joystream_id(&self, joystream_channel_id: u64) -> StoreResult<Option<YtChannel>> {
        let _guard = self.table_lock.lock().await;
        let mut items = self
            .backend
            .query_index(
                CHANNELS_TABLE,
                CHANNELS_BY_JOYSTREAM_ID,
                &json!(joystream_channel_id),
                QueryOptions {
                    ascending: false,
                    limit: Some(1),
                },
            )
            .await?;
        items
            .pop()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .transpose()
    }

    /// Channels referred by the given on-chain channel id.
    pub async fn referred_by(&self, referrer_channel_id: u64) -> StoreResult<Vec<YtChannel>> {
        let _guard = self.table_lock.lock().await;
        let items = self
            .backend
            .query_index(
                CHANNELS_TABLE,
                CHANNELS_BY_REFERRER,
                &json!(referrer_channel_id),
                QueryOptions::default(),
            )
            .await?;
        items
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }

    /// Most recently created channels, newest first.
    pub async fn recent(&self, limit: usize) -> StoreResult<Vec<YtChannel>> {
        let _guard = self.table_lock.lock().await;
        let items = self
            .backend
            .query_index(
                CHANNELS_TABLE,
                CHANNELS_BY_PHANTOM_KEY,
                &json!(PHANTOM_KEY),
                QueryOptions {
                    ascending: false,
                    limit: Some(limit),
                },
            )
            .await?;
        items
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use chrono::TimeZone;
    use ytsync_models::{Thumbnails, VerifiedTier, YppStatus};

    fn channel(user_id: &str, id: &str, joystream_id: u64) -> YtChannel {
        let t = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        YtChannel {
            user_id: user_id.to_string(),
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            thumbnails: Thumbnails::default(),
            user_access_token: "at".to_string(),
            user_refresh_token: "rt".to_string(),
            uploads_playlist_id: format!("UU{id}"),
            joystream_channel_id: joystream_id,
            referrer_channel_id: Some(99),
            language: None,
            video_category_id: None,
            should_be_ingested: true,
            allow_operator_ingestion: true,
            perform_unauthorized_sync: false,
            ypp_status: YppStatus::Verified(VerifiedTier::Bronze),
            historical_video_synced_size: 0,
            last_acted_at: t,
            phantom_key: PHANTOM_KEY.to_string(),
            created_at: t,
            updated_at: t,
        }
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let repo = ChannelsRepository::new(Arc::new(MemoryBackend::new()));
        let ch = channel("user-1", "UCabc", 7);

        repo.save(&ch).await.unwrap();
        let loaded = repo.get("user-1", "UCabc").await.unwrap().unwrap();
        assert_eq!(loaded.joystream_channel_id, 7);
        // The store stamps updatedAt on write.
        assert!(loaded.updated_at > ch.updated_at);

        assert!(repo.get("user-1", "UCother").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_secondary_lookups() {
        let repo = ChannelsRepository::new(Arc::new(MemoryBackend::new()));
        repo.save(&channel("user-1", "UCa", 7)).await.unwrap();
        repo.save(&channel("user-2", "UCb", 8)).await.unwrap();

        let found = repo.by_joystream_id(8).await.unwrap().unwrap();
        assert_eq!(found.id, "UCb");
        assert!(repo.by_joystream_id(999).await.unwrap().is_none());

        let referred = repo.referred_by(99).await.unwrap();
        assert_eq!(referred.len(), 2);
    }

    #[tokio::test]
    async fn test_recent_orders_by_created_at_desc() {
        let repo = ChannelsRepository::new(Arc::new(MemoryBackend::new()));
        let mut older = channel("user-1", "UCa", 7);
        older.created_at = chrono::Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let newer = channel("user-2", "UCb", 8);
        repo.save(&older).await.unwrap();
        repo.save(&newer).await.unwrap();

        let recent = repo.recent(10).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["UCb", "UCa"]);

        assert_eq!(repo.recent(1).await.unwrap().len(), 1);
    }
}
