//! Creator registry view.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use ytsync_models::{YppStatus, YtChannel};
use ytsync_store::ChannelsRepository;

use crate::error::SyncResult;

/// Read-only projection emitting eligible channels in a fair order.
///
/// Eligibility is the explicit conjunction: creator intent, operator intent,
/// and a `Verified::*` program status; suspended and opted-out channels are
/// skipped. Each cycle rotates the start position over the `lastActedAt`
/// ascending order so no channel monopolizes the head of the list.
pub struct CreatorRegistry {
    channels: Arc<ChannelsRepository>,
    cursor: AtomicUsize,
}

impl CreatorRegistry {
    pub fn new(channels: Arc<ChannelsRepository>) -> Self {
        Self {
            channels,
            cursor: AtomicUsize::new(0),
        }
    }

    fn is_eligible(channel: &YtChannel) -> bool {
        if channel.ypp_status.is_suspended() || channel.ypp_status == YppStatus::OptedOut {
            return false;
        }
        channel.is_sync_candidate()
    }

    /// The channels to poll this cycle, in order.
    pub async fn next_cycle(&self) -> SyncResult<Vec<YtChannel>> {
        let mut eligible: Vec<YtChannel> = self
            .channels
            .list_all()
            .await?
            .into_iter()
            .filter(Self::is_eligible)
            .collect();
        eligible.sort_by_key(|c| c.last_acted_at);

        if eligible.is_empty() {
            return Ok(eligible);
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % eligible.len();
        eligible.rotate_left(start);
        debug!(count = eligible.len(), start, "Registry cycle");
        Ok(eligible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use ytsync_models::{SuspensionReason, Thumbnails, VerifiedTier};
    use ytsync_store::MemoryBackend;

    fn channel(id: &str, status: YppStatus, acted_offset_secs: i64) -> YtChannel {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        YtChannel {
            user_id: format!("user-{id}"),
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            thumbnails: Thumbnails::default(),
            user_access_token: "at".to_string(),
            user_refresh_token: "rt".to_string(),
            uploads_playlist_id: format!("UU{id}"),
            joystream_channel_id: 1,
            referrer_channel_id: None,
            language: None,
            video_category_id: None,
            should_be_ingested: true,
            allow_operator_ingestion: true,
            perform_unauthorized_sync: false,
            ypp_status: status,
            historical_video_synced_size: 0,
            last_acted_at: t + Duration::seconds(acted_offset_secs),
            phantom_key: "phantomData".to_string(),
            created_at: t,
            updated_at: t,
        }
    }

    async fn registry_with(channels: Vec<YtChannel>) -> CreatorRegistry {
        let repo = Arc::new(ChannelsRepository::new(Arc::new(MemoryBackend::new())));
        repo.batch_save(&channels).await.unwrap();
        CreatorRegistry::new(repo)
    }

    #[tokio::test]
    async fn test_only_verified_candidates_are_emitted() {
        let mut not_ingested = channel("UCd", YppStatus::Verified(VerifiedTier::Gold), 3);
        not_ingested.should_be_ingested = false;

        let registry = registry_with(vec![
            channel("UCa", YppStatus::Verified(VerifiedTier::Bronze), 0),
            channel("UCb", YppStatus::Suspended(SuspensionReason::Legal), 1),
            channel("UCc", YppStatus::OptedOut, 2),
            not_ingested,
            channel("UCe", YppStatus::Unverified, 4),
        ])
        .await;

        let cycle = registry.next_cycle().await.unwrap();
        let ids: Vec<_> = cycle.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["UCa"]);
    }

    #[tokio::test]
    async fn test_round_robin_rotates_last_acted_order() {
        let registry = registry_with(vec![
            channel("UCb", YppStatus::Verified(VerifiedTier::Bronze), 10),
            channel("UCa", YppStatus::Verified(VerifiedTier::Bronze), 0),
            channel("UCc", YppStatus::Verified(VerifiedTier::Bronze), 20),
        ])
        .await;

        let first: Vec<_> = registry
            .next_cycle()
            .await
            .unwrap()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        // lastActedAt ascending on the first cycle.
        assert_eq!(first, vec!["UCa", "UCb", "UCc"]);

        let second: Vec<_> = registry
            .next_cycle()
            .await
            .unwrap()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        // Rotated by one, same underlying order.
        assert_eq!(second, vec!["UCb", "UCc", "UCa"]);
    }
}
