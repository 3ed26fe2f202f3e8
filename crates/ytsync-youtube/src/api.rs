//! YouTube Data API v3 client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use ytsync_models::YtChannel;

use crate::error::{YoutubeError, YoutubeResult};
use crate::types::{
    ChannelResource, ListResponse, PlaylistItemResource, RemoteChannel, RemoteVideo,
    TokenResponse, VideoResource,
};

const DATA_API_URL: &str = "https://www.googleapis.com/youtube/v3";
const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// `videos.list` accepts at most 50 ids per call.
const VIDEOS_BATCH: usize = 50;

/// `playlistItems.list` page size.
const PLAYLIST_PAGE: usize = 50;

/// Sink for metadata-call quota reservations.
///
/// Every list call costs one unit and must be reserved before it is issued;
/// a refused reservation aborts the operation with `QuotaLimitExceeded`.
/// Reservations are non-refundable.
pub trait QuotaSink: Send + Sync {
    fn try_reserve(&self, units: u32) -> bool;
}

/// A sink that never refuses, for callers without a daily budget.
pub struct UnlimitedQuota;

impl QuotaSink for UnlimitedQuota {
    fn try_reserve(&self, _units: u32) -> bool {
        true
    }
}

/// Read access to a creator's channel metadata.
#[async_trait]
pub trait YoutubeApi: Send + Sync {
    /// Canonical channel info (title, uploads playlist, statistics).
    async fn channel(&self, channel: &YtChannel) -> YoutubeResult<RemoteChannel>;

    /// The channel's full uploads list with per-video details.
    async fn uploads(&self, channel: &YtChannel) -> YoutubeResult<Vec<RemoteVideo>>;
}

/// OAuth credentials for the Data API.
#[derive(Debug, Clone)]
pub struct YoutubeCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Production client against the Data API.
pub struct YoutubeClient {
    http: Client,
    credentials: YoutubeCredentials,
    quota: Arc<dyn QuotaSink>,
    api_url: String,
    token_url: String,
}

impl YoutubeClient {
    pub fn new(credentials: YoutubeCredentials, quota: Arc<dyn QuotaSink>) -> YoutubeResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            credentials,
            quota,
            api_url: DATA_API_URL.to_string(),
            token_url: OAUTH_TOKEN_URL.to_string(),
        })
    }

    /// Point the client at alternative endpoints (tests, proxies).
    pub fn with_endpoints(mut self, api_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self.token_url = token_url.into();
        self
    }

    fn reserve(&self, units: u32) -> YoutubeResult<()> {
        if self.quota.try_reserve(units) {
            Ok(())
        } else {
            Err(YoutubeError::QuotaLimitExceeded(
                "sync pool exhausted for the current UTC day".to_string(),
            ))
        }
    }

    /// Mint a fresh access token from the channel's refresh token.
    ///
    /// An `invalid_grant` answer means the creator revoked access; that is
    /// the per-channel auth failure the poller suspends on.
    async fn access_token(&self, channel: &YtChannel) -> YoutubeResult<String> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", channel.user_refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let token: TokenResponse = response.json().await?;
                Ok(token.access_token)
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(YoutubeError::AuthorizationFailed(format!(
                    "token refresh for channel {} rejected: {}",
                    channel.id, body
                )))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(YoutubeError::bad_response(format!(
                    "token endpoint returned {status}: {body}"
                )))
            }
        }
    }

    /// Issue one authenticated list call, mapping error statuses.
    async fn list_call<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        token: &str,
    ) -> YoutubeResult<T> {
        self.reserve(1)?;
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                if body.contains("quotaExceeded") || body.contains("rateLimitExceeded") {
                    Err(YoutubeError::QuotaLimitExceeded(body))
                } else {
                    Err(YoutubeError::AuthorizationFailed(body))
                }
            }
            StatusCode::UNAUTHORIZED => {
                let body = response.text().await.unwrap_or_default();
                Err(YoutubeError::AuthorizationFailed(body))
            }
            StatusCode::NOT_FOUND => {
                let body = response.text().await.unwrap_or_default();
                Err(YoutubeError::bad_response(format!("not found: {body}")))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(YoutubeError::bad_response(format!(
                    "{url} returned {status}: {body}"
                )))
            }
        }
    }
}

#[async_trait]
impl YoutubeApi for YoutubeClient {
    async fn channel(&self, channel: &YtChannel) -> YoutubeResult<RemoteChannel> {
        let token = self.access_token(channel).await?;
        let url = format!("{}/channels", self.api_url);
        let response: ListResponse<ChannelResource> = self
            .list_call(
                &url,
                &[
                    ("part", "snippet,contentDetails,statistics"),
                    ("id", &channel.id),
                ],
                &token,
            )
            .await?;

        let resource = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| YoutubeError::ChannelNotFound(channel.id.clone()))?;
        let snippet = resource
            .snippet
            .ok_or_else(|| YoutubeError::bad_response("channel resource without snippet"))?;
        let uploads_playlist_id = resource
            .content_details
            .map(|d| d.related_playlists.uploads)
            .ok_or_else(|| YoutubeError::bad_response("channel resource without contentDetails"))?;
        let stats = resource.statistics;

        Ok(RemoteChannel {
            id: resource.id,
            title: snippet.title,
            description: snippet.description,
            thumbnails: snippet.thumbnails.to_model(),
            uploads_playlist_id,
            published_at: snippet.published_at,
            default_language: snippet.default_language,
            subscriber_count: stats
                .as_ref()
                .and_then(|s| s.subscriber_count.as_deref())
                .and_then(|c| c.parse().ok())
                .unwrap_or(0),
            video_count: stats
                .as_ref()
                .and_then(|s| s.video_count.as_deref())
                .and_then(|c| c.parse().ok())
                .unwrap_or(0),
        })
    }

    async fn uploads(&self, channel: &YtChannel) -> YoutubeResult<Vec<RemoteVideo>> {
        let token = self.access_token(channel).await?;

        // Walk the uploads playlist collecting video ids.
        let playlist_url = format!("{}/playlistItems", self.api_url);
        let page_size = PLAYLIST_PAGE.to_string();
        let mut video_ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query: Vec<(&str, &str)> = vec![
                ("part", "snippet"),
                ("playlistId", channel.uploads_playlist_id.as_str()),
                ("maxResults", page_size.as_str()),
            ];
            if let Some(ref t) = page_token {
                query.push(("pageToken", t.as_str()));
            }
            let page: ListResponse<PlaylistItemResource> =
                match self.list_call(&playlist_url, &query, &token).await {
                    Ok(page) => page,
                    // A vanished uploads playlist means the channel is gone.
                    Err(YoutubeError::BadResponse(msg)) if msg.starts_with("not found") => {
                        return Err(YoutubeError::ChannelNotFound(channel.id.clone()))
                    }
                    Err(e) => return Err(e),
                };
            video_ids.extend(page.items.into_iter().map(|i| i.snippet.resource_id.video_id));
            match page.next_page_token {
                Some(t) => page_token = Some(t),
                None => break,
            }
        }
        debug!(
            channel_id = %channel.id,
            count = video_ids.len(),
            "Fetched uploads playlist"
        );

        // Resolve details in batches of 50.
        let videos_url = format!("{}/videos", self.api_url);
        let mut videos = Vec::with_capacity(video_ids.len());
        for chunk in video_ids.chunks(VIDEOS_BATCH) {
            let ids = chunk.join(",");
            let details: ListResponse<VideoResource> = self
                .list_call(
                    &videos_url,
                    &[
                        ("part", "snippet,contentDetails,status,statistics"),
                        ("id", &ids),
                    ],
                    &token,
                )
                .await?;
            for resource in &details.items {
                match RemoteVideo::from_resource(resource) {
                    Ok(v) => videos.push(v),
                    Err(e) => warn!(video_id = %resource.id, "Skipping malformed video resource: {e}"),
                }
            }
        }
        Ok(videos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingQuota {
        reserved: AtomicU32,
        cap: u32,
    }

    impl QuotaSink for CountingQuota {
        fn try_reserve(&self, units: u32) -> bool {
            let current = self.reserved.load(Ordering::SeqCst);
            if current + units > self.cap {
                return false;
            }
            self.reserved.fetch_add(units, Ordering::SeqCst);
            true
        }
    }

    fn channel() -> YtChannel {
        use chrono::TimeZone;
        let t = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        YtChannel {
            user_id: "user-1".to_string(),
            id: "UCabc".to_string(),
            title: "Test".to_string(),
            description: String::new(),
            thumbnails: Default::default(),
            user_access_token: "at".to_string(),
            user_refresh_token: "rt".to_string(),
            uploads_playlist_id: "UUabc".to_string(),
            joystream_channel_id: 7,
            referrer_channel_id: None,
            language: None,
            video_category_id: None,
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

    fn token_mock() -> Mock {
        Mock::given(method("POST")).and(path("/token")).respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })),
        )
    }

    async fn client_for(server: &MockServer, cap: u32) -> (YoutubeClient, Arc<CountingQuota>) {
        let quota = Arc::new(CountingQuota {
            reserved: AtomicU32::new(0),
            cap,
        });
        let client = YoutubeClient::new(
            YoutubeCredentials {
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
            },
            quota.clone(),
        )
        .unwrap()
        .with_endpoints(server.uri(), format!("{}/token", server.uri()));
        (client, quota)
    }

    #[tokio::test]
    async fn test_uploads_paginates_and_reserves_per_call() {
        let server = MockServer::start().await;
        token_mock().mount(&server).await;

        Mock::given(method("GET"))
            .and(path("/playlistItems"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"snippet": {"resourceId": {"videoId": "vid-2"}}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/playlistItems"))
            .and(query_param_is_missing("pageToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"snippet": {"resourceId": {"videoId": "vid-1"}}}],
                "nextPageToken": "page-2"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {
                        "id": "vid-1",
                        "snippet": {
                            "title": "One",
                            "publishedAt": "2024-02-01T00:00:00Z",
                            "liveBroadcastContent": "none",
                            "thumbnails": {}
                        },
                        "contentDetails": {"duration": "PT1M"},
                        "status": {"uploadStatus": "processed", "privacyStatus": "public", "license": "youtube"},
                        "statistics": {"viewCount": "10"}
                    },
                    {
                        "id": "vid-2",
                        "snippet": {
                            "title": "Two",
                            "publishedAt": "2024-02-02T00:00:00Z",
                            "liveBroadcastContent": "none",
                            "thumbnails": {}
                        },
                        "contentDetails": {"duration": "PT2M"},
                        "status": {"uploadStatus": "processed", "privacyStatus": "public", "license": "youtube"},
                        "statistics": {"viewCount": "20"}
                    }
                ]
            })))
            .mount(&server)
            .await;

        let (client, quota) = client_for(&server, 100).await;
        let videos = client.uploads(&channel()).await.unwrap();

        assert_eq!(videos.len(), 2);
        // Two playlist pages plus one videos batch.
        assert_eq!(quota.reserved.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_quota_aborts_before_any_call() {
        let server = MockServer::start().await;
        token_mock().mount(&server).await;

        let (client, _) = client_for(&server, 0).await;
        let err = client.uploads(&channel()).await.unwrap_err();
        assert!(matches!(err, YoutubeError::QuotaLimitExceeded(_)));
    }

    #[tokio::test]
    async fn test_revoked_grant_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let (client, _) = client_for(&server, 100).await;
        let err = client.uploads(&channel()).await.unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn test_missing_channel_maps_to_not_found() {
        let server = MockServer::start().await;
        token_mock().mount(&server).await;
        Mock::given(method("GET"))
            .and(path("/channels"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})),
            )
            .mount(&server)
            .await;

        let (client, _) = client_for(&server, 100).await;
        let err = client.channel(&channel()).await.unwrap_err();
        assert!(matches!(err, YoutubeError::ChannelNotFound(_)));
    }
}
