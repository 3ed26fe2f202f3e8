//! YouTube Data API v3 response types and canonical mappings.
//!
//! Each consumed endpoint gets an explicit record type; the client maps them
//! into the canonical [`RemoteChannel`] / [`RemoteVideo`] shapes the poller
//! reconciles against the store.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use ytsync_models::{LiveBroadcastContent, PrivacyStatus, Thumbnails, VideoLicense};

use crate::error::{YoutubeError, YoutubeResult};

/// Generic `*.list` envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    #[serde(default)]
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThumbnailDetails {
    pub default: Option<Thumbnail>,
    pub medium: Option<Thumbnail>,
    pub high: Option<Thumbnail>,
    pub standard: Option<Thumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

impl ThumbnailDetails {
    pub fn to_model(&self) -> Thumbnails {
        let url = |t: &Option<Thumbnail>| t.as_ref().map(|t| t.url.clone()).unwrap_or_default();
        Thumbnails {
            default: url(&self.default),
            medium: url(&self.medium),
            high: url(&self.high),
            standard: url(&self.standard),
        }
    }

    /// Best thumbnail to mirror on-chain, largest first.
    pub fn best_url(&self) -> Option<&str> {
        self.standard
            .as_ref()
            .or(self.high.as_ref())
            .or(self.medium.as_ref())
            .or(self.default.as_ref())
            .map(|t| t.url.as_str())
    }
}

// --- channels.list ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResource {
    pub id: String,
    pub snippet: Option<ChannelSnippet>,
    pub content_details: Option<ChannelContentDetails>,
    pub statistics: Option<ChannelStatistics>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnippet {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnails: ThumbnailDetails,
    pub published_at: DateTime<Utc>,
    pub default_language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelContentDetails {
    pub related_playlists: RelatedPlaylists,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedPlaylists {
    pub uploads: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    // The API reports counters as strings.
    pub subscriber_count: Option<String>,
    pub video_count: Option<String>,
}

// --- playlistItems.list ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemResource {
    pub snippet: PlaylistItemSnippet,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemSnippet {
    pub resource_id: ResourceId,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub video_id: String,
}

// --- videos.list ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResource {
    pub id: String,
    pub snippet: Option<VideoSnippet>,
    pub content_details: Option<VideoContentDetails>,
    pub status: Option<VideoStatusResource>,
    pub statistics: Option<VideoStatistics>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnails: ThumbnailDetails,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub live_broadcast_content: String,
    pub default_language: Option<String>,
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoContentDetails {
    /// ISO-8601 duration, e.g. `PT1H2M3S`.
    pub duration: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatusResource {
    #[serde(default)]
    pub upload_status: String,
    #[serde(default)]
    pub privacy_status: String,
    #[serde(default)]
    pub license: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatistics {
    pub view_count: Option<String>,
}

// --- OAuth ---

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

// --- canonical shapes ---

/// Canonical channel info the poller refreshes from.
#[derive(Debug, Clone)]
pub struct RemoteChannel {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnails: Thumbnails,
    pub uploads_playlist_id: String,
    pub published_at: DateTime<Utc>,
    pub default_language: Option<String>,
    pub subscriber_count: u64,
    pub video_count: u64,
}

/// Canonical upstream video record the poller reconciles into the store.
#[derive(Debug, Clone)]
pub struct RemoteVideo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration: u32,
    pub thumbnails: Thumbnails,
    pub thumbnail_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub upload_status: String,
    pub privacy_status: PrivacyStatus,
    pub live_broadcast_content: LiveBroadcastContent,
    pub license: VideoLicense,
    pub view_count: u64,
    pub container: String,
    pub language: Option<String>,
    pub category_id: Option<String>,
}

impl RemoteVideo {
    pub fn from_resource(resource: &VideoResource) -> YoutubeResult<Self> {
        let snippet = resource
            .snippet
            .as_ref()
            .ok_or_else(|| YoutubeError::bad_response("video resource without snippet"))?;
        let status = resource
            .status
            .as_ref()
            .ok_or_else(|| YoutubeError::bad_response("video resource without status"))?;
        let duration = resource
            .content_details
            .as_ref()
            .map(|d| parse_iso8601_duration(&d.duration))
            .transpose()?
            .unwrap_or(0);

        Ok(Self {
            id: resource.id.clone(),
            title: snippet.title.clone(),
            description: snippet.description.clone(),
            duration,
            thumbnails: snippet.thumbnails.to_model(),
            thumbnail_url: snippet.thumbnails.best_url().map(String::from),
            published_at: snippet.published_at,
            upload_status: status.upload_status.clone(),
            privacy_status: parse_privacy_status(&status.privacy_status),
            live_broadcast_content: parse_live_broadcast(&snippet.live_broadcast_content),
            license: parse_license(&status.license),
            view_count: resource
                .statistics
                .as_ref()
                .and_then(|s| s.view_count.as_deref())
                .and_then(|c| c.parse().ok())
                .unwrap_or(0),
            container: "mp4".to_string(),
            language: snippet.default_language.clone(),
            category_id: snippet.category_id.clone(),
        })
    }
}

fn parse_privacy_status(s: &str) -> PrivacyStatus {
    match s {
        "public" => PrivacyStatus::Public,
        "unlisted" => PrivacyStatus::Unlisted,
        _ => PrivacyStatus::Private,
    }
}

fn parse_live_broadcast(s: &str) -> LiveBroadcastContent {
    match s {
        "live" => LiveBroadcastContent::Live,
        "upcoming" => LiveBroadcastContent::Upcoming,
        _ => LiveBroadcastContent::None,
    }
}

fn parse_license(s: &str) -> VideoLicense {
    match s {
        "creativeCommon" => VideoLicense::CreativeCommon,
        _ => VideoLicense::Youtube,
    }
}

/// Parse an ISO-8601 duration (`P1DT2H3M4S`) into whole seconds.
pub fn parse_iso8601_duration(s: &str) -> YoutubeResult<u32> {
    let rest = s
        .strip_prefix('P')
        .ok_or_else(|| YoutubeError::bad_response(format!("bad duration: {s}")))?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };

    let mut total: u64 = 0;
    let mut number = String::new();
    for ch in date_part.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
        } else {
            let n: u64 = number
                .parse()
                .map_err(|_| YoutubeError::bad_response(format!("bad duration: {s}")))?;
            number.clear();
            match ch {
                'D' => total += n * 86_400,
                'W' => total += n * 7 * 86_400,
                _ => return Err(YoutubeError::bad_response(format!("bad duration: {s}"))),
            }
        }
    }
    for ch in time_part.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
        } else {
            let n: u64 = number
                .parse()
                .map_err(|_| YoutubeError::bad_response(format!("bad duration: {s}")))?;
            number.clear();
            match ch {
                'H' => total += n * 3_600,
                'M' => total += n * 60,
                'S' => total += n,
                _ => return Err(YoutubeError::bad_response(format!("bad duration: {s}"))),
            }
        }
    }
    Ok(total.min(u32::MAX as u64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_durations() {
        assert_eq!(parse_iso8601_duration("PT3M20S").unwrap(), 200);
        assert_eq!(parse_iso8601_duration("PT1H2M3S").unwrap(), 3723);
        assert_eq!(parse_iso8601_duration("P1DT1S").unwrap(), 86_401);
        assert_eq!(parse_iso8601_duration("PT0S").unwrap(), 0);
        assert!(parse_iso8601_duration("3M20S").is_err());
    }

    #[test]
    fn test_video_resource_mapping() {
        let json = serde_json::json!({
            "id": "vid-1",
            "snippet": {
                "title": "A video",
                "description": "desc",
                "publishedAt": "2024-03-01T12:00:00Z",
                "liveBroadcastContent": "none",
                "thumbnails": {
                    "default": {"url": "https://i.ytimg.com/vi/vid-1/default.jpg"},
                    "high": {"url": "https://i.ytimg.com/vi/vid-1/hq.jpg"}
                },
                "categoryId": "22"
            },
            "contentDetails": {"duration": "PT2M"},
            "status": {
                "uploadStatus": "processed",
                "privacyStatus": "public",
                "license": "youtube"
            },
            "statistics": {"viewCount": "1234"}
        });
        let resource: VideoResource = serde_json::from_value(json).unwrap();
        let remote = RemoteVideo::from_resource(&resource).unwrap();

        assert_eq!(remote.duration, 120);
        assert_eq!(remote.privacy_status, PrivacyStatus::Public);
        assert_eq!(remote.live_broadcast_content, LiveBroadcastContent::None);
        assert_eq!(remote.view_count, 1234);
        assert_eq!(
            remote.thumbnail_url.as_deref(),
            Some("https://i.ytimg.com/vi/vid-1/hq.jpg")
        );
    }
}
