//! Video records and the sync lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::Thumbnails;
use crate::error::{ModelError, ModelResult};

/// Lifecycle state of a tracked video.
///
/// States advance monotonically along the edges in [`VideoState::can_transition_to`];
/// `UploadSucceeded` and `VideoUnavailable` are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoState {
    /// Discovered by the poller, nothing staged yet.
    New,
    /// The on-chain create transaction failed; re-enters the download stage.
    VideoCreationFailed,
    /// On-chain record exists, asset bytes pending upload.
    VideoCreated,
    /// Upload to the storage fleet failed; re-enters the uploader.
    UploadFailed,
    /// On-chain record and asset bytes both in place.
    UploadSucceeded,
    /// Upstream removed the video or it can never be hosted.
    VideoUnavailable,
}

impl VideoState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoState::New => "New",
            VideoState::VideoCreationFailed => "VideoCreationFailed",
            VideoState::VideoCreated => "VideoCreated",
            VideoState::UploadFailed => "UploadFailed",
            VideoState::UploadSucceeded => "UploadSucceeded",
            VideoState::VideoUnavailable => "VideoUnavailable",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoState::UploadSucceeded | VideoState::VideoUnavailable)
    }

    /// True when an on-chain video record must exist in this state.
    pub fn has_on_chain_record(&self) -> bool {
        matches!(
            self,
            VideoState::VideoCreated | VideoState::UploadFailed | VideoState::UploadSucceeded
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// Same-state transitions are permitted everywhere as idempotent no-ops.
    /// `VideoUnavailable` is reachable only from states without an on-chain
    /// record, so the record-presence invariant holds in the sink.
    pub fn can_transition_to(&self, next: VideoState) -> bool {
        if *self == next {
            return true;
        }
        use VideoState::*;
        matches!(
            (*self, next),
            (New, VideoCreated)
                | (New, VideoCreationFailed)
                | (New, VideoUnavailable)
                | (VideoCreationFailed, VideoCreated)
                | (VideoCreationFailed, VideoUnavailable)
                | (VideoCreated, UploadSucceeded)
                | (VideoCreated, UploadFailed)
                | (UploadFailed, UploadSucceeded)
        )
    }
}

impl fmt::Display for VideoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upstream privacy status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyStatus {
    Public,
    Unlisted,
    Private,
}

/// Upstream live-broadcast marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveBroadcastContent {
    None,
    Upcoming,
    Live,
}

/// Upstream license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoLicense {
    Youtube,
    CreativeCommon,
}

/// The on-chain mirror of a video, populated once creation finalizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoystreamVideo {
    /// On-chain video id.
    pub id: u64,
    /// Data object ids, ordered `[media, thumbnail]`.
    pub asset_ids: [u64; 2],
}

impl JoystreamVideo {
    pub fn media_object_id(&self) -> u64 {
        self.asset_ids[0]
    }

    pub fn thumbnail_object_id(&self) -> u64 {
        self.asset_ids[1]
    }
}

/// A tracked video. Keyed by `(channelId, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YtVideo {
    /// External channel id (partition key).
    pub channel_id: String,
    /// External video id (sort key).
    pub id: String,

    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Duration in seconds.
    pub duration: u32,
    #[serde(default)]
    pub thumbnails: Thumbnails,
    pub published_at: DateTime<Utc>,

    /// Upstream processing status; only `"processed"` videos are synced.
    pub upload_status: String,
    pub privacy_status: PrivacyStatus,
    pub live_broadcast_content: LiveBroadcastContent,
    pub license: VideoLicense,
    /// Media container, `"mp4"` for everything the downloader stages.
    pub container: String,
    #[serde(default)]
    pub view_count: u64,

    /// Denormalized on-chain channel id.
    pub joystream_channel_id: u64,
    /// Synthesized platform category.
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Byte size of the staged media file, recorded by the downloader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_size: Option<u64>,

    pub state: VideoState,
    /// Present iff `state.has_on_chain_record()`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joystream_video: Option<JoystreamVideo>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl YtVideo {
    /// Filter applied before a `New` video is admitted to the downloader.
    pub fn passes_download_filter(&self) -> bool {
        self.privacy_status == PrivacyStatus::Public
            && self.upload_status == "processed"
            && self.live_broadcast_content == LiveBroadcastContent::None
    }

    /// A video is historical when it predates the channel's enrollment.
    pub fn is_historical(&self, channel_enrolled_at: DateTime<Utc>) -> bool {
        self.published_at < channel_enrolled_at
    }

    /// Advance the lifecycle state along a graph edge.
    ///
    /// Rejects transitions not in the graph and transitions into an
    /// on-chain state without a populated on-chain record.
    pub fn transition_to(&mut self, next: VideoState) -> ModelResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if next.has_on_chain_record() && self.joystream_video.is_none() {
            return Err(ModelError::MissingOnChainRecord(next));
        }
        self.state = next;
        Ok(())
    }

    /// Record the finalized on-chain video and enter `VideoCreated`.
    pub fn set_created(&mut self, on_chain: JoystreamVideo) -> ModelResult<()> {
        if !self.state.can_transition_to(VideoState::VideoCreated) {
            return Err(ModelError::InvalidTransition {
                from: self.state,
                to: VideoState::VideoCreated,
            });
        }
        self.joystream_video = Some(on_chain);
        self.state = VideoState::VideoCreated;
        Ok(())
    }
}
