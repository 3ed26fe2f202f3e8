//! Channel records and participation status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Verification tier granted by the partnership program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerifiedTier {
    Bronze,
    Silver,
    Gold,
    Diamond,
}

impl VerifiedTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifiedTier::Bronze => "Bronze",
            VerifiedTier::Silver => "Silver",
            VerifiedTier::Gold => "Gold",
            VerifiedTier::Diamond => "Diamond",
        }
    }
}

/// Reason a channel was suspended from the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspensionReason {
    /// Upstream authorization stopped working (revoked or expired grant).
    AuthFailed,
    /// Copyright complaint.
    CopyrightBreach,
    /// Legal or policy takedown.
    Legal,
    /// The on-chain channel has no collaborator the service can sign with.
    CollaboratorMissing,
}

impl SuspensionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspensionReason::AuthFailed => "AuthFailed",
            SuspensionReason::CopyrightBreach => "CopyrightBreach",
            SuspensionReason::Legal => "Legal",
            SuspensionReason::CollaboratorMissing => "CollaboratorMissing",
        }
    }
}

/// Participation status of a channel in the partnership program.
///
/// Stored as a `Family::Variant` string (`"Verified::Bronze"`,
/// `"Suspended::Legal"`) so index scans can prefix-match on the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum YppStatus {
    Unverified,
    Verified(VerifiedTier),
    Suspended(SuspensionReason),
    OptedOut,
}

impl YppStatus {
    /// True for any `Verified::*` tier.
    pub fn is_verified(&self) -> bool {
        matches!(self, YppStatus::Verified(_))
    }

    /// True for any `Suspended::*` reason.
    pub fn is_suspended(&self) -> bool {
        matches!(self, YppStatus::Suspended(_))
    }
}

impl fmt::Display for YppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YppStatus::Unverified => write!(f, "Unverified"),
            YppStatus::Verified(tier) => write!(f, "Verified::{}", tier.as_str()),
            YppStatus::Suspended(reason) => write!(f, "Suspended::{}", reason.as_str()),
            YppStatus::OptedOut => write!(f, "OptedOut"),
        }
    }
}

impl From<YppStatus> for String {
    fn from(status: YppStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for YppStatus {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let status = match s.as_str() {
            "Unverified" => YppStatus::Unverified,
            "OptedOut" => YppStatus::OptedOut,
            "Verified::Bronze" => YppStatus::Verified(VerifiedTier::Bronze),
            "Verified::Silver" => YppStatus::Verified(VerifiedTier::Silver),
            "Verified::Gold" => YppStatus::Verified(VerifiedTier::Gold),
            "Verified::Diamond" => YppStatus::Verified(VerifiedTier::Diamond),
            "Suspended::AuthFailed" => YppStatus::Suspended(SuspensionReason::AuthFailed),
            "Suspended::CopyrightBreach" => {
                YppStatus::Suspended(SuspensionReason::CopyrightBreach)
            }
            "Suspended::Legal" => YppStatus::Suspended(SuspensionReason::Legal),
            "Suspended::CollaboratorMissing" => {
                YppStatus::Suspended(SuspensionReason::CollaboratorMissing)
            }
            other => return Err(ModelError::UnknownStatus(other.to_string())),
        };
        Ok(status)
    }
}

/// Thumbnail URLs reported by the upstream platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnails {
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub medium: String,
    #[serde(default)]
    pub high: String,
    #[serde(default)]
    pub standard: String,
}

/// Constant partition value for the `phantomKey-createdAt` index, which
/// orders all channels by creation time under a single partition.
pub const PHANTOM_KEY: &str = "phantomData";

fn default_phantom_key() -> String {
    PHANTOM_KEY.to_string()
}

/// A tracked creator channel.
///
/// Keyed by `(userId, id)`; `joystreamChannelId` and `referrerChannelId` are
/// secondary lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YtChannel {
    /// Owning user id (partition key).
    pub user_id: String,
    /// External channel id (sort key).
    pub id: String,

    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnails: Thumbnails,

    /// OAuth access token for reading the channel.
    pub user_access_token: String,
    /// OAuth refresh token used to mint new access tokens.
    pub user_refresh_token: String,
    /// Id of the channel's uploads playlist.
    pub uploads_playlist_id: String,

    /// On-chain channel id this channel mirrors into.
    pub joystream_channel_id: u64,
    /// On-chain channel id of the referring creator, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer_channel_id: Option<u64>,
    /// BCP-47 language tag synthesized for new videos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Default platform category for new videos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_category_id: Option<String>,

    /// Creator intent: the creator asked for their uploads to be mirrored.
    pub should_be_ingested: bool,
    /// Operator intent: an operator may pause ingestion without touching
    /// the creator's own flag.
    pub allow_operator_ingestion: bool,
    /// Sync without creator authorization (operator-curated channels).
    #[serde(default)]
    pub perform_unauthorized_sync: bool,

    pub ypp_status: YppStatus,

    /// Total bytes of pre-enrollment videos successfully uploaded.
    #[serde(default)]
    pub historical_video_synced_size: u64,

    /// Monotonic per-owner action timestamp (replay guard).
    pub last_acted_at: DateTime<Utc>,

    #[serde(default = "default_phantom_key")]
    pub phantom_key: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl YtChannel {
    /// A channel is a sync candidate iff the creator wants ingestion, the
    /// operator allows it, and the channel holds a `Verified::*` status.
    pub fn is_sync_candidate(&self) -> bool {
        self.should_be_ingested && self.allow_operator_ingestion && self.ypp_status.is_verified()
    }

    /// Record a creator action, rejecting replays.
    ///
    /// The submitted timestamp must strictly exceed the stored
    /// `lastActedAt`; equal timestamps are replays.
    pub fn record_action(&mut self, timestamp: DateTime<Utc>) -> ModelResult<()> {
        if timestamp <= self.last_acted_at {
            return Err(ModelError::StaleAction {
                submitted: timestamp.to_rfc3339(),
                recorded: self.last_acted_at.to_rfc3339(),
            });
        }
        self.last_acted_at = timestamp;
        Ok(())
    }

    /// Mark the channel suspended.
    pub fn suspend(&mut self, reason: SuspensionReason) {
        self.ypp_status = YppStatus::Suspended(reason);
    }

    /// Account bytes of a successfully uploaded pre-enrollment video.
    pub fn add_historical_synced(&mut self, bytes: u64) {
        self.historical_video_synced_size += bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn channel() -> YtChannel {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        YtChannel {
            user_id: "user-1".to_string(),
            id: "UCabc".to_string(),
            title: "Test".to_string(),
            description: String::new(),
            thumbnails: Thumbnails::default(),
            user_access_token: "at".to_string(),
            user_refresh_token: "rt".to_string(),
            uploads_playlist_id: "UUabc".to_string(),
            joystream_channel_id: 7,
            referrer_channel_id: None,
            language: Some("en".to_string()),
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

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            YppStatus::Unverified,
            YppStatus::Verified(VerifiedTier::Gold),
            YppStatus::Suspended(SuspensionReason::Legal),
            YppStatus::OptedOut,
        ] {
            let s: String = status.into();
            assert_eq!(YppStatus::try_from(s).unwrap(), status);
        }
    }

    #[test]
    fn test_sync_candidate_requires_all_three() {
        let mut ch = channel();
        assert!(ch.is_sync_candidate());

        ch.should_be_ingested = false;
        assert!(!ch.is_sync_candidate());

        ch.should_be_ingested = true;
        ch.allow_operator_ingestion = false;
        assert!(!ch.is_sync_candidate());

        ch.allow_operator_ingestion = true;
        ch.ypp_status = YppStatus::Unverified;
        assert!(!ch.is_sync_candidate());

        ch.ypp_status = YppStatus::Suspended(SuspensionReason::AuthFailed);
        assert!(!ch.is_sync_candidate());
    }

    #[test]
    fn test_record_action_rejects_replay() {
        let mut ch = channel();
        let stored = ch.last_acted_at;

        // Equal timestamp is a replay.
        assert!(ch.record_action(stored).is_err());
        assert_eq!(ch.last_acted_at, stored);

        // Strictly newer timestamp advances the guard.
        let newer = stored + chrono::Duration::seconds(1);
        ch.record_action(newer).unwrap();
        assert_eq!(ch.last_acted_at, newer);

        // The old timestamp no longer passes.
        assert!(ch.record_action(stored).is_err());
    }

    #[test]
    fn test_channel_serde_camel_case() {
        let ch = channel();
        let json = serde_json::to_value(&ch).unwrap();
        assert!(json.get("historicalVideoSyncedSize").is_some());
        assert!(json.get("lastActedAt").is_some());
        assert_eq!(json["yppStatus"], "Verified::Bronze");
        let back: YtChannel = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, ch.id);
        assert_eq!(back.ypp_status, ch.ypp_status);
    }
}
