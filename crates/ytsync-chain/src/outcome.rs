//! Sum-typed extrinsic outcomes.
//!
//! The submit call returns a [`TxOutcome`] instead of throwing through the
//! state machine; the on-chain creator switches on it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ytsync_models::JoystreamVideo;

/// A decoded runtime event emitted by a finalized extrinsic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Pallet name, e.g. `content` or `storage`.
    pub section: String,
    /// Event name, e.g. `VideoCreated`.
    pub method: String,
    /// Decoded event fields.
    pub data: Value,
}

impl ChainEvent {
    pub fn is(&self, section: &str, method: &str) -> bool {
        self.section == section && self.method == method
    }
}

/// Terminal result of submitting an extrinsic.
#[derive(Debug, Clone)]
pub enum TxOutcome {
    /// The extrinsic finalized and dispatched successfully.
    Finalized { events: Vec<ChainEvent> },
    /// The extrinsic finalized but the dispatch failed.
    Failed {
        /// Named runtime error, when the dispatch error resolves to one.
        module_error: Option<String>,
        message: String,
    },
    /// The pool rejected or dropped the submission before inclusion.
    Rejected,
}

impl TxOutcome {
    /// True when the dispatch failed on the channel's storage voucher.
    pub fn is_voucher_limit(&self) -> bool {
        match self {
            TxOutcome::Failed {
                module_error,
                message,
            } => {
                module_error.as_deref() == Some("VoucherSizeLimitExceeded")
                    || message.contains("VoucherSizeLimitExceeded")
            }
            _ => false,
        }
    }
}

/// Extract the created video from a finalized `createVideo` outcome.
///
/// Requires both the `content.VideoCreated` event (video id plus the data
/// object ids ordered `[media, thumbnail]`) and a subsequent
/// `storage.DataObjectsUploaded` event acknowledging the objects. Returns
/// `None` when either is missing, which the caller treats as a failed
/// attempt.
pub fn find_created_video(events: &[ChainEvent]) -> Option<JoystreamVideo> {
    let created = events.iter().find(|e| e.is("content", "VideoCreated"))?;
    events.iter().find(|e| e.is("storage", "DataObjectsUploaded"))?;

    let video_id = created.data.get("videoId")?.as_u64()?;
    let asset_ids = created.data.get("assetIds")?.as_array()?;
    let media = asset_ids.first()?.as_u64()?;
    let thumbnail = asset_ids.get(1)?.as_u64()?;

    Some(JoystreamVideo {
        id: video_id,
        asset_ids: [media, thumbnail],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn video_created() -> ChainEvent {
        ChainEvent {
            section: "content".to_string(),
            method: "VideoCreated".to_string(),
            data: json!({"channelId": 7, "videoId": 42, "assetIds": [100, 101]}),
        }
    }

    fn objects_uploaded() -> ChainEvent {
        ChainEvent {
            section: "storage".to_string(),
            method: "DataObjectsUploaded".to_string(),
            data: json!({"dataObjectIds": [100, 101]}),
        }
    }

    #[test]
    fn test_find_created_video_happy_path() {
        let events = vec![video_created(), objects_uploaded()];
        let created = find_created_video(&events).unwrap();
        assert_eq!(created.id, 42);
        assert_eq!(created.asset_ids, [100, 101]);
    }

    #[test]
    fn test_missing_either_event_yields_none() {
        assert!(find_created_video(&[video_created()]).is_none());
        assert!(find_created_video(&[objects_uploaded()]).is_none());
        assert!(find_created_video(&[]).is_none());
    }

    #[test]
    fn test_voucher_limit_detection() {
        let outcome = TxOutcome::Failed {
            module_error: Some("VoucherSizeLimitExceeded".to_string()),
            message: "storage.VoucherSizeLimitExceeded".to_string(),
        };
        assert!(outcome.is_voucher_limit());

        let other = TxOutcome::Failed {
            module_error: Some("InsufficientBalance".to_string()),
            message: "balances.InsufficientBalance".to_string(),
        };
        assert!(!other.is_voucher_limit());
        assert!(!TxOutcome::Rejected.is_voucher_limit());
    }
}
