//! The runtime interface the sync engine consumes.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChainResult;
use crate::outcome::TxOutcome;

/// On-chain metadata for a video being created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMeta {
    pub title: String,
    pub description: String,
    /// Platform category id.
    pub category: String,
    pub language: Option<String>,
    pub duration: u32,
    /// Set for videos published before the channel enrolled.
    pub published_before_joystream: Option<DateTime<Utc>>,
}

/// One asset attached to a `createVideo` extrinsic.
///
/// The signing collaborator reads the staged file itself to compute the
/// runtime's content hash, so the request carries the path rather than
/// the bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSpec {
    pub size: u64,
    /// Staged file in the local asset directory.
    pub source: PathBuf,
}

/// Everything the runtime needs to create a video record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVideoRequest {
    /// On-chain channel the video belongs to.
    pub channel_id: u64,
    /// Member id of the collaborator signing on the creator's behalf.
    pub collaborator_member_id: String,
    pub meta: VideoMeta,
    /// Media asset, always first in the attached object list.
    pub media: AssetSpec,
    /// Thumbnail asset, always second.
    pub thumbnail: AssetSpec,
}

/// Write access to the runtime.
///
/// Implementations must serialize submissions per signing collaborator;
/// callers rely on per-channel submission order.
#[async_trait]
pub trait ChainOps: Send + Sync {
    /// Submit `createVideo` with the two data objects attached and watch it
    /// to a terminal status.
    async fn create_video(&self, request: &CreateVideoRequest) -> ChainResult<TxOutcome>;
}
