//! Whitelist entries consulted during onboarding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A whitelisted channel handle. Keyed by `channelHandle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistEntry {
    pub channel_handle: String,
    pub created_at: DateTime<Utc>,
}

impl WhitelistEntry {
    pub fn new(channel_handle: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            channel_handle: channel_handle.into(),
            created_at,
        }
    }
}
