//! Service configuration.
//!
//! A YAML or JSON document provides the base tree; every scalar in it can be
//! overridden by an environment variable derived from the key's dotted path
//! (screaming-snake segments joined by `__` under the `YT_SYNCH__` prefix).
//! Arrays and polymorphic options are accepted as JSON strings, and the
//! values `"off"` / `"null"` / `"undefined"` unset a key. The path/env-name
//! encoding is reversible and covered by tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Prefix of every recognized override variable.
pub const ENV_PREFIX: &str = "YT_SYNCH__";

/// Values that unset a key instead of assigning it.
const UNSET_VALUES: &[&str] = &["off", "null", "undefined"];

fn default_sync_cap() -> u32 {
    9_500
}

fn default_signup_cap() -> u32 {
    500
}

fn default_max_downloads() -> usize {
    10
}

fn default_max_uploads() -> usize {
    10
}

fn default_polling_fanout() -> usize {
    1
}

fn default_shutdown_grace() -> u64 {
    60
}

fn default_signer_command() -> String {
    "joystream-tx".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub joystream: JoystreamConfig,
    pub endpoints: EndpointsConfig,
    pub directories: DirectoriesConfig,
    pub limits: LimitsConfig,
    pub intervals: IntervalsConfig,
    pub youtube: YoutubeConfig,
    pub env: String,
    pub creator_onboarding_requirements: OnboardingRequirements,
    pub http_api: HttpApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoystreamConfig {
    pub channel_collaborator: CollaboratorConfig,
    pub app: AppConfig,
    /// Signing helper command driven for extrinsic construction.
    #[serde(default = "default_signer_command")]
    pub signer_command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorConfig {
    /// Member id the collaborator acts under.
    pub member_id: String,
    /// Signing account.
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_seed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsConfig {
    pub query_node: String,
    pub joystream_node_ws: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoriesConfig {
    /// Local asset staging directory.
    pub assets: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    #[serde(default)]
    pub daily_api_quota: DailyApiQuota,
    #[serde(default = "default_max_downloads")]
    pub max_concurrent_downloads: usize,
    #[serde(default = "default_max_uploads")]
    pub max_concurrent_uploads: usize,
    /// Disk budget for the asset directory, e.g. `"50G"`.
    pub storage: String,
    /// Videos longer than this are never synced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_video_duration_sec: Option<u32>,
    /// Videos larger than this are never synced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_video_size_mb: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyApiQuota {
    #[serde(default = "default_sync_cap")]
    pub sync: u32,
    #[serde(default = "default_signup_cap")]
    pub signup: u32,
}

impl Default for DailyApiQuota {
    fn default() -> Self {
        Self {
            sync: default_sync_cap(),
            signup: default_signup_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalsConfig {
    /// Metadata poll cycle period, in minutes.
    pub youtube_polling: u64,
    /// Storage-node response-time probe period, in seconds.
    pub check_storage_node_response_times: u64,
    /// Drain budget per stage on shutdown, in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,
    /// Bounded fan-out of the metadata poller across channels.
    #[serde(default = "default_polling_fanout")]
    pub youtube_polling_fanout: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRequirements {
    pub minimum_subscribers_count: u64,
    pub minimum_videos_count: u64,
    pub minimum_channel_age_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpApiConfig {
    pub port: u16,
    /// Operator key authorizing administrative actions. Lives in the loaded
    /// configuration, never read from the raw process environment.
    pub owner_key: String,
}

impl SyncConfig {
    /// Load configuration, resolving the file path as flag, then
    /// `CONFIG_PATH`, then `./config.yml`, and applying environment
    /// overrides on top.
    pub fn load(flag_path: Option<&Path>) -> SyncResult<Self> {
        let path = resolve_config_path(flag_path);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            SyncError::config_error(format!("cannot read {}: {e}", path.display()))
        })?;
        // YAML is a JSON superset, so one parser covers both formats.
        let mut tree: Value = serde_yaml::from_str(&raw)
            .map_err(|e| SyncError::config_error(format!("cannot parse {}: {e}", path.display())))?;

        apply_env_overrides(&mut tree, std::env::vars());

        let config: SyncConfig = serde_json::from_value(tree)
            .map_err(|e| SyncError::config_error(format!("invalid configuration: {e}")))?;
        config.validate()?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    fn validate(&self) -> SyncResult<()> {
        if self.http_api.owner_key.trim().is_empty() {
            return Err(SyncError::config_error("httpApi.ownerKey must be set"));
        }
        if self.joystream.channel_collaborator.account.trim().is_empty() {
            return Err(SyncError::config_error(
                "joystream.channelCollaborator.account must be set",
            ));
        }
        if self.directories.assets.trim().is_empty() {
            return Err(SyncError::config_error("directories.assets must be set"));
        }
        self.limits.storage_bytes()?;
        Ok(())
    }

    pub fn asset_dir(&self) -> PathBuf {
        PathBuf::from(&self.directories.assets)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.youtube_polling * 60)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.check_storage_node_response_times)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.intervals.shutdown_grace)
    }
}

impl LimitsConfig {
    /// The disk budget in bytes.
    pub fn storage_bytes(&self) -> SyncResult<u64> {
        parse_byte_size(&self.storage)
    }
}

/// Resolve the configuration file path.
pub fn resolve_config_path(flag_path: Option<&Path>) -> PathBuf {
    if let Some(path) = flag_path {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("CONFIG_PATH") {
        return PathBuf::from(path);
    }
    PathBuf::from("./config.yml")
}

/// Parse a byte size with an optional K/M/G/T suffix (binary multiples).
pub fn parse_byte_size(s: &str) -> SyncResult<u64> {
    let trimmed = s.trim();
    let normalized = trimmed
        .strip_suffix('B')
        .or_else(|| trimmed.strip_suffix('b'))
        .unwrap_or(trimmed);
    let (digits, multiplier) = match normalized.chars().last() {
        Some('K') | Some('k') => (&normalized[..normalized.len() - 1], 1u64 << 10),
        Some('M') | Some('m') => (&normalized[..normalized.len() - 1], 1u64 << 20),
        Some('G') | Some('g') => (&normalized[..normalized.len() - 1], 1u64 << 30),
        Some('T') | Some('t') => (&normalized[..normalized.len() - 1], 1u64 << 40),
        _ => (normalized, 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| SyncError::config_error(format!("invalid byte size: {s}")))
}

fn camel_to_screaming(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 4);
    for ch in segment.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch);
        } else {
            out.push(ch.to_ascii_uppercase());
        }
    }
    out
}

fn screaming_to_camel(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for (i, part) in segment.split('_').filter(|p| !p.is_empty()).enumerate() {
        let lower = part.to_ascii_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

/// Environment variable name for a dotted configuration path.
pub fn env_key(path: &str) -> String {
    let segments: Vec<String> = path.split('.').map(camel_to_screaming).collect();
    format!("{ENV_PREFIX}{}", segments.join("__"))
}

/// Dotted configuration path for a recognized environment variable name.
pub fn config_path_of(env_name: &str) -> Option<String> {
    let rest = env_name.strip_prefix(ENV_PREFIX)?;
    if rest.is_empty() {
        return None;
    }
    let segments: Vec<String> = rest.split("__").map(screaming_to_camel).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments.join("."))
}

fn get_path<'a>(tree: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = tree;
    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

fn set_path(tree: &mut Value, segments: &[String], value: Value) {
    let mut node = tree;
    for segment in &segments[..segments.len() - 1] {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()
            .expect("just ensured object")
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    node.as_object_mut()
        .expect("just ensured object")
        .insert(segments.last().expect("non-empty path").clone(), value);
}

fn remove_path(tree: &mut Value, segments: &[String]) {
    let mut node = tree;
    for segment in &segments[..segments.len() - 1] {
        match node.as_object_mut().and_then(|o| o.get_mut(segment)) {
            Some(next) => node = next,
            None => return,
        }
    }
    if let Some(object) = node.as_object_mut() {
        object.remove(segments.last().expect("non-empty path"));
    }
}

/// A scalar override keeps the file value's stringness: overriding a string
/// key stays a string, anything else is parsed as JSON when possible (which
/// also admits arrays and objects passed as JSON strings).
fn coerce_scalar(existing_is_string: bool, raw: &str) -> Value {
    if existing_is_string {
        return Value::String(raw.to_string());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Apply recognized `YT_SYNCH__…` variables onto the configuration tree.
pub fn apply_env_overrides<I>(tree: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, raw) in vars {
        let Some(path) = config_path_of(&name) else {
            continue;
        };
        let segments: Vec<String> = path.split('.').map(String::from).collect();

        if UNSET_VALUES.contains(&raw.as_str()) {
            debug!(%path, "Unsetting configuration key from environment");
            remove_path(tree, &segments);
            continue;
        }

        let existing_is_string = matches!(get_path(tree, &segments), Some(Value::String(_)));
        let value = coerce_scalar(existing_is_string, &raw);
        debug!(%path, "Overriding configuration key from environment");
        set_path(tree, &segments, value);
    }
}

/// Every dotted path the loader recognizes, used by the round-trip tests and
/// by operators enumerating override variables.
pub const KNOWN_PATHS: &[&str] = &[
    "joystream.channelCollaborator.memberId",
    "joystream.channelCollaborator.account",
    "joystream.app.name",
    "joystream.app.accountSeed",
    "joystream.signerCommand",
    "endpoints.queryNode",
    "endpoints.joystreamNodeWs",
    "directories.assets",
    "limits.dailyApiQuota.sync",
    "limits.dailyApiQuota.signup",
    "limits.maxConcurrentDownloads",
    "limits.maxConcurrentUploads",
    "limits.storage",
    "limits.maxVideoDurationSec",
    "limits.maxVideoSizeMb",
    "intervals.youtubePolling",
    "intervals.checkStorageNodeResponseTimes",
    "intervals.shutdownGrace",
    "intervals.youtubePollingFanout",
    "youtube.clientId",
    "youtube.clientSecret",
    "youtube.apiKey",
    "env",
    "creatorOnboardingRequirements.minimumSubscribersCount",
    "creatorOnboardingRequirements.minimumVideosCount",
    "creatorOnboardingRequirements.minimumChannelAgeHours",
    "httpApi.port",
    "httpApi.ownerKey",
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE_YAML: &str = r#"
joystream:
  channelCollaborator:
    memberId: "123"
    account: "5CollaboratorAccount"
  app:
    name: "yt-synch"
endpoints:
  queryNode: "https://query.example/graphql"
  joystreamNodeWs: "wss://rpc.example"
directories:
  assets: "/data/assets"
limits:
  storage: "50G"
intervals:
  youtubePolling: 30
  checkStorageNodeResponseTimes: 120
youtube:
  clientId: "cid"
  clientSecret: "secret"
env: "production"
creatorOnboardingRequirements:
  minimumSubscribersCount: 50
  minimumVideosCount: 5
  minimumChannelAgeHours: 720
httpApi:
  port: 3001
  ownerKey: "5OperatorKey"
"#;

    #[test]
    fn test_env_name_round_trip() {
        for path in KNOWN_PATHS {
            let name = env_key(path);
            assert!(name.starts_with(ENV_PREFIX));
            assert_eq!(
                config_path_of(&name).as_deref(),
                Some(*path),
                "round trip failed for {path} via {name}"
            );
        }
    }

    #[test]
    fn test_env_name_encoding_shape() {
        assert_eq!(
            env_key("intervals.youtubePolling"),
            "YT_SYNCH__INTERVALS__YOUTUBE_POLLING"
        );
        assert_eq!(env_key("httpApi.ownerKey"), "YT_SYNCH__HTTP_API__OWNER_KEY");
        assert_eq!(config_path_of("OTHER__THING"), None);
    }

    #[test]
    fn test_full_document_parses() {
        let mut tree: Value = serde_yaml::from_str(SAMPLE_YAML).unwrap();
        apply_env_overrides(&mut tree, Vec::<(String, String)>::new());
        let config: SyncConfig = serde_json::from_value(tree).unwrap();

        assert_eq!(config.limits.daily_api_quota.sync, 9_500);
        assert_eq!(config.limits.daily_api_quota.signup, 500);
        assert_eq!(config.limits.storage_bytes().unwrap(), 50 * (1u64 << 30));
        assert_eq!(config.polling_interval(), Duration::from_secs(30 * 60));
        assert_eq!(config.intervals.youtube_polling_fanout, 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides_coerce_by_file_type() {
        let mut tree: Value = serde_yaml::from_str(SAMPLE_YAML).unwrap();
        apply_env_overrides(
            &mut tree,
            vec![
                // Numeric file value: the override parses as a number.
                (
                    "YT_SYNCH__INTERVALS__YOUTUBE_POLLING".to_string(),
                    "5".to_string(),
                ),
                // String file value: the override stays a string.
                (
                    "YT_SYNCH__JOYSTREAM__CHANNEL_COLLABORATOR__MEMBER_ID".to_string(),
                    "456".to_string(),
                ),
                // Absent key: a JSON scalar is accepted.
                (
                    "YT_SYNCH__LIMITS__MAX_CONCURRENT_DOWNLOADS".to_string(),
                    "4".to_string(),
                ),
                // Unrecognized names are ignored.
                ("PATH".to_string(), "/usr/bin".to_string()),
            ],
        );

        let config: SyncConfig = serde_json::from_value(tree).unwrap();
        assert_eq!(config.intervals.youtube_polling, 5);
        assert_eq!(config.joystream.channel_collaborator.member_id, "456");
        assert_eq!(config.limits.max_concurrent_downloads, 4);
    }

    #[test]
    fn test_unset_values_remove_keys() {
        let mut tree: Value = serde_yaml::from_str(SAMPLE_YAML).unwrap();
        set_path(
            &mut tree,
            &["youtube".to_string(), "apiKey".to_string()],
            json!("stale-key"),
        );

        apply_env_overrides(
            &mut tree,
            vec![("YT_SYNCH__YOUTUBE__API_KEY".to_string(), "off".to_string())],
        );
        let config: SyncConfig = serde_json::from_value(tree).unwrap();
        assert!(config.youtube.api_key.is_none());
    }

    #[test]
    fn test_owner_key_is_required() {
        let mut tree: Value = serde_yaml::from_str(SAMPLE_YAML).unwrap();
        apply_env_overrides(
            &mut tree,
            vec![(
                "YT_SYNCH__HTTP_API__OWNER_KEY".to_string(),
                "null".to_string(),
            )],
        );
        assert!(serde_json::from_value::<SyncConfig>(tree).is_err());
    }

    #[test]
    fn test_parse_byte_sizes() {
        assert_eq!(parse_byte_size("1024").unwrap(), 1024);
        assert_eq!(parse_byte_size("10K").unwrap(), 10 * 1024);
        assert_eq!(parse_byte_size("5M").unwrap(), 5 * (1 << 20));
        assert_eq!(parse_byte_size("50G").unwrap(), 50 * (1u64 << 30));
        assert_eq!(parse_byte_size("2TB").unwrap(), 2 * (1u64 << 40));
        assert!(parse_byte_size("fifty").is_err());
    }
}
