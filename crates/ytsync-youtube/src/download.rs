//! Media staging via yt-dlp.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::process::Command;
use tracing::{debug, info, warn};

use ytsync_models::YtVideo;

use crate::error::{YoutubeError, YoutubeResult};

/// A staged media file in the local asset directory.
#[derive(Debug, Clone)]
pub struct StagedMedia {
    pub path: PathBuf,
    pub size: u64,
}

/// Fetches a video's media bytes and thumbnail into the asset directory.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_media(&self, video: &YtVideo, dest_dir: &Path) -> YoutubeResult<StagedMedia>;

    async fn fetch_thumbnail(&self, video: &YtVideo, dest_dir: &Path) -> YoutubeResult<StagedMedia>;
}

/// Path of the staged media file for a video.
pub fn media_path(dest_dir: &Path, video_id: &str) -> PathBuf {
    dest_dir.join(format!("{video_id}.mp4"))
}

/// Path of the staged thumbnail for a video.
pub fn thumbnail_path(dest_dir: &Path, video_id: &str) -> PathBuf {
    dest_dir.join(format!("{video_id}.jpg"))
}

/// Production fetcher shelling out to yt-dlp for media and plain HTTP for
/// thumbnails.
pub struct YtDlpFetcher {
    http: Client,
}

impl YtDlpFetcher {
    pub fn new() -> YoutubeResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch_media(&self, video: &YtVideo, dest_dir: &Path) -> YoutubeResult<StagedMedia> {
        let output_path = media_path(dest_dir, &video.id);

        // A prior attempt may have left a complete file behind.
        if let Ok(metadata) = tokio::fs::metadata(&output_path).await {
            if metadata.len() > 0 {
                info!(video_id = %video.id, "Reusing staged media file");
                return Ok(StagedMedia {
                    path: output_path,
                    size: metadata.len(),
                });
            }
        }

        which::which("yt-dlp").map_err(|_| YoutubeError::YtDlpNotFound)?;
        tokio::fs::create_dir_all(dest_dir).await?;

        let url = format!("https://www.youtube.com/watch?v={}", video.id);
        debug!(video_id = %video.id, "Invoking yt-dlp");

        let output = Command::new("yt-dlp")
            .args([
                "-f",
                "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
                "--no-playlist",
                "-o",
            ])
            .arg(&output_path)
            .arg(&url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(video_id = %video.id, "yt-dlp failed: {}", stderr.lines().last().unwrap_or(""));
            return Err(YoutubeError::from_ytdlp_stderr(&stderr));
        }

        let metadata = tokio::fs::metadata(&output_path)
            .await
            .map_err(|_| YoutubeError::download_failed("yt-dlp produced no output file"))?;
        info!(
            video_id = %video.id,
            size_mb = metadata.len() as f64 / 1_048_576.0,
            "Staged media file"
        );
        Ok(StagedMedia {
            path: output_path,
            size: metadata.len(),
        })
    }

    async fn fetch_thumbnail(&self, video: &YtVideo, dest_dir: &Path) -> YoutubeResult<StagedMedia> {
        let output_path = thumbnail_path(dest_dir, &video.id);

        if let Ok(metadata) = tokio::fs::metadata(&output_path).await {
            if metadata.len() > 0 {
                return Ok(StagedMedia {
                    path: output_path,
                    size: metadata.len(),
                });
            }
        }

        let url = [
            video.thumbnails.standard.as_str(),
            video.thumbnails.high.as_str(),
            video.thumbnails.medium.as_str(),
            video.thumbnails.default.as_str(),
        ]
        .into_iter()
        .find(|u| !u.is_empty())
        .ok_or_else(|| YoutubeError::MediaUnavailable(format!("video {} has no thumbnail", video.id)))?
        .to_string();

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(YoutubeError::download_failed(format!(
                "thumbnail fetch returned {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        tokio::fs::write(&output_path, &bytes).await?;
        Ok(StagedMedia {
            path: output_path,
            size: bytes.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_paths() {
        let dir = Path::new("/var/assets");
        assert_eq!(media_path(dir, "vid-1"), PathBuf::from("/var/assets/vid-1.mp4"));
        assert_eq!(
            thumbnail_path(dir, "vid-1"),
            PathBuf::from("/var/assets/vid-1.jpg")
        );
    }
}
