//! YouTube-side error types.

use thiserror::Error;

/// Result type for YouTube operations.
pub type YoutubeResult<T> = Result<T, YoutubeError>;

/// Onboarding criterion a channel can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingCriterion {
    Subscribers,
    Videos,
    CreationDate,
}

impl std::fmt::Display for OnboardingCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OnboardingCriterion::Subscribers => "Subscribers",
            OnboardingCriterion::Videos => "Videos",
            OnboardingCriterion::CreationDate => "CreationDate",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
pub enum YoutubeError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("Channel already registered as on-chain channel {0}")]
    ChannelAlreadyRegistered(u64),

    #[error("Channel is suspended in the program: {0}")]
    ChannelStatusSuspended(String),

    #[error("Channel fails the {criterion} requirement: {details}")]
    CriteriaUnmet {
        criterion: OnboardingCriterion,
        details: String,
    },

    #[error("Daily API quota exhausted: {0}")]
    QuotaLimitExceeded(String),

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("yt-dlp binary not found on PATH")]
    YtDlpNotFound,

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Media unavailable upstream: {0}")]
    MediaUnavailable(String),

    #[error("Unexpected response: {0}")]
    BadResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl YoutubeError {
    pub fn bad_response(msg: impl Into<String>) -> Self {
        Self::BadResponse(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    /// Transient errors the caller should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            YoutubeError::Network(_) | YoutubeError::DownloadFailed(_) | YoutubeError::Io(_)
        )
    }

    /// Terminal for the affected video: the bytes can never be fetched.
    pub fn is_video_terminal(&self) -> bool {
        matches!(
            self,
            YoutubeError::VideoNotFound(_) | YoutubeError::MediaUnavailable(_)
        )
    }

    /// Terminal for the affected channel: authorization is gone.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, YoutubeError::AuthorizationFailed(_))
    }

    /// Classify a yt-dlp stderr tail into unavailable-forever vs transient.
    ///
    /// Patterns cover private, deleted, region- and age-blocked videos as
    /// well as live content that cannot be fetched as a file.
    pub fn from_ytdlp_stderr(stderr: &str) -> Self {
        let msg = stderr.to_lowercase();
        let permanent = msg.contains("private video")
            || msg.contains("video is private")
            || msg.contains("video unavailable")
            || msg.contains("has been removed")
            || msg.contains("account associated with this video has been terminated")
            || (msg.contains("age") && (msg.contains("restrict") || msg.contains("verif")))
            || (msg.contains("copyright") && msg.contains("block"))
            || msg.contains("not available in your country")
            || msg.contains("live event")
            || msg.contains("premieres in");
        if permanent {
            YoutubeError::MediaUnavailable(stderr.lines().last().unwrap_or("").to_string())
        } else {
            YoutubeError::DownloadFailed(stderr.lines().last().unwrap_or("").to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ytdlp_stderr_classification() {
        let err = YoutubeError::from_ytdlp_stderr("ERROR: Private video. Sign in if ...");
        assert!(matches!(err, YoutubeError::MediaUnavailable(_)));
        assert!(err.is_video_terminal());

        let err = YoutubeError::from_ytdlp_stderr("ERROR: Video unavailable");
        assert!(err.is_video_terminal());

        let err = YoutubeError::from_ytdlp_stderr("ERROR: unable to download video data: timed out");
        assert!(matches!(err, YoutubeError::DownloadFailed(_)));
        assert!(err.is_retryable());
    }
}
