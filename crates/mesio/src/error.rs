use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("playlist error: {source}")]
    Playlist {
        #[from]
        source: hls::PlaylistError,
    },

    #[error("playlist contains no segments")]
    EmptyPlaylist,

    #[error("{failed} of {total} segments failed to download")]
    SegmentsFailed { failed: usize, total: usize },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether retrying the whole operation later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::Playlist { .. }
            | Self::EmptyPlaylist
            | Self::Configuration { .. } => false,
            Self::HttpStatus { status, .. } => {
                !status.is_client_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { .. } | Self::Io { .. } | Self::SegmentsFailed { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(!DownloadError::Cancelled.is_retryable());
        assert!(!DownloadError::EmptyPlaylist.is_retryable());
        assert!(DownloadError::SegmentsFailed { failed: 1, total: 3 }.is_retryable());
        assert!(
            DownloadError::http_status(StatusCode::BAD_GATEWAY, "http://x/", "test").is_retryable()
        );
        assert!(
            !DownloadError::http_status(StatusCode::NOT_FOUND, "http://x/", "test").is_retryable()
        );
        assert!(
            DownloadError::http_status(StatusCode::TOO_MANY_REQUESTS, "http://x/", "test")
                .is_retryable()
        );
    }
}
