//! Application-wide error types.

use std::path::{Path, PathBuf};

use hls_fix::MergeError;
use mesio::DownloadError;
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("failed to fetch playlist {url}: {source}")]
    PlaylistFetch { url: String, source: DownloadError },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the run was stopped by the user.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Download(e) | Self::PlaylistFetch { source: e, .. } => e.is_cancelled(),
            Self::Merge(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Whether the whole entry may be attempted again after a pause.
    ///
    /// Playlist fetches have already been retried by the transfer layer.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Download(e) => e.is_retryable(),
            Self::Merge(MergeError::MuxerFailed { .. } | MergeError::ConcatFailed { .. }) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_never_retryable() {
        let errors = [
            Error::from(DownloadError::Cancelled),
            Error::from(MergeError::Cancelled),
            Error::PlaylistFetch {
                url: "https://example.com/a.m3u8".into(),
                source: DownloadError::Cancelled,
            },
        ];
        for err in errors {
            assert!(err.is_cancelled());
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_retry_classification() {
        assert!(Error::from(DownloadError::SegmentsFailed { failed: 2, total: 9 }).is_retryable());
        assert!(
            Error::from(MergeError::MuxerFailed {
                status: "exit status: 1".into(),
                detail: String::new(),
            })
            .is_retryable()
        );
        assert!(!Error::from(DownloadError::EmptyPlaylist).is_retryable());
        assert!(!Error::from(MergeError::EmptyPlaylist).is_retryable());
        assert!(
            !Error::PlaylistFetch {
                url: "https://example.com/a.m3u8".into(),
                source: DownloadError::configuration("x"),
            }
            .is_retryable()
        );
    }
}
