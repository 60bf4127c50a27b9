//! Segment download engine for VOD HLS streams.
//!
//! Provides a resumable single-file transfer, a bounded concurrent
//! coordinator that fetches every segment of a playlist, and a loader that
//! resolves a remote (possibly master) playlist into a media playlist.

pub mod client;
pub mod config;
pub mod error;
pub mod hls;

pub use client::create_client;
pub use config::{DEFAULT_USER_AGENT, DownloaderConfig};
pub use error::DownloadError;
pub use crate::hls::{
    CoordinatorConfig, DownloadEvent, DownloadSummary, NoopProgress, ProgressSink,
    REMOTE_PLAYLIST_NAME, RemotePlaylist, RemotePlaylistLoader, ResumableTransfer, RetryPolicy,
    SegmentCoordinator, SegmentJob, SegmentTransfer, TransferOutcome, VARIANT_PLAYLIST_NAME,
};
