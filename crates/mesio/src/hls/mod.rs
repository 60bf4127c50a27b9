// VOD HLS download: retrying transfers, concurrent segment fan-out, playlist loading

mod coordinator;
pub mod events;
mod playlist;
mod retry;
mod transfer;

// Re-exports for easier access
pub use coordinator::{CoordinatorConfig, DownloadSummary, SegmentCoordinator, SegmentJob};
pub use events::{DownloadEvent, NoopProgress, ProgressSink};
pub use playlist::{
    REMOTE_PLAYLIST_NAME, RemotePlaylist, RemotePlaylistLoader, VARIANT_PLAYLIST_NAME,
};
pub use retry::{RetryAction, RetryPolicy, is_retryable_reqwest_error, retry_with_backoff};
pub use transfer::{ResumableTransfer, SegmentTransfer, TransferOutcome, incomplete_path};
