use std::path::PathBuf;

/// Progress notifications emitted by the segment coordinator.
///
/// Events are informational only; sinks cannot influence control flow.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    SegmentsDownloadInitiated {
        segment_count: usize,
    },
    SegmentDownloadSucceeded {
        index: usize,
        path: PathBuf,
    },
    SegmentDownloadFailed {
        index: usize,
        url: String,
    },
    SegmentsDownloadFinished {
        success_count: usize,
        failure_count: usize,
    },
}

/// Receiver for [`DownloadEvent`]s.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &DownloadEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_event(&self, _event: &DownloadEvent) {}
}
