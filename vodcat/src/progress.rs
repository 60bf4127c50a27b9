//! Terminal progress bar fed by segment download events.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use mesio::{DownloadEvent, ProgressSink};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments ({eta}) {msg}";

pub struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(0))
    }

    fn with_bar(bar: ProgressBar) -> Self {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        Self { bar }
    }

    /// A sink that tracks counts without drawing.
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::with_draw_target(
            Some(0),
            ProgressDrawTarget::hidden(),
        ))
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }

    pub fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }
}

impl Default for ProgressBarSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ProgressBarSink {
    fn on_event(&self, event: &DownloadEvent) {
        match event {
            DownloadEvent::SegmentsDownloadInitiated { segment_count } => {
                self.bar.reset();
                self.bar.set_length(*segment_count as u64);
                self.bar.set_message("");
            }
            DownloadEvent::SegmentDownloadSucceeded { .. } => self.bar.inc(1),
            DownloadEvent::SegmentDownloadFailed { index, .. } => {
                self.bar.inc(1);
                self.bar.set_message(format!("segment {index} failed"));
            }
            DownloadEvent::SegmentsDownloadFinished {
                failure_count: 0, ..
            } => self.bar.finish_and_clear(),
            DownloadEvent::SegmentsDownloadFinished { failure_count, .. } => {
                self.bar
                    .abandon_with_message(format!("{failure_count} segments failed"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_bar_follows_events() {
        let sink = ProgressBarSink::hidden();
        sink.on_event(&DownloadEvent::SegmentsDownloadInitiated { segment_count: 2 });
        assert_eq!(sink.length(), Some(2));

        sink.on_event(&DownloadEvent::SegmentDownloadSucceeded {
            index: 1,
            path: PathBuf::from("1.ts"),
        });
        sink.on_event(&DownloadEvent::SegmentDownloadFailed {
            index: 0,
            url: "https://example.com/0.ts".into(),
        });
        assert_eq!(sink.position(), 2);
        assert!(!sink.is_finished());

        sink.on_event(&DownloadEvent::SegmentsDownloadFinished {
            success_count: 1,
            failure_count: 1,
        });
        assert!(sink.is_finished());
    }
}
