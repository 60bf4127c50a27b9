// Segment Download Coordinator
//
// Resolves every segment of a remote playlist, writes the local playlist
// naming the files by original index, and fans the transfers out across a
// bounded set of concurrent jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use hls::{Playlist, Segment};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::events::{DownloadEvent, NoopProgress, ProgressSink};
use super::transfer::{SegmentTransfer, TransferOutcome};
use crate::DownloadError;

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on concurrent transfers. Clamped to the segment count.
    pub jobs: usize,
    /// Extension of the local segment files, without the dot.
    pub extension: String,
}

impl CoordinatorConfig {
    /// Twice the number of available processing units.
    pub fn default_jobs() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            * 2
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            jobs: Self::default_jobs(),
            extension: "ts".to_string(),
        }
    }
}

/// One segment to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentJob {
    pub index: usize,
    pub source_url: Url,
    pub destination: PathBuf,
}

/// Counts for a fully successful batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
}

pub struct SegmentCoordinator {
    transfer: Arc<dyn SegmentTransfer>,
    config: CoordinatorConfig,
    sink: Arc<dyn ProgressSink>,
}

impl SegmentCoordinator {
    pub fn new(transfer: Arc<dyn SegmentTransfer>, config: CoordinatorConfig) -> Self {
        Self {
            transfer,
            config,
            sink: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Build the job list and the matching local playlist.
    pub fn plan(
        &self,
        remote_url: &Url,
        remote: &Playlist,
        dir: &Path,
    ) -> Result<(Vec<SegmentJob>, Playlist), DownloadError> {
        let mut jobs = Vec::with_capacity(remote.len());
        let mut local = Vec::with_capacity(remote.len());
        for (index, segment) in remote.segments.iter().enumerate() {
            let source_url = remote_url
                .join(&segment.uri)
                .map_err(|e| DownloadError::invalid_url(&segment.uri, e.to_string()))?;
            let file_name = format!("{index}.{}", self.config.extension);
            jobs.push(SegmentJob {
                index,
                source_url,
                destination: dir.join(&file_name),
            });
            local.push(Segment::new(file_name, segment.duration));
        }
        Ok((jobs, Playlist::new(remote.target_duration, local)))
    }

    /// Download every segment of `remote`, writing the local playlist to
    /// `local_playlist` first. Segment files land next to it.
    ///
    /// Returns [`DownloadError::SegmentsFailed`] when any segment could not be
    /// fetched and [`DownloadError::Cancelled`] when `token` fires.
    pub async fn download_all(
        &self,
        remote_url: &Url,
        remote: &Playlist,
        local_playlist: &Path,
        token: &CancellationToken,
    ) -> Result<DownloadSummary, DownloadError> {
        if remote.is_empty() {
            return Err(DownloadError::EmptyPlaylist);
        }

        let dir = local_playlist.parent().unwrap_or_else(|| Path::new("."));
        let (jobs, local) = self.plan(remote_url, remote, dir)?;
        tokio::fs::write(local_playlist, local.to_m3u8()).await?;

        let total = jobs.len();
        let workers = self.config.jobs.clamp(1, total);
        info!(segments = total, workers, "Downloading segments");
        self.sink.on_event(&DownloadEvent::SegmentsDownloadInitiated {
            segment_count: total,
        });

        let mut pending = jobs.into_iter();
        let mut in_flight = FuturesUnordered::new();
        for job in pending.by_ref().take(workers) {
            in_flight.push(self.run_job(job, token));
        }

        let mut downloaded = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;

        loop {
            let (job, result) = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Cancellation requested, abandoning in-flight segments");
                    return Err(DownloadError::Cancelled);
                }
                next = in_flight.next() => match next {
                    Some(done) => done,
                    None => break,
                },
            };

            match result {
                Ok(outcome) => {
                    match outcome {
                        TransferOutcome::Skipped => skipped += 1,
                        TransferOutcome::Downloaded { .. } => downloaded += 1,
                    }
                    self.sink.on_event(&DownloadEvent::SegmentDownloadSucceeded {
                        index: job.index,
                        path: job.destination,
                    });
                }
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(e) => {
                    failed += 1;
                    warn!(index = job.index, url = %job.source_url, error = %e, "Segment download failed");
                    self.sink.on_event(&DownloadEvent::SegmentDownloadFailed {
                        index: job.index,
                        url: job.source_url.to_string(),
                    });
                }
            }

            if let Some(job) = pending.next() {
                in_flight.push(self.run_job(job, token));
            }
        }

        let succeeded = downloaded + skipped;
        self.sink.on_event(&DownloadEvent::SegmentsDownloadFinished {
            success_count: succeeded,
            failure_count: failed,
        });
        debug!(downloaded, skipped, failed, "Segment batch finished");

        if failed > 0 {
            return Err(DownloadError::SegmentsFailed { failed, total });
        }
        Ok(DownloadSummary {
            downloaded,
            skipped,
        })
    }

    async fn run_job(
        &self,
        job: SegmentJob,
        token: &CancellationToken,
    ) -> (SegmentJob, Result<TransferOutcome, DownloadError>) {
        let result = self
            .transfer
            .transfer(&job.source_url, &job.destination, false, token)
            .await;
        (job, result)
    }
}
