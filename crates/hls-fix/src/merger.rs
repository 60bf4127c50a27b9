//! Incremental merge/split state machine.
//!
//! Partition `i` lives in `<workdir>/<i>.m3u8` and is muxed into
//! `<workdir>/intermediate/<i>.mp4`. Only the last partition is ever split,
//! so the chain grows at its tail and the number of splits is bounded by the
//! segment count minus one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hls::Playlist;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{ConcatMethod, MergeError, MuxOutcome, Muxer};

pub const INTERMEDIATE_DIR_NAME: &str = "intermediate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Partition artifacts in concatenation order.
    pub artifacts: Vec<PathBuf>,
    pub splits: usize,
}

pub struct IncrementalMerger {
    muxer: Arc<dyn Muxer>,
    concat_method: ConcatMethod,
}

fn partition_path(workdir: &Path, index: usize) -> PathBuf {
    workdir.join(format!("{index}.m3u8"))
}

fn artifact_path(intermediate: &Path, index: usize) -> PathBuf {
    intermediate.join(format!("{index}.mp4"))
}

/// Index at which to split `partition` given the last segment the muxer opened.
///
/// A partition is never split before its own first segment.
fn split_point(
    partition: &Playlist,
    last_opened: Option<&str>,
    index: usize,
) -> Result<usize, MergeError> {
    let position = match last_opened {
        Some(name) => partition
            .position_of(name)
            .ok_or_else(|| MergeError::UnknownSegment {
                name: name.to_string(),
                partition: index,
            })?,
        None => 0,
    };
    Ok(position.max(1))
}

impl IncrementalMerger {
    pub fn new(muxer: Arc<dyn Muxer>, concat_method: ConcatMethod) -> Self {
        Self {
            muxer,
            concat_method,
        }
    }

    /// Remux the segments listed in `local_playlist` into `output`.
    ///
    /// Partition files and intermediate artifacts are written next to
    /// `local_playlist`.
    pub async fn merge(
        &self,
        local_playlist: &Path,
        output: &Path,
        token: &CancellationToken,
    ) -> Result<MergeReport, MergeError> {
        let local_playlist = std::path::absolute(local_playlist)?;
        let output = std::path::absolute(output)?;
        let workdir = local_playlist
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let intermediate = workdir.join(INTERMEDIATE_DIR_NAME);
        tokio::fs::create_dir_all(&intermediate).await?;

        let mut current = Playlist::parse_media(&tokio::fs::read(&local_playlist).await?)?;
        if current.is_empty() {
            return Err(MergeError::EmptyPlaylist);
        }

        let mut index = 1;
        tokio::fs::write(partition_path(&workdir, index), current.to_m3u8()).await?;

        loop {
            let playlist = partition_path(&workdir, index);
            let artifact = artifact_path(&intermediate, index);
            // A single segment cannot be split any further.
            let watch = current.len() > 1;
            debug!(partition = index, segments = current.len(), watch, "Muxing partition");

            let last_opened = match self.muxer.attempt(&playlist, &artifact, watch, token).await? {
                MuxOutcome::Completed => break,
                MuxOutcome::Discontinuity { last_opened } => last_opened,
            };

            let at = split_point(&current, last_opened.as_deref(), index)?;
            let (head, tail) = current.split_at(at)?;
            info!(
                partition = index,
                split_at = %tail.segments[0].uri,
                "Splitting partition at discontinuity"
            );
            tokio::fs::write(&playlist, head.to_m3u8()).await?;
            tokio::fs::write(partition_path(&workdir, index + 1), tail.to_m3u8()).await?;

            match self.muxer.attempt(&playlist, &artifact, false, token).await? {
                MuxOutcome::Completed => {}
                MuxOutcome::Discontinuity { .. } => {
                    return Err(MergeError::UnexpectedDiscontinuity { partition: index });
                }
            }

            index += 1;
            current = tail;
        }

        let artifacts: Vec<_> = (1..=index)
            .map(|i| artifact_path(&intermediate, i))
            .collect();
        self.muxer
            .concat(&artifacts, &intermediate, &output, self.concat_method, token)
            .await?;

        Ok(MergeReport {
            artifacts,
            splits: index - 1,
        })
    }
}
