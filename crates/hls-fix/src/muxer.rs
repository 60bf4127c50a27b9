use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{ConcatMethod, MergeError};

/// Result of muxing one playlist partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxOutcome {
    /// The artifact was written.
    Completed,
    /// A discontinuity was reported. The partial artifact has been removed.
    /// `last_opened` is the file name of the most recently opened segment.
    Discontinuity { last_opened: Option<String> },
}

/// External muxer capability.
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Remux `playlist` into `output`. Discontinuity diagnostics are only
    /// acted upon when `watch_discontinuities` is set.
    async fn attempt(
        &self,
        playlist: &Path,
        output: &Path,
        watch_discontinuities: bool,
        token: &CancellationToken,
    ) -> Result<MuxOutcome, MergeError>;

    /// Join `artifacts` (all inside `dir`) in order into `output`.
    async fn concat(
        &self,
        artifacts: &[PathBuf],
        dir: &Path,
        output: &Path,
        method: ConcatMethod,
        token: &CancellationToken,
    ) -> Result<(), MergeError>;
}
