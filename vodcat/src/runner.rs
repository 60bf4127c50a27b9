//! Per-entry and batch processing.
//!
//! An entry is one URL and one output file: validate the output, prepare
//! the working directory, then load, download and merge with whole-entry
//! retries, and finally move the result into place and clean up.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hls_fix::{ConcatMethod, IncrementalMerger, Muxer};
use mesio::{
    CoordinatorConfig, DownloadError, NoopProgress, ProgressSink, RemotePlaylistLoader,
    SegmentCoordinator, SegmentTransfer,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::database::WorkdirCache;
use crate::progress::ProgressBarSink;
use crate::utils::fs::{io_error, map_path, move_file, move_to_backup, probe_writable, rmdir_p};
use crate::workdir::prepare_working_directory;
use crate::{Error, Result};

/// Local playlist naming the downloaded segment files.
pub const LOCAL_PLAYLIST_NAME: &str = "local.m3u8";

/// Pause before retrying a failed entry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Settings shared by every entry of a run.
#[derive(Debug, Clone)]
pub struct EntryOptions {
    /// Move an existing output aside and replace it.
    pub force: bool,
    /// Treat an existing output as done instead of as an error.
    pub exist_ok: bool,
    pub workdir: Option<PathBuf>,
    pub workroot: Option<PathBuf>,
    pub wipe: bool,
    /// Keep the working directory after success.
    pub keep: bool,
    /// Concurrent segment transfers; `None` uses the coordinator default.
    pub jobs: Option<usize>,
    pub concat_method: ConcatMethod,
    /// Whole-entry retries after a recoverable failure.
    pub retries: u32,
    pub progress: bool,
    pub retry_delay: Duration,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            force: false,
            exist_ok: false,
            workdir: None,
            workroot: None,
            wipe: false,
            keep: false,
            jobs: None,
            concat_method: ConcatMethod::default(),
            retries: 2,
            progress: false,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Completed(PathBuf),
    /// The output existed and `exist_ok` was set.
    AlreadyExists(PathBuf),
}

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub url: String,
    pub output: PathBuf,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// `<stem>.mp4` from the last path component of `url`.
pub fn derive_output(url: &Url) -> Result<PathBuf> {
    let stem = Path::new(url.path())
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    if stem.is_empty() || stem.starts_with('.') {
        return Err(Error::validation(format!(
            "cannot auto-determine an output file from {url}"
        )));
    }
    Ok(PathBuf::from(format!("{stem}.mp4")))
}

/// Parse a batch manifest of `URL<TAB>filename` lines. Outputs are resolved
/// against `target_dir`.
pub fn parse_manifest(content: &str, target_dir: &Path) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim().trim_start_matches('\u{feff}');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split('\t');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(url), Some(filename), None) if !url.is_empty() && !filename.is_empty() => {
                entries.push(ManifestEntry {
                    url: url.to_string(),
                    output: target_dir.join(filename),
                });
            }
            _ => {
                return Err(Error::validation(format!(
                    "malformed line in batch mode manifest: {line}"
                )));
            }
        }
    }
    Ok(entries)
}

async fn copy_mtime(from: &Path, to: &Path) -> std::io::Result<()> {
    let modified = tokio::fs::metadata(from).await?.modified()?;
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(to)
        .await?
        .into_std()
        .await;
    tokio::task::spawn_blocking(move || file.set_modified(modified))
        .await
        .map_err(std::io::Error::other)?
}

pub struct Runner {
    transfer: Arc<dyn SegmentTransfer>,
    muxer: Arc<dyn Muxer>,
    cache: Arc<WorkdirCache>,
    options: EntryOptions,
}

impl Runner {
    pub fn new(
        transfer: Arc<dyn SegmentTransfer>,
        muxer: Arc<dyn Muxer>,
        cache: Arc<WorkdirCache>,
        options: EntryOptions,
    ) -> Self {
        Self {
            transfer,
            muxer,
            cache,
            options,
        }
    }

    pub fn options(&self) -> &EntryOptions {
        &self.options
    }

    fn progress_sink(&self) -> Arc<dyn ProgressSink> {
        if self.options.progress {
            Arc::new(ProgressBarSink::new())
        } else {
            Arc::new(NoopProgress)
        }
    }

    /// Download `url` and merge it into `output` (derived from the URL when
    /// `None`).
    pub async fn process_entry(
        &self,
        url: &str,
        output: Option<&Path>,
        token: &CancellationToken,
    ) -> Result<EntryOutcome> {
        let opts = &self.options;
        let remote_url = Url::parse(url)
            .map_err(|e| Error::from(DownloadError::invalid_url(url, e.to_string())))?;

        let output = match output {
            Some(path) => path.to_path_buf(),
            None => {
                let derived = derive_output(&remote_url)?;
                info!("output not specified; using \"{}\"", derived.display());
                derived
            }
        };

        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !parent.exists() {
            return Err(Error::validation(format!(
                "\"{}\" does not exist",
                parent.display()
            )));
        }
        if output.extension().is_none() {
            return Err(Error::validation("output must have a suffix, e.g., .mp4"));
        }

        let mut backup = None;
        if output.exists() {
            if !opts.force {
                if opts.exist_ok {
                    warn!("\"{}\" already exists", output.display());
                    return Ok(EntryOutcome::AlreadyExists(output));
                }
                return Err(Error::validation(format!(
                    "\"{}\" already exists; specify --force to overwrite it",
                    output.display()
                )));
            }
            backup = Some(move_to_backup(&output)?);
        }

        let merge_dest = match &opts.workroot {
            Some(root) => map_path(&output, root)?,
            None => output.clone(),
        };
        if merge_dest.exists() && !opts.force {
            return Err(Error::validation(format!(
                "\"{}\" already exists; specify --force to overwrite it, or manually remove it and try again",
                merge_dest.display()
            )));
        }

        probe_writable(&output).await.map_err(|_| {
            Error::validation(format!(
                "\"{}\" is not a valid path or is not writable",
                output.display()
            ))
        })?;

        let workdir = prepare_working_directory(
            url,
            &output,
            opts.workroot.as_deref(),
            opts.workdir.as_deref(),
            opts.wipe,
            &self.cache,
        )
        .await?;
        debug!(workdir = %workdir.display(), "Working directory ready");

        let mut attempt = 0;
        let remote_playlist = loop {
            match self.run_once(&remote_url, &workdir, &merge_dest, token).await {
                Ok(path) => break path,
                Err(e) if e.is_retryable() && attempt < opts.retries => {
                    attempt += 1;
                    error!("{e}");
                    warn!(
                        "retrying ({attempt}/{}) in {} seconds...",
                        opts.retries,
                        opts.retry_delay.as_secs()
                    );
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(DownloadError::Cancelled.into()),
                        _ = tokio::time::sleep(opts.retry_delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        };

        self.finish(url, &output, &merge_dest, &workdir, &remote_playlist, backup)
            .await?;
        Ok(EntryOutcome::Completed(output))
    }

    /// One pass of load, download and merge. Returns the local copy of the
    /// remote playlist.
    async fn run_once(
        &self,
        url: &Url,
        workdir: &Path,
        merge_dest: &Path,
        token: &CancellationToken,
    ) -> Result<PathBuf> {
        let loader = RemotePlaylistLoader::new(self.transfer.clone());
        let remote = loader
            .load(url, workdir, token)
            .await
            .map_err(|source| Error::PlaylistFetch {
                url: url.to_string(),
                source,
            })?;
        info!("downloaded {}", remote.path.display());

        let mut config = CoordinatorConfig::default();
        if let Some(jobs) = self.options.jobs {
            config.jobs = jobs;
        }
        let coordinator =
            SegmentCoordinator::new(self.transfer.clone(), config).with_progress(self.progress_sink());
        let local_playlist = workdir.join(LOCAL_PLAYLIST_NAME);
        coordinator
            .download_all(&remote.url, &remote.playlist, &local_playlist, token)
            .await?;

        let merger = IncrementalMerger::new(self.muxer.clone(), self.options.concat_method);
        let report = merger.merge(&local_playlist, merge_dest, token).await?;
        info!(
            splits = report.splits,
            output = %merge_dest.display(),
            "Merged segments"
        );
        Ok(remote.path)
    }

    async fn finish(
        &self,
        url: &str,
        output: &Path,
        merge_dest: &Path,
        workdir: &Path,
        remote_playlist: &Path,
        backup: Option<PathBuf>,
    ) -> Result<()> {
        let workroot = self.options.workroot.as_deref();

        if output != merge_dest {
            info!("moving \"{}\" to \"{}\"...", merge_dest.display(), output.display());
            move_file(merge_dest, output).await?;
            if let Some(parent) = merge_dest.parent() {
                rmdir_p(parent, workroot);
            }
        }

        if let Some(backup) = backup {
            info!("removing backup \"{}\"...", backup.display());
            if let Err(e) = tokio::fs::remove_file(&backup).await {
                warn!(error = %e, "failed to remove backup \"{}\"", backup.display());
            }
        }

        if let Err(e) = copy_mtime(remote_playlist, output).await {
            warn!(error = %e, "failed to set mtime on {}", output.display());
        }

        if !self.options.keep {
            self.cache.remove(url).await;
            tokio::fs::remove_dir_all(workdir)
                .await
                .map_err(|e| io_error("removing", workdir, e))?;
            if workroot.is_some()
                && let Some(parent) = workdir.parent()
            {
                rmdir_p(parent, workroot);
            }
        }
        Ok(())
    }

    /// Process every entry of the manifest at `manifest`, in order.
    ///
    /// A failed entry does not stop the batch; cancellation does.
    pub async fn process_batch(
        &self,
        manifest: &Path,
        remove_manifest_on_success: bool,
        token: &CancellationToken,
    ) -> Result<BatchReport> {
        let content = tokio::fs::read(manifest)
            .await
            .map_err(|e| io_error("reading manifest", manifest, e))?;
        let content = String::from_utf8(content).map_err(|_| {
            Error::validation(format!(
                "cannot decode batch mode manifest {} as utf-8",
                manifest.display()
            ))
        })?;
        let target_dir = manifest.parent().unwrap_or_else(|| Path::new("."));
        let entries = parse_manifest(&content, target_dir)?;

        let mut report = BatchReport::default();
        let count = entries.len();
        for (i, entry) in entries.iter().enumerate() {
            eprintln!(
                "[{}/{}] Downloading {} into \"{}\"...",
                i + 1,
                count,
                entry.url,
                entry.output.display()
            );
            match self.process_entry(&entry.url, Some(&entry.output), token).await {
                Ok(EntryOutcome::Completed(_)) => report.completed += 1,
                Ok(EntryOutcome::AlreadyExists(_)) => report.skipped += 1,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    error!(url = %entry.url, "{e}");
                    report.failed += 1;
                }
            }
            eprintln!();
        }

        if report.is_success() && remove_manifest_on_success {
            tokio::fs::remove_file(manifest)
                .await
                .map_err(|e| io_error("removing manifest", manifest, e))?;
        }
        Ok(report)
    }
}
