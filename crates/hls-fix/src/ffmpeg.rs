//! [`Muxer`] backed by an `ffmpeg` subprocess.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use process_utils::tokio_command;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::diagnostics::DiagnosticLine;
use crate::{ConcatMethod, MergeError, MuxOutcome, Muxer};

/// Number of trailing diagnostic lines kept for error reports.
const STDERR_TAIL_LINES: usize = 12;

const REMOVE_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const REMOVE_MAX_ATTEMPTS: u32 = 100;

pub const CONCAT_LIST_NAME: &str = "concat.txt";

#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    binary_path: PathBuf,
    echo_opening: bool,
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegMuxer {
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            echo_opening: false,
        }
    }

    /// Log every "Opening ... for reading" line at info level.
    pub fn with_echo_opening(mut self, echo: bool) -> Self {
        self.echo_opening = echo;
        self
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    fn command(&self) -> Command {
        let mut cmd = tokio_command(&self.binary_path);
        cmd.arg("-hide_banner")
            .args(["-loglevel", "info"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn(&self, mut cmd: Command) -> Result<(Child, ChildStderr), MergeError> {
        debug!(command = ?cmd.as_std(), "Spawning muxer");
        let mut child = cmd.spawn().map_err(|source| MergeError::Spawn {
            program: self.binary_path.display().to_string(),
            source,
        })?;
        let stderr = child.stderr.take().ok_or_else(|| MergeError::Spawn {
            program: self.binary_path.display().to_string(),
            source: std::io::Error::other("stderr was not captured"),
        })?;
        Ok((child, stderr))
    }

    /// Full argument list for joining `names` (relative to the working dir) into `output`.
    fn concat_args(names: &[String], output: &Path, method: ConcatMethod) -> Vec<OsString> {
        let mut args: Vec<OsString> = match method {
            ConcatMethod::DemuxerList => vec![
                "-f".into(),
                "concat".into(),
                "-safe".into(),
                "0".into(),
                "-i".into(),
                CONCAT_LIST_NAME.into(),
            ],
            ConcatMethod::ProtocolConcat => {
                vec!["-i".into(), format!("concat:{}", names.join("|")).into()]
            }
        };
        args.extend(
            ["-c", "copy", "-bsf:a", "aac_adtstoasc", "-movflags", "faststart", "-y"]
                .map(OsString::from),
        );
        args.push(output.as_os_str().to_owned());
        args
    }
}

fn relative_names(artifacts: &[PathBuf], dir: &Path) -> Vec<String> {
    artifacts
        .iter()
        .map(|a| a.strip_prefix(dir).unwrap_or(a).to_string_lossy().into_owned())
        .collect()
}

async fn write_demuxer_list(names: &[String], dir: &Path) -> Result<(), MergeError> {
    let list: String = names
        .iter()
        .map(|n| format!("file '{}'\n", n.replace('\'', r"'\''")))
        .collect();
    tokio::fs::write(dir.join(CONCAT_LIST_NAME), list).await?;
    Ok(())
}

/// Line reader over the muxer's stderr. Bytes that are not UTF-8 (stream
/// metadata in legacy encodings) are replaced rather than rejected.
struct DiagnosticReader {
    inner: BufReader<ChildStderr>,
    buf: Vec<u8>,
}

impl DiagnosticReader {
    fn new(stderr: ChildStderr) -> Self {
        Self {
            inner: BufReader::new(stderr),
            buf: Vec::with_capacity(256),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        if self.inner.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

fn push_tail(tail: &mut VecDeque<String>, line: String) {
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

fn join_tail(tail: &VecDeque<String>) -> String {
    tail.iter().cloned().collect::<Vec<_>>().join("\n")
}

/// Remove `path`, tolerating a short window where the killed process still
/// holds it open.
async fn remove_with_retry(path: &Path) -> Result<(), MergeError> {
    let mut attempts = 0;
    loop {
        match tokio::fs::remove_file(path).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e)
                if e.kind() == std::io::ErrorKind::PermissionDenied
                    && attempts < REMOVE_MAX_ATTEMPTS =>
            {
                attempts += 1;
                trace!(path = %path.display(), attempts, "Output still locked, retrying removal");
                tokio::time::sleep(REMOVE_RETRY_INTERVAL).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn wait_or_kill(child: &mut Child, token: &CancellationToken) -> Result<ExitStatus, MergeError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => {
            let _ = child.kill().await;
            Err(MergeError::Cancelled)
        }
        status = child.wait() => Ok(status?),
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn attempt(
        &self,
        playlist: &Path,
        output: &Path,
        watch_discontinuities: bool,
        token: &CancellationToken,
    ) -> Result<MuxOutcome, MergeError> {
        let mut cmd = self.command();
        cmd.args(["-f", "hls", "-i"])
            .arg(playlist)
            .args(["-c", "copy", "-y"])
            .arg(output);
        let (mut child, stderr) = self.spawn(cmd)?;

        let mut lines = DiagnosticReader::new(stderr);
        let mut last_opened: Option<String> = None;
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

        loop {
            let line = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    let _ = child.kill().await;
                    return Err(MergeError::Cancelled);
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };

            match DiagnosticLine::classify(&line) {
                DiagnosticLine::Opening(name) => {
                    if self.echo_opening {
                        info!("{}", line);
                    } else {
                        trace!("{}", line);
                    }
                    last_opened = Some(name.to_string());
                }
                DiagnosticLine::Discontinuity if watch_discontinuities => {
                    warn!(
                        playlist = %playlist.display(),
                        segment = last_opened.as_deref().unwrap_or("<none>"),
                        "Timestamp discontinuity detected: {}",
                        line
                    );
                    let _ = child.kill().await;
                    remove_with_retry(output).await?;
                    return Ok(MuxOutcome::Discontinuity { last_opened });
                }
                _ => {
                    debug!("{}", line);
                    push_tail(&mut tail, line);
                }
            }
        }

        let status = wait_or_kill(&mut child, token).await?;
        if !status.success() {
            return Err(MergeError::MuxerFailed {
                status: status.to_string(),
                detail: join_tail(&tail),
            });
        }
        Ok(MuxOutcome::Completed)
    }

    async fn concat(
        &self,
        artifacts: &[PathBuf],
        dir: &Path,
        output: &Path,
        method: ConcatMethod,
        token: &CancellationToken,
    ) -> Result<(), MergeError> {
        let names = relative_names(artifacts, dir);
        if method == ConcatMethod::DemuxerList {
            write_demuxer_list(&names, dir).await?;
        }
        let mut cmd = self.command();
        cmd.current_dir(dir).args(Self::concat_args(&names, output, method));
        let (mut child, stderr) = self.spawn(cmd)?;

        let mut lines = DiagnosticReader::new(stderr);
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        loop {
            let line = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    let _ = child.kill().await;
                    return Err(MergeError::Cancelled);
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };
            debug!("{}", line);
            push_tail(&mut tail, line);
        }

        let status = wait_or_kill(&mut child, token).await?;
        if !status.success() {
            return Err(MergeError::ConcatFailed {
                status: status.to_string(),
                detail: join_tail(&tail),
            });
        }
        info!(output = %output.display(), method = %method, "Concatenated {} partition(s)", artifacts.len());
        Ok(())
    }
}
