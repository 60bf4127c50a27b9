// Resumable single-file HTTP transfer.
//
// Data is streamed into `<destination>.incomplete` and only renamed to the
// final name once the body has been received completely, so an existing
// destination always means a finished download.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::DateTime;
use futures::StreamExt;
use reqwest::header::{DATE, HeaderMap, LAST_MODIFIED, RANGE};
use reqwest::{Client, StatusCode};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use super::retry::{RetryAction, RetryPolicy, is_retryable_reqwest_error, retry_with_backoff};
use crate::DownloadError;

/// How a transfer finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Destination already existed; nothing was requested.
    Skipped,
    /// Body was fetched; `bytes` counts only what this call wrote.
    Downloaded { bytes: u64 },
}

/// Fetches one URL into one file.
#[async_trait]
pub trait SegmentTransfer: Send + Sync {
    /// Download `url` to `destination`.
    ///
    /// With `server_timestamp`, the remote Last-Modified (or Date) header is
    /// applied as the file's modification time.
    async fn transfer(
        &self,
        url: &Url,
        destination: &Path,
        server_timestamp: bool,
        token: &CancellationToken,
    ) -> Result<TransferOutcome, DownloadError>;
}

/// Path of the in-progress file for `destination`.
pub fn incomplete_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".incomplete");
    destination.with_file_name(name)
}

fn remote_timestamp(headers: &HeaderMap) -> Option<SystemTime> {
    [LAST_MODIFIED, DATE].iter().find_map(|name| {
        let value = headers.get(name)?.to_str().ok()?;
        DateTime::parse_from_rfc2822(value)
            .ok()
            .map(SystemTime::from)
    })
}

async fn apply_mtime(path: &Path, modified: SystemTime) -> std::io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path).await?;
    let file = file.into_std().await;
    tokio::task::spawn_blocking(move || file.set_modified(modified))
        .await
        .map_err(std::io::Error::other)?
}

/// [`SegmentTransfer`] over HTTP with byte-range resume and bounded retries.
#[derive(Debug, Clone)]
pub struct ResumableTransfer {
    client: Client,
    policy: RetryPolicy,
}

impl ResumableTransfer {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// One request, appending to (or restarting) the partial file.
    async fn attempt(
        &self,
        url: &Url,
        partial: &Path,
        token: &CancellationToken,
    ) -> Result<(u64, Option<SystemTime>), DownloadError> {
        let offset = match fs::metadata(partial).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let mut request = self.client.get(url.clone());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        let mut file = match status {
            StatusCode::PARTIAL_CONTENT => {
                fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(partial)
                    .await?
            }
            StatusCode::OK => {
                if offset > 0 {
                    debug!(url = %url, offset, "Server ignored range request, restarting");
                }
                fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(partial)
                    .await?
            }
            _ => return Err(DownloadError::http_status(status, url.as_str(), "transfer")),
        };

        let modified = remote_timestamp(response.headers());
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DownloadError::Cancelled),
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        file.write_all(&bytes).await?;
                        written += bytes.len() as u64;
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
            }
        }
        file.flush().await?;
        trace!(url = %url, offset, written, "Transfer attempt complete");

        Ok((written, modified))
    }
}

#[async_trait]
impl SegmentTransfer for ResumableTransfer {
    async fn transfer(
        &self,
        url: &Url,
        destination: &Path,
        server_timestamp: bool,
        token: &CancellationToken,
    ) -> Result<TransferOutcome, DownloadError> {
        if fs::try_exists(destination).await? {
            debug!(path = %destination.display(), "Already downloaded, skipping");
            return Ok(TransferOutcome::Skipped);
        }

        let partial = incomplete_path(destination);
        let (bytes, modified) = retry_with_backoff(&self.policy, token, |_attempt| {
            let partial = partial.as_path();
            async move {
                match self.attempt(url, partial, token).await {
                    Ok(result) => RetryAction::Success(result),
                    Err(DownloadError::Cancelled) => RetryAction::Fail(DownloadError::Cancelled),
                    Err(DownloadError::Network { source }) if !is_retryable_reqwest_error(&source) => {
                        RetryAction::Fail(source.into())
                    }
                    Err(e) => RetryAction::Retry(e),
                }
            }
        })
        .await?;

        fs::rename(&partial, destination).await?;

        if server_timestamp
            && let Some(modified) = modified
            && let Err(e) = apply_mtime(destination, modified).await
        {
            warn!(path = %destination.display(), error = %e, "Failed to set modification time");
        }

        debug!(url = %url, path = %destination.display(), bytes, "Downloaded");
        Ok(TransferOutcome::Downloaded { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DownloaderConfig, create_client};
    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const BODY: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    const LAST_MODIFIED_VALUE: &str = "Wed, 21 Oct 2015 07:28:00 GMT";

    #[derive(Default)]
    struct ServerState {
        requests: AtomicUsize,
        ranges: Mutex<Vec<Option<String>>>,
        failures_left: AtomicUsize,
    }

    fn record(state: &ServerState, headers: &AxumHeaders) -> Option<usize> {
        state.requests.fetch_add(1, Ordering::SeqCst);
        let range = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        state.ranges.lock().unwrap().push(range.clone());
        range
            .as_deref()
            .and_then(|r| r.strip_prefix("bytes="))
            .and_then(|r| r.strip_suffix('-'))
            .and_then(|r| r.parse().ok())
    }

    async fn ranged(State(state): State<Arc<ServerState>>, headers: AxumHeaders) -> Response {
        let start = record(&state, &headers);
        match start {
            Some(start) => (
                AxumStatus::PARTIAL_CONTENT,
                [(header::LAST_MODIFIED, LAST_MODIFIED_VALUE)],
                BODY[start..].to_vec(),
            )
                .into_response(),
            None => (
                AxumStatus::OK,
                [(header::LAST_MODIFIED, LAST_MODIFIED_VALUE)],
                BODY.to_vec(),
            )
                .into_response(),
        }
    }

    async fn ignores_range(State(state): State<Arc<ServerState>>, headers: AxumHeaders) -> Response {
        record(&state, &headers);
        (AxumStatus::OK, BODY.to_vec()).into_response()
    }

    async fn flaky(State(state): State<Arc<ServerState>>, headers: AxumHeaders) -> Response {
        record(&state, &headers);
        let left = state.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            state.failures_left.store(left - 1, Ordering::SeqCst);
            return AxumStatus::SERVICE_UNAVAILABLE.into_response();
        }
        (AxumStatus::OK, BODY.to_vec()).into_response()
    }

    async fn missing(State(state): State<Arc<ServerState>>, headers: AxumHeaders) -> Response {
        record(&state, &headers);
        AxumStatus::NOT_FOUND.into_response()
    }

    async fn spawn_server(state: Arc<ServerState>) -> Url {
        let app = Router::new()
            .route("/ranged", get(ranged))
            .route("/ignores-range", get(ignores_range))
            .route("/flaky", get(flaky))
            .route("/missing", get(missing))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn transfer(max_retries: u32) -> ResumableTransfer {
        let config = DownloaderConfig {
            use_system_proxy: false,
            ..DownloaderConfig::default()
        };
        let policy = RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            jitter: false,
        };
        ResumableTransfer::new(create_client(&config).unwrap(), policy)
    }

    #[test]
    fn test_incomplete_path() {
        assert_eq!(
            incomplete_path(Path::new("/tmp/work/3.ts")),
            PathBuf::from("/tmp/work/3.ts.incomplete")
        );
    }

    #[test]
    fn test_remote_timestamp_prefers_last_modified() {
        let mut headers = HeaderMap::new();
        headers.insert(DATE, "Thu, 22 Oct 2015 07:28:00 GMT".parse().unwrap());
        headers.insert(LAST_MODIFIED, LAST_MODIFIED_VALUE.parse().unwrap());
        let expected = SystemTime::from(DateTime::parse_from_rfc2822(LAST_MODIFIED_VALUE).unwrap());
        assert_eq!(remote_timestamp(&headers), Some(expected));

        headers.remove(LAST_MODIFIED);
        assert!(remote_timestamp(&headers).is_some());
        headers.insert(DATE, "garbage".parse().unwrap());
        assert_eq!(remote_timestamp(&headers), None);
    }

    #[tokio::test]
    async fn test_fresh_download_renames_and_sets_mtime() {
        let state = Arc::new(ServerState::default());
        let base = spawn_server(state.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("remote.m3u8");

        let outcome = transfer(0)
            .transfer(&base.join("ranged").unwrap(), &dest, true, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Downloaded { bytes: BODY.len() as u64 });
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
        assert!(!incomplete_path(&dest).exists());
        let mtime = std::fs::metadata(&dest).unwrap().modified().unwrap();
        let expected = SystemTime::from(DateTime::parse_from_rfc2822(LAST_MODIFIED_VALUE).unwrap());
        assert_eq!(mtime, expected);
        assert_eq!(state.ranges.lock().unwrap().as_slice(), &[None]);
    }

    #[tokio::test]
    async fn test_existing_destination_makes_no_requests() {
        let state = Arc::new(ServerState::default());
        let base = spawn_server(state.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("0.ts");
        let url = base.join("ranged").unwrap();
        let token = CancellationToken::new();
        let transfer = transfer(0);

        transfer.transfer(&url, &dest, false, &token).await.unwrap();
        let second = transfer.transfer(&url, &dest, false, &token).await.unwrap();

        assert_eq!(second, TransferOutcome::Skipped);
        assert_eq!(state.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resumes_from_partial_size() {
        let state = Arc::new(ServerState::default());
        let base = spawn_server(state.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("1.ts");
        std::fs::write(incomplete_path(&dest), &BODY[..10]).unwrap();

        let outcome = transfer(0)
            .transfer(&base.join("ranged").unwrap(), &dest, false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TransferOutcome::Downloaded { bytes: (BODY.len() - 10) as u64 }
        );
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
        assert_eq!(
            state.ranges.lock().unwrap().as_slice(),
            &[Some("bytes=10-".to_string())]
        );
    }

    #[tokio::test]
    async fn test_full_response_to_range_restarts_file() {
        let state = Arc::new(ServerState::default());
        let base = spawn_server(state.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("2.ts");
        std::fs::write(incomplete_path(&dest), b"stale-bytes").unwrap();

        transfer(0)
            .transfer(
                &base.join("ignores-range").unwrap(),
                &dest,
                false,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
    }

    #[tokio::test]
    async fn test_retries_bad_status_then_succeeds() {
        let state = Arc::new(ServerState::default());
        state.failures_left.store(2, Ordering::SeqCst);
        let base = spawn_server(state.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("3.ts");

        transfer(2)
            .transfer(&base.join("flaky").unwrap(), &dest, false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.requests.load(Ordering::SeqCst), 3);
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_no_destination() {
        let state = Arc::new(ServerState::default());
        let base = spawn_server(state.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("4.ts");

        let err = transfer(2)
            .transfer(&base.join("missing").unwrap(), &dest, false, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::HttpStatus { status, .. } if status == StatusCode::NOT_FOUND));
        assert_eq!(state.requests.load(Ordering::SeqCst), 3);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_request() {
        let state = Arc::new(ServerState::default());
        let base = spawn_server(state.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("5.ts");
        let token = CancellationToken::new();
        token.cancel();

        let err = transfer(2)
            .transfer(&base.join("ranged").unwrap(), &dest, false, &token)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dest.exists());
        assert_eq!(state.requests.load(Ordering::SeqCst), 0);
    }
}
