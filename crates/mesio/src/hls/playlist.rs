use std::path::{Path, PathBuf};
use std::sync::Arc;

use hls::{ParsedPlaylist, Playlist, PlaylistError, select_variant};
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use super::transfer::SegmentTransfer;
use crate::DownloadError;

pub const REMOTE_PLAYLIST_NAME: &str = "remote.m3u8";
pub const VARIANT_PLAYLIST_NAME: &str = "variant.m3u8";

/// A media playlist fetched into the working directory.
#[derive(Debug, Clone)]
pub struct RemotePlaylist {
    /// URL segment URIs are resolved against.
    pub url: Url,
    pub playlist: Playlist,
    /// Local copy of the first playlist fetched (the one the user pointed at).
    pub path: PathBuf,
}

/// Fetches a playlist URL and follows a master playlist to its best variant.
pub struct RemotePlaylistLoader {
    transfer: Arc<dyn SegmentTransfer>,
}

impl RemotePlaylistLoader {
    pub fn new(transfer: Arc<dyn SegmentTransfer>) -> Self {
        Self { transfer }
    }

    async fn fetch(
        &self,
        url: &Url,
        path: &Path,
        token: &CancellationToken,
    ) -> Result<ParsedPlaylist, DownloadError> {
        self.transfer.transfer(url, path, true, token).await?;
        let bytes = tokio::fs::read(path).await?;
        Ok(Playlist::parse(&bytes)?)
    }

    pub async fn load(
        &self,
        url: &Url,
        workdir: &Path,
        token: &CancellationToken,
    ) -> Result<RemotePlaylist, DownloadError> {
        let path = workdir.join(REMOTE_PLAYLIST_NAME);
        let master = match self.fetch(url, &path, token).await? {
            ParsedPlaylist::Media(playlist) => {
                return Ok(RemotePlaylist {
                    url: url.clone(),
                    playlist,
                    path,
                });
            }
            ParsedPlaylist::Master(master) => master,
        };

        let variant = select_variant(&master).ok_or(PlaylistError::NoVariant)?;
        let variant_url = url
            .join(&variant.uri)
            .map_err(|e| DownloadError::invalid_url(&variant.uri, e.to_string()))?;
        info!(
            variant = %variant_url,
            bandwidth = variant.bandwidth,
            "Selected variant stream"
        );

        let variant_path = workdir.join(VARIANT_PLAYLIST_NAME);
        match self.fetch(&variant_url, &variant_path, token).await? {
            ParsedPlaylist::Media(playlist) => Ok(RemotePlaylist {
                url: variant_url,
                playlist,
                path,
            }),
            ParsedPlaylist::Master(_) => Err(PlaylistError::Parse {
                reason: format!("variant {variant_url} is itself a master playlist"),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransferOutcome;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Serves canned bodies keyed by URL.
    struct CannedTransfer(HashMap<String, &'static str>);

    #[async_trait]
    impl SegmentTransfer for CannedTransfer {
        async fn transfer(
            &self,
            url: &Url,
            destination: &Path,
            _server_timestamp: bool,
            _token: &CancellationToken,
        ) -> Result<TransferOutcome, DownloadError> {
            let body = self.0.get(url.as_str()).ok_or_else(|| {
                DownloadError::http_status(reqwest::StatusCode::NOT_FOUND, url.as_str(), "test")
            })?;
            tokio::fs::write(destination, body).await?;
            Ok(TransferOutcome::Downloaded {
                bytes: body.len() as u64,
            })
        }
    }

    const MEDIA: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4,\na.ts\n#EXTINF:3.5,\nb.ts\n#EXT-X-ENDLIST\n";

    #[tokio::test]
    async fn test_media_playlist_is_returned_directly() {
        let dir = tempfile::tempdir().unwrap();
        let loader = RemotePlaylistLoader::new(Arc::new(CannedTransfer(HashMap::from([(
            "https://example.com/v/index.m3u8".to_string(),
            MEDIA,
        )]))));
        let url = Url::parse("https://example.com/v/index.m3u8").unwrap();

        let loaded = loader
            .load(&url, dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(loaded.url, url);
        assert_eq!(loaded.playlist.len(), 2);
        assert_eq!(loaded.path, dir.path().join(REMOTE_PLAYLIST_NAME));
        assert!(!dir.path().join(VARIANT_PLAYLIST_NAME).exists());
    }

    #[tokio::test]
    async fn test_master_playlist_follows_best_variant() {
        let dir = tempfile::tempdir().unwrap();
        let master = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\nlow/index.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720\nhigh/index.m3u8\n";
        let loader = RemotePlaylistLoader::new(Arc::new(CannedTransfer(HashMap::from([
            ("https://example.com/v/master.m3u8".to_string(), master),
            ("https://example.com/v/high/index.m3u8".to_string(), MEDIA),
        ]))));
        let url = Url::parse("https://example.com/v/master.m3u8").unwrap();

        let loaded = loader
            .load(&url, dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(loaded.url.as_str(), "https://example.com/v/high/index.m3u8");
        assert_eq!(loaded.playlist.segments[1].uri, "b.ts");
        assert!(dir.path().join(VARIANT_PLAYLIST_NAME).exists());
    }
}
