use reqwest::Client;
use tracing::debug;

use crate::{DownloadError, DownloaderConfig};

/// Build the shared HTTP client used for playlist and segment transfers.
///
/// Response bodies are fetched without transparent compression so that
/// byte offsets used for range resume match what is on disk.
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    // Another component may have installed a provider already; either is fine.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    if !config.use_system_proxy {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for downloads");
    }

    client_builder.build().map_err(DownloadError::from)
}
