//! HTTP clients shared by the manifest fetcher and the archive downloader.

use crate::core::config::Config;
use crate::error::{FvsError, Result};
use reqwest::Client;

pub const USER_AGENT: &str = concat!("fvs/", env!("CARGO_PKG_VERSION"));

/// Client for small JSON requests, bounded by the manifest timeout end to end.
pub fn manifest_client(config: &Config) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.manifest_timeout)
        .build()
        .map_err(|e| FvsError::ManifestFetch {
            url: config.manifest_url.clone(),
            reason: format!("failed to build HTTP client: {e}"),
        })
}

/// Client for archive downloads. Only connecting is bounded; SDK archives
/// take minutes to stream.
pub fn download_client(config: &Config) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(config.connect_timeout)
        .tcp_nodelay(true)
        .build()
        .map_err(|e| FvsError::Download {
            url: config.archive_base_url.clone(),
            reason: format!("failed to build HTTP client: {e}"),
        })
}
