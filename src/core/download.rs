//! Streaming archive downloads.
//!
//! Bodies are written to `<dest>.part` and renamed onto `dest` only after the
//! full body arrived, so a file at `dest` is always a complete download.

use crate::core::config::Config;
use crate::core::http;
use crate::core::outcome::{Outcome, ProgressCallback};
use crate::core::version::InstallKey;
use crate::error::{FvsError, Result};
use crate::utils::fs;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

const PART_SUFFIX: &str = ".part";

/// How a transfer ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Finished(u64),
    Cancelled,
}

pub struct ArchiveDownloader {
    client: reqwest::Client,
}

impl ArchiveDownloader {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_client(http::download_client(config)?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Downloads `url` to `dest`, overwriting whatever is there.
    ///
    /// Never returns an error: failures become [`Outcome::Failed`].
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        key: &InstallKey,
        progress: ProgressCallback,
        cancel: &CancellationToken,
    ) -> Outcome {
        match self.try_download(url, dest, &progress, cancel).await {
            Ok(Transfer::Finished(bytes)) => {
                tracing::info!("downloaded {bytes} bytes to {}", dest.display());
                Outcome::Completed {
                    path: dest.to_path_buf(),
                    key: key.clone(),
                }
            }
            Ok(Transfer::Cancelled) => {
                tracing::info!("download of {url} cancelled");
                Outcome::Cancelled
            }
            Err(e) => {
                tracing::warn!("{e}");
                Outcome::failed(e)
            }
        }
    }

    async fn try_download(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<Transfer> {
        let download_error = |reason: String| FvsError::Download {
            url: url.to_string(),
            reason,
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!("downloading {url}");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Transfer::Cancelled),
            response = self.client.get(url).send() => {
                response.map_err(|e| download_error(format!("failed to connect: {e}")))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("HTTP {status}")));
        }

        let total = response.content_length();
        write_stream(response.bytes_stream(), total, dest, url, progress, cancel).await
    }
}

/// Writes a chunk stream to `dest` through a `.part` file.
///
/// With a known `total`, a progress value is reported each time the integer
/// percentage advances. Without one the body is gathered and written in one
/// go, followed by a single 100% report.
pub async fn write_stream<S, E>(
    stream: S,
    total: Option<u64>,
    dest: &Path,
    source: &str,
    progress: &ProgressCallback,
    cancel: &CancellationToken,
) -> Result<Transfer>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: fmt::Display,
{
    let part = fs::with_suffix(dest, PART_SUFFIX);

    let result = write_part(stream, total, &part, source, progress, cancel).await;
    match result {
        Ok(Transfer::Finished(bytes)) => {
            tokio::fs::rename(&part, dest).await?;
            Ok(Transfer::Finished(bytes))
        }
        other => {
            let _ = tokio::fs::remove_file(&part).await;
            other
        }
    }
}

async fn write_part<S, E>(
    stream: S,
    total: Option<u64>,
    part: &Path,
    source: &str,
    progress: &ProgressCallback,
    cancel: &CancellationToken,
) -> Result<Transfer>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: fmt::Display,
{
    let read_error = |reason: String| FvsError::Download {
        url: source.to_string(),
        reason,
    };

    let mut stream = std::pin::pin!(stream);
    let mut file = tokio::fs::File::create(part).await?;
    let mut received: u64 = 0;
    let mut last_percent: Option<u8> = None;
    let mut buffered: Vec<u8> = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Transfer::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|e| read_error(format!("failed to read body: {e}")))?;
        received += chunk.len() as u64;

        match total {
            Some(total) => {
                file.write_all(&chunk).await?;
                let percent = percent_of(received, total);
                if last_percent != Some(percent) {
                    progress(f32::from(percent));
                    last_percent = Some(percent);
                }
            }
            None => buffered.extend_from_slice(&chunk),
        }
    }

    match total {
        Some(total) => {
            if received != total {
                return Err(read_error(format!(
                    "received {received} of {total} bytes"
                )));
            }
            if last_percent != Some(100) {
                progress(100.0);
            }
        }
        None => {
            file.write_all(&buffered).await?;
            progress(100.0);
        }
    }

    file.flush().await?;
    Ok(Transfer::Finished(received))
}

fn percent_of(received: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = u128::from(received.min(total)) * 100 / u128::from(total);
    u8::try_from(percent).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<f32>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: ProgressCallback = Arc::new(move |percent| {
            sink.lock().unwrap().push(percent);
        });
        (callback, events)
    }

    fn chunks(sizes: &[usize]) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> {
        let items: Vec<_> = sizes
            .iter()
            .map(|size| Ok(Bytes::from(vec![7u8; *size])))
            .collect();
        stream::iter(items)
    }

    #[tokio::test]
    async fn test_two_chunks_report_increasing_progress() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("flutter_3.19.0_x64.zip");
        let (callback, events) = recorder();

        let transfer = write_stream(
            chunks(&[500, 500]),
            Some(1000),
            &dest,
            "test",
            &callback,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(transfer, Transfer::Finished(1000));
        assert_eq!(*events.lock().unwrap(), vec![50.0, 100.0]);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 1000);
        assert!(!fs::with_suffix(&dest, PART_SUFFIX).exists());
    }

    #[tokio::test]
    async fn test_unknown_length_reports_once() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("sdk.zip");
        let (callback, events) = recorder();

        let transfer = write_stream(
            chunks(&[10, 20, 30]),
            None,
            &dest,
            "test",
            &callback,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(transfer, Transfer::Finished(60));
        assert_eq!(*events.lock().unwrap(), vec![100.0]);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 60);
    }

    #[tokio::test]
    async fn test_short_body_is_not_a_download() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("sdk.zip");
        let (callback, _) = recorder();

        let result = write_stream(
            chunks(&[400]),
            Some(1000),
            &dest,
            "test",
            &callback,
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(FvsError::Download { .. })));
        assert!(!dest.exists());
        assert!(!fs::with_suffix(&dest, PART_SUFFIX).exists());
    }

    #[tokio::test]
    async fn test_cancelled_transfer_discards_output() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("sdk.zip");
        let (callback, events) = recorder();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let transfer = write_stream(chunks(&[500, 500]), Some(1000), &dest, "test", &callback, &cancel)
            .await
            .unwrap();

        assert_eq!(transfer, Transfer::Cancelled);
        assert!(events.lock().unwrap().is_empty());
        assert!(!dest.exists());
        assert!(!fs::with_suffix(&dest, PART_SUFFIX).exists());
    }

    #[tokio::test]
    async fn test_existing_file_is_overwritten() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("sdk.zip");
        std::fs::write(&dest, vec![0u8; 5000]).unwrap();
        let (callback, _) = recorder();

        write_stream(chunks(&[100]), Some(100), &dest, "test", &callback, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 100);
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 1000), 0);
        assert_eq!(percent_of(999, 1000), 99);
        assert_eq!(percent_of(1000, 1000), 100);
        assert_eq!(percent_of(2000, 1000), 100);
        assert_eq!(percent_of(0, 0), 100);
    }

    #[tokio::test]
    async fn test_download_from_server() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
        Mock::given(method("GET"))
            .and(path("/stable/linux/sdk.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("flutter_3.19.0_x64.zip");
        let key = InstallKey::new("3.19.0", Some("x64"));
        let (callback, events) = recorder();
        let downloader = ArchiveDownloader::new(&Config::default()).unwrap();

        let outcome = downloader
            .download(
                &format!("{}/stable/linux/sdk.zip", server.uri()),
                &dest,
                &key,
                callback,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            outcome,
            Outcome::Completed {
                path: dest.clone(),
                key
            }
        );
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        let events = events.lock().unwrap();
        assert_eq!(events.last(), Some(&100.0));
        assert!(events.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_http_error_fails_without_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("sdk.zip");
        let (callback, _) = recorder();
        let downloader = ArchiveDownloader::new(&Config::default()).unwrap();

        let outcome = downloader
            .download(
                &format!("{}/missing.zip", server.uri()),
                &dest,
                &InstallKey::new("3.19.0", None),
                callback,
                &CancellationToken::new(),
            )
            .await;

        match outcome {
            Outcome::Failed { reason } => assert!(reason.contains("404")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!dest.exists());
    }
}
