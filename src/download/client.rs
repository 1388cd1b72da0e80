//! Streaming HTTP transfer with atomic placement.
//!
//! Bytes stream into a `.part` temp file next to the destination and are
//! renamed into place only after the size check passes, so an aborted or
//! rejected transfer never leaves a partial artifact at the final path.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::FetchError;

/// Allowed deviation between declared and received size, in percent.
const SIZE_TOLERANCE_PERCENT: u64 = 1;

/// A completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Final artifact path.
    pub path: PathBuf,
    /// Bytes received.
    pub bytes: u64,
}

/// Streams single URLs to disk. Mirror iteration and retry live above
/// this layer; one call is one attempt against one URL.
#[derive(Debug, Clone)]
pub struct TransferClient {
    client: Client,
    max_file_size: u64,
}

impl TransferClient {
    /// Creates a client with the given size ceiling. Timeouts come from
    /// the underlying `reqwest::Client` configuration.
    #[must_use]
    pub fn new(client: Client, max_file_size: u64) -> Self {
        Self {
            client,
            max_file_size,
        }
    }

    /// Downloads `url` to `dest`, verifying against `expected_size` when
    /// one is declared.
    ///
    /// The received size must be within 1% of the declared size or the
    /// payload is discarded and the transfer fails with
    /// [`FetchError::IntegrityMismatch`].
    #[instrument(skip(self), fields(dest = %dest.display()))]
    pub async fn transfer(
        &self,
        url: &str,
        dest: &Path,
        expected_size: Option<u64>,
    ) -> Result<Transfer, FetchError> {
        if Url::parse(url).is_err() {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
            });
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify_send_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(declared) = response.content_length() {
            if declared > self.max_file_size {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    declared,
                    limit: self.max_file_size,
                });
            }
        }

        let temp = temp_path(dest);
        let bytes = match self.stream_to_file(url, response, &temp).await {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_quietly(&temp).await;
                return Err(e);
            }
        };

        if let Some(expected) = expected_size {
            if !within_tolerance(expected, bytes) {
                remove_quietly(&temp).await;
                return Err(FetchError::IntegrityMismatch {
                    path: dest.to_path_buf(),
                    expected,
                    actual: bytes,
                });
            }
        }

        tokio::fs::rename(&temp, dest)
            .await
            .map_err(|e| FetchError::io(dest, e))?;
        debug!(bytes, "transfer complete");
        Ok(Transfer {
            path: dest.to_path_buf(),
            bytes,
        })
    }

    fn classify_send_error(&self, url: &str, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::network(url, error)
        }
    }

    async fn stream_to_file(
        &self,
        url: &str,
        response: reqwest::Response,
        temp: &Path,
    ) -> Result<u64, FetchError> {
        let mut file = File::create(temp).await.map_err(|e| FetchError::io(temp, e))?;
        let mut stream = response.bytes_stream();
        let mut bytes: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.classify_send_error(url, e))?;
            bytes += chunk.len() as u64;
            // Servers without Content-Length still hit the ceiling here.
            if bytes > self.max_file_size {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    declared: bytes,
                    limit: self.max_file_size,
                });
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(temp, e))?;
        }
        file.flush().await.map_err(|e| FetchError::io(temp, e))?;
        Ok(bytes)
    }
}

/// Temp file next to the destination so the final rename never crosses a
/// filesystem boundary.
fn temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    dest.with_file_name(format!(".{name}.{:08x}.part", rand::random::<u32>()))
}

/// True when `actual` is within the tolerance band around `expected`.
fn within_tolerance(expected: u64, actual: u64) -> bool {
    let tolerance = expected * SIZE_TOLERANCE_PERCENT / 100;
    actual.abs_diff(expected) <= tolerance
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove temp file");
        }
    }
}
