//! Per-record fetch over a ranked mirror list.
//!
//! The manager walks a record's mirrors strictly in resolved order, one
//! attempt per mirror, taking a budget slot before every network call.
//! Failures are recorded on the mirror (feeding the next resolution's
//! cooldown demotion) and the walk moves on; only exhausting the whole
//! list fails the fetch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::limiter::RateLimiter;
use crate::record::BookRecord;

use super::client::TransferClient;
use super::error::{FetchError, MirrorAttempt};

/// What is being fetched for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// The book file itself. Size-verified against the declared size.
    Book,
    /// The cover image. Small and best-effort; no size verification.
    Cover,
}

impl TargetKind {
    /// Subdirectory under the output root.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Book => "books",
            Self::Cover => "covers",
        }
    }
}

/// A fetched artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Slug of the owning record.
    pub slug: String,
    /// Which target this is.
    pub kind: TargetKind,
    /// Final path of the artifact.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
}

/// Fetches book files and covers for merged records.
#[derive(Debug)]
pub struct DownloadManager {
    client: TransferClient,
    limiter: Arc<RateLimiter>,
    output_dir: PathBuf,
}

impl DownloadManager {
    /// Creates a manager writing under `output_dir` (`books/` and
    /// `covers/` subdirectories are created on demand).
    #[must_use]
    pub fn new(client: TransferClient, limiter: Arc<RateLimiter>, output_dir: PathBuf) -> Self {
        Self {
            client,
            limiter,
            output_dir,
        }
    }

    /// Fetches one target for a record.
    ///
    /// Book fetches walk `record.mirrors` in order; a record with no
    /// mirrors fails immediately with an empty-attempt
    /// [`FetchError::MirrorExhausted`] and no network traffic. Mirror
    /// failures are written back onto the record's links.
    #[instrument(skip(self, record), fields(slug = %record.slug(), kind = ?kind))]
    pub async fn fetch(
        &self,
        record: &mut BookRecord,
        kind: TargetKind,
    ) -> Result<Artifact, FetchError> {
        let slug = record.slug();
        let dest = self.target_path(record, kind).await?;

        match kind {
            TargetKind::Cover => self.fetch_cover(record, &slug, &dest).await,
            TargetKind::Book => self.fetch_book(record, &slug, &dest).await,
        }
    }

    async fn fetch_cover(
        &self,
        record: &BookRecord,
        slug: &str,
        dest: &Path,
    ) -> Result<Artifact, FetchError> {
        let Some(url) = record.cover_url.clone() else {
            return Err(FetchError::MirrorExhausted {
                slug: slug.to_string(),
                attempts: Vec::new(),
            });
        };
        // Covers come from whichever provider supplied the URL; charge
        // the budget of the record's first source.
        if let Some(&source) = record.sources.iter().next() {
            self.limiter.acquire(source).await;
        }
        let transfer = self.client.transfer(&url, dest, None).await?;
        debug!(slug, bytes = transfer.bytes, "cover fetched");
        Ok(Artifact {
            slug: slug.to_string(),
            kind: TargetKind::Cover,
            path: transfer.path,
            bytes: transfer.bytes,
        })
    }

    async fn fetch_book(
        &self,
        record: &mut BookRecord,
        slug: &str,
        dest: &Path,
    ) -> Result<Artifact, FetchError> {
        let expected = record.file_size_bytes;
        let mut attempts: Vec<MirrorAttempt> = Vec::new();

        for index in 0..record.mirrors.len() {
            let (url, provider) = {
                let mirror = &record.mirrors[index];
                (mirror.url.clone(), mirror.provider)
            };

            self.limiter.acquire(provider).await;
            match self.client.transfer(&url, dest, expected).await {
                Ok(transfer) => {
                    info!(slug, mirror = %url, bytes = transfer.bytes, "book fetched");
                    return Ok(Artifact {
                        slug: slug.to_string(),
                        kind: TargetKind::Book,
                        path: transfer.path,
                        bytes: transfer.bytes,
                    });
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!(slug, mirror = %url, class = ?e.class(), error = %reason, "mirror failed, advancing");
                    record.mirrors[index].record_failure(&reason);
                    attempts.push(MirrorAttempt { url, reason });
                }
            }
        }

        Err(FetchError::MirrorExhausted {
            slug: slug.to_string(),
            attempts,
        })
    }

    /// Computes the artifact path and makes sure its directory exists.
    async fn target_path(
        &self,
        record: &BookRecord,
        kind: TargetKind,
    ) -> Result<PathBuf, FetchError> {
        let dir = self.output_dir.join(kind.dir_name());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| FetchError::io(&dir, e))?;

        let extension = match kind {
            TargetKind::Book => record
                .file_format
                .as_deref()
                .and_then(sanitize_extension)
                .unwrap_or_else(|| "pdf".to_string()),
            TargetKind::Cover => record
                .cover_url
                .as_deref()
                .and_then(extension_from_url)
                .unwrap_or_else(|| "jpg".to_string()),
        };
        Ok(dir.join(format!("{}.{extension}", record.slug())))
    }
}

/// Accepts a file extension from provider metadata only if it is a short
/// plain token; separators and traversal sequences never reach the path.
fn sanitize_extension(raw: &str) -> Option<String> {
    let ext = raw.trim().trim_start_matches('.').to_lowercase();
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

/// Pulls a plausible image extension off a URL path.
fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let ext = path.rsplit('.').next()?.to_lowercase();
    if matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "gif" | "webp") {
        Some(ext)
    } else {
        None
    }
}
