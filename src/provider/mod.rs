//! Provider adapters.
//!
//! Each catalog gets one adapter implementing [`ProviderAdapter`]:
//! `search` performs rate-limited I/O against the provider, `normalize`
//! is a pure projection from a provider-native hit to a [`BookRecord`]
//! fragment. Knowledge of a provider's payload shape lives entirely in
//! its adapter; shared code here only does HTTP plumbing and generic
//! text extraction.

pub mod archive;
pub mod enrichment;
pub mod mirror_index;
pub mod package;

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::limiter::RateLimiter;
use crate::record::{BookRecord, RawHit, SourceId};

pub use archive::ArchiveAdapter;
pub use mirror_index::MirrorIndexAdapter;
pub use package::PackageAdapter;

/// Search attempts per provider before giving up on a batch.
const SEARCH_ATTEMPTS: u32 = 3;

/// Base delay between search retry attempts.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Longest Retry-After a provider can impose on us.
const RETRY_AFTER_CAP: Duration = Duration::from_secs(3600);

static YEAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(1[5-9]\d{2}|20[0-3]\d)\b").expect("year regex is valid") // Static pattern, safe to panic
});

/// Errors surfaced by provider adapters.
///
/// A failing provider never aborts a batch; the orchestrator logs the
/// error and continues with the remaining providers.
// The field is `provider`, not `source`: thiserror treats a field named
// `source` as the error's cause and requires it to be an Error itself.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider could not be reached or answered with an error status.
    #[error("provider {provider} unavailable: {reason}")]
    Unavailable { provider: SourceId, reason: String },

    /// The provider kept throttling us despite local budgeting.
    #[error("provider {provider} rate limited the request")]
    RateLimited { provider: SourceId },

    /// The provider answered with a payload we could not interpret.
    #[error("provider {provider} returned a malformed payload: {detail}")]
    Malformed { provider: SourceId, detail: String },
}

impl ProviderError {
    pub(crate) fn unavailable(provider: SourceId, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(provider: SourceId, detail: impl Into<String>) -> Self {
        Self::Malformed {
            provider,
            detail: detail.into(),
        }
    }
}

/// One catalog's search and normalization logic.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter speaks for.
    fn source(&self) -> SourceId;

    /// Runs a search and returns the provider's native hits.
    ///
    /// Implementations take one budget slot per request and must not
    /// exceed `max_results` hits.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RawHit>, ProviderError>;

    /// Projects a native hit into a canonical fragment.
    ///
    /// Pure: no I/O, no clock. Unknown fields are left `None`; a hit is
    /// never rejected for missing metadata.
    fn normalize(&self, hit: &RawHit) -> BookRecord;
}

/// Shared HTTP plumbing for adapters: budget acquisition, bounded retry
/// with jittered backoff, and error classification.
#[derive(Debug, Clone)]
pub struct ProviderHttp {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl ProviderHttp {
    #[must_use]
    pub fn new(client: reqwest::Client, limiter: Arc<RateLimiter>) -> Self {
        Self { client, limiter }
    }

    /// GETs a JSON document, taking one budget slot per attempt.
    ///
    /// Connection errors, timeouts, 429s, and 5xx responses are retried
    /// up to [`SEARCH_ATTEMPTS`] times, honoring `Retry-After` where the
    /// provider sends one; other 4xx responses are not. Provider
    /// throttling is backpressure, so a 429 only surfaces once the
    /// attempt budget is spent.
    pub async fn get_json(
        &self,
        source: SourceId,
        url: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let mut last_reason = String::new();
        let mut throttled = false;
        let mut server_delay: Option<Duration> = None;
        for attempt in 0..SEARCH_ATTEMPTS {
            if attempt > 0 {
                let backoff = server_delay.take().unwrap_or_else(|| {
                    let jitter = rand::thread_rng().gen_range(0..250);
                    RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1)
                        + Duration::from_millis(jitter)
                });
                tokio::time::sleep(backoff).await;
            }
            if !self.limiter.try_acquire(source) {
                self.limiter.acquire(source).await;
            }

            let response = match self.client.get(url).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_reason = e.to_string();
                    throttled = false;
                    warn!(provider = %source, attempt, error = %e, "request failed");
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                last_reason = format!("HTTP {status}");
                throttled = status == reqwest::StatusCode::TOO_MANY_REQUESTS;
                server_delay = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                warn!(provider = %source, attempt, %status, ?server_delay, "retryable error status");
                continue;
            }
            if !status.is_success() {
                return Err(ProviderError::unavailable(source, format!("HTTP {status}")));
            }

            return response
                .json()
                .await
                .map_err(|e| ProviderError::malformed(source, e.to_string()));
        }
        if throttled {
            return Err(ProviderError::RateLimited { provider: source });
        }
        Err(ProviderError::unavailable(source, last_reason))
    }
}

/// Builds the default adapter set from settings.
///
/// Order follows the configured provider priority; providers absent from
/// the priority list are left out entirely.
#[must_use]
pub fn build_default_providers(
    client: &reqwest::Client,
    limiter: &Arc<RateLimiter>,
    settings: &Settings,
) -> Vec<Box<dyn ProviderAdapter>> {
    let http = ProviderHttp::new(client.clone(), Arc::clone(limiter));
    let mut providers: Vec<Box<dyn ProviderAdapter>> = Vec::new();
    for source in &settings.provider_priority {
        match source {
            SourceId::Archive => providers.push(Box::new(ArchiveAdapter::new(
                http.clone(),
                settings.archive_url.clone(),
            ))),
            SourceId::MirrorIndex => providers.push(Box::new(MirrorIndexAdapter::new(
                http.clone(),
                settings.mirror_index_url.clone(),
            ))),
            SourceId::Package => providers.push(Box::new(PackageAdapter::new(
                http.clone(),
                settings.package_url.clone(),
            ))),
        }
    }
    debug!(count = providers.len(), "provider set built");
    providers
}

/// Parses a Retry-After header value: either delta-seconds or an HTTP
/// date. The result is capped so a hostile header cannot park us for a
/// day.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let delay = if let Ok(seconds) = value.trim().parse::<u64>() {
        Duration::from_secs(seconds)
    } else {
        let date = httpdate::parse_http_date(value.trim()).ok()?;
        date.duration_since(std::time::SystemTime::now()).ok()?
    };
    Some(delay.min(RETRY_AFTER_CAP))
}

/// Flattens a JSON object into the opaque string map carried by a
/// [`RawHit`]. Scalars keep their text form; arrays and nested objects
/// are stored as JSON text for the owning adapter to re-parse.
#[must_use]
pub(crate) fn native_map(
    object: &serde_json::Map<String, serde_json::Value>,
) -> std::collections::HashMap<String, String> {
    object
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let text = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), text)
        })
        .collect()
}

/// Pulls a publication year out of free text. Years outside 1500-2039
/// are treated as noise.
#[must_use]
pub fn extract_year(text: &str) -> Option<u16> {
    YEAR_PATTERN
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
}

/// Parses a human-readable size ("4.2 MB", "356 KB") into bytes.
#[must_use]
pub fn parse_file_size(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if let Ok(bytes) = trimmed.parse::<u64>() {
        return Some(bytes);
    }
    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: f64 = number.trim().parse().ok()?;
    let multiplier: f64 = match unit.trim().to_uppercase().as_str() {
        "B" => 1.0,
        "KB" | "KIB" => 1024.0,
        "MB" | "MIB" => 1024.0 * 1024.0,
        "GB" | "GIB" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    let bytes = value * multiplier;
    if bytes.is_finite() && bytes >= 0.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(bytes as u64)
    } else {
        None
    }
}
