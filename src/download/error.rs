//! Fetch error taxonomy.
//!
//! Every transfer failure carries the URL or path it happened at, and
//! classifies itself as transient or permanent for cooldown and
//! reporting purposes. Exhausting a record's whole mirror list is
//! itself an error so the orchestrator can report per-mirror reasons.

use std::path::PathBuf;

use thiserror::Error;

/// Whether a failure is worth trying again later on the same mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeouts, connection resets, 5xx, throttling. The mirror may
    /// recover; its demotion lasts only for the cooldown.
    Transient,
    /// 404s, bad URLs, oversize and corrupt payloads. The mirror is
    /// considered bad for this record.
    Permanent,
}

/// One failed mirror attempt, kept for the batch report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorAttempt {
    /// The mirror URL that was tried.
    pub url: String,
    /// Display form of the failure.
    pub reason: String,
}

/// Errors from a single transfer or a whole fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The URL could not be parsed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
    },

    /// The payload exceeds the configured size ceiling.
    #[error("{url} delivers {declared} bytes, over the {limit} byte limit")]
    TooLarge {
        /// The URL of the oversized payload.
        url: String,
        /// Bytes declared (or observed) for the payload.
        declared: u64,
        /// The configured ceiling.
        limit: u64,
    },

    /// Downloaded size disagrees with the declared size beyond tolerance.
    #[error("size mismatch for {path}: expected {expected} bytes, got {actual}")]
    IntegrityMismatch {
        /// Where the rejected payload was being written.
        path: PathBuf,
        /// Declared size.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },

    /// Filesystem error while writing or renaming the artifact.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path being written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Every candidate mirror was tried and failed, or none existed.
    #[error("all {} mirror(s) exhausted for {slug}", .attempts.len())]
    MirrorExhausted {
        /// Slug of the record being fetched.
        slug: String,
        /// Per-mirror failure reasons in try order.
        attempts: Vec<MirrorAttempt>,
    },
}

impl FetchError {
    /// Creates a network error with URL context.
    pub(crate) fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an I/O error with path context.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classifies the failure for cooldown and reporting purposes.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::Io { .. } => {
                FailureClass::Transient
            }
            Self::HttpStatus { status, .. } => {
                if *status == 429 || *status >= 500 {
                    FailureClass::Transient
                } else {
                    FailureClass::Permanent
                }
            }
            Self::InvalidUrl { .. }
            | Self::TooLarge { .. }
            | Self::IntegrityMismatch { .. }
            | Self::MirrorExhausted { .. } => FailureClass::Permanent,
        }
    }
}
