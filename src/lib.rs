//! Bookfetch Core Library
//!
//! This library acquires books from multiple independent catalogs:
//! searching them in parallel, merging per-provider metadata into
//! canonical records, and downloading files through ranked mirror lists
//! under a shared request budget.
//!
//! # Architecture
//!
//! - [`record`] - canonical data model, ISBN handling, fragment merging
//! - [`provider`] - one adapter per catalog plus optional enrichment
//! - [`mirror`] - mirror dedup and ranking
//! - [`limiter`] - fixed-window request budgeting
//! - [`download`] - streaming transfers and per-record mirror fallback
//! - [`task`] - download task state machine
//! - [`orchestrator`] - batch coordination and the worker pool
//! - [`cache`] - SQLite dedup cache of acquired records

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod download;
pub mod limiter;
pub mod mirror;
pub mod orchestrator;
pub mod provider;
pub mod record;
pub mod task;

// Re-export commonly used types
pub use cache::{CacheError, CachedRecord, RecordCache};
pub use config::Settings;
pub use download::{
    Artifact, DownloadManager, FailureClass, FetchError, MirrorAttempt, TargetKind,
    TransferClient,
};
pub use limiter::RateLimiter;
pub use mirror::MirrorResolver;
pub use orchestrator::{BatchReport, Orchestrator, OrchestratorError};
pub use provider::{
    build_default_providers, ProviderAdapter, ProviderError, ProviderHttp,
};
pub use record::merge::{MergeConflict, MergeOutcome, RecordMerger};
pub use record::{BookRecord, IdentityKey, MirrorKind, MirrorLink, RawHit, SourceId};
pub use task::{DownloadTask, TaskState};
