//! Artifact acquisition: streaming transfers and mirror fallback.
//!
//! The split mirrors the two layers of the problem:
//!
//! - [`TransferClient`] - one URL, one attempt, streamed to disk with a
//!   temp-file-then-rename placement so partial artifacts never land
//! - [`DownloadManager`] - one record, walking its ranked mirror list
//!   until a transfer succeeds or the list is exhausted
//!
//! Retry above a full mirror walk (re-enqueueing the task) belongs to
//! the orchestrator, not this module.

mod client;
mod error;
mod manager;

pub use client::{Transfer, TransferClient};
pub use error::{FailureClass, FetchError, MirrorAttempt};
pub use manager::{Artifact, DownloadManager, TargetKind};
