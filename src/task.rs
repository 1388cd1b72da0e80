//! Download task state machine.
//!
//! One task is one artifact target (book file or cover) for one record.
//! States only move forward through the allowed transitions; the one
//! loop in the graph is the orchestrator re-enqueueing a `Failed` task
//! as `Pending` until the retry ceiling is reached.

use std::fmt;

use thiserror::Error;

use crate::download::TargetKind;
use crate::record::IdentityKey;

/// Lifecycle state of a download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker is fetching it right now.
    InFlight,
    /// The artifact is on disk.
    Succeeded,
    /// The attempt failed; eligible for re-enqueue.
    Failed,
    /// The retry ceiling was hit, or the record had nothing to fetch.
    Abandoned,
}

impl TaskState {
    /// Stable string form for logs and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in-flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    /// Terminal states never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Abandoned)
    }

    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::Pending, Self::Abandoned)
                | (Self::InFlight, Self::Succeeded)
                | (Self::InFlight, Self::Failed)
                | (Self::Failed, Self::Pending)
                | (Self::Failed, Self::Abandoned)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-flight" => Ok(Self::InFlight),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(format!("unknown task state: {s}")),
        }
    }
}

/// Attempted illegal state transition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal task transition {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskState,
    pub to: TaskState,
}

/// One artifact target for one record.
///
/// Tasks reference their record by identity key rather than holding it,
/// so the record table stays the single owner of record state.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Identity key of the record this task fetches for.
    pub record_key: IdentityKey,
    /// Which artifact this task fetches.
    pub target: TargetKind,
    /// Full mirror walks performed so far.
    pub attempt_count: u32,
    state: TaskState,
}

impl DownloadTask {
    /// Creates a pending task.
    #[must_use]
    pub fn new(record_key: IdentityKey, target: TargetKind) -> Self {
        Self {
            record_key,
            target,
            attempt_count: 0,
            state: TaskState::Pending,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Moves the task to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: TaskState) -> Result<(), TransitionError> {
        if !self.state.can_transition(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Marks the task in-flight and counts the attempt.
    pub fn begin(&mut self) -> Result<(), TransitionError> {
        self.advance(TaskState::InFlight)?;
        self.attempt_count += 1;
        Ok(())
    }

    /// Re-enqueues a failed task as a fresh pending one. The attempt
    /// count survives so the retry ceiling still applies.
    pub fn requeue(&mut self) -> Result<(), TransitionError> {
        self.advance(TaskState::Pending)
    }
}
