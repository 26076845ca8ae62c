// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::job::JobId;
use crate::types::JobStatus;

#[derive(Error, Debug)]
pub enum ExecflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures raised by an execution adapter.
///
/// None of these escape an orchestration task: they are folded into the job
/// record as a FAILED transition (or retried, for transient poll errors).
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("adapter communication error: {0}")]
    Unreachable(String),

    #[error("adapter communication error: unexpected response: {0}")]
    Protocol(String),

    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("unknown execution handle: {0}")]
    UnknownHandle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Whether a poll that failed with this error may be retried on the next
    /// scheduled poll.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::Unreachable(_) | AdapterError::Protocol(_) | AdapterError::Io(_)
        )
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AdapterError::Protocol(err.to_string())
        } else {
            AdapterError::Unreachable(err.to_string())
        }
    }
}

/// A mutation that would break the job state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("job {id} cannot move from {from} to {to}")]
    Illegal {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {id} is {status}; its record is sealed")]
    Sealed { id: JobId, status: JobStatus },
}

/// Failures of the persistence collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job already exists: {0}")]
    Duplicate(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Errors surfaced synchronously to callers of the scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("cannot cancel a job not in PENDING/RUNNING (job {id} is {status})")]
    NotCancellable { id: JobId, status: JobStatus },

    #[error("scheduler is shut down")]
    ShutDown,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => SchedulerError::NotFound(id),
            other => SchedulerError::Store(other),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ExecflowError>;
