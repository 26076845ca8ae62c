// src/job/record.rs

//! The persisted state of one execution.
//!
//! Every mutation goes through a method on [`JobRecord`] that checks the
//! state machine first and returns a [`TransitionError`] instead of touching
//! the record when the move is not allowed:
//!
//! ```text
//! PENDING -> RUNNING -> { SUCCESS, FAILED, CANCELLED }
//! PENDING -> { FAILED, CANCELLED }
//! ```
//!
//! Terminal records are sealed: no status change, no new log lines, and
//! `result` / `finished_at` stay exactly as they were written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::TransitionError;
use crate::job::JobId;
use crate::types::JobStatus;

/// One timestamped entry of a job's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl LogLine {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    id: JobId,
    status: JobStatus,
    input_parameters: Map<String, Value>,
    logs: Vec<LogLine>,
    result: Option<Value>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A fresh PENDING record with no logs.
    pub fn new(input_parameters: Map<String, Value>) -> Self {
        Self::with_id(JobId::new(), input_parameters)
    }

    pub fn with_id(id: JobId, input_parameters: Map<String, Value>) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            input_parameters,
            logs: Vec::new(),
            result: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn input_parameters(&self) -> &Map<String, Value> {
        &self.input_parameters
    }

    pub fn logs(&self) -> &[LogLine] {
        &self.logs
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Convenience accessor for `result.error` on failed jobs.
    pub fn error_message(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.get("error"))
            .and_then(Value::as_str)
    }

    /// Append lines to the log, in order.
    pub fn append_logs<I, S>(&mut self, messages: I) -> Result<(), TransitionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_open()?;
        self.logs.extend(messages.into_iter().map(LogLine::now));
        Ok(())
    }

    pub fn append_log(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.append_logs(std::iter::once(message))
    }

    /// PENDING -> RUNNING.
    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        self.ensure_from(JobStatus::Running, &[JobStatus::Pending])?;
        self.status = JobStatus::Running;
        Ok(())
    }

    /// RUNNING -> SUCCESS, recording the engine's result payload.
    pub fn succeed(&mut self, result: Value) -> Result<(), TransitionError> {
        self.ensure_from(JobStatus::Success, &[JobStatus::Running])?;
        self.seal(JobStatus::Success, Some(result));
        Ok(())
    }

    /// PENDING/RUNNING -> FAILED. `result` carries the error description.
    pub fn fail(&mut self, result: Value) -> Result<(), TransitionError> {
        self.ensure_from(JobStatus::Failed, &[JobStatus::Pending, JobStatus::Running])?;
        self.seal(JobStatus::Failed, Some(result));
        Ok(())
    }

    /// PENDING/RUNNING -> CANCELLED. `result` stays unset.
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.ensure_from(
            JobStatus::Cancelled,
            &[JobStatus::Pending, JobStatus::Running],
        )?;
        self.seal(JobStatus::Cancelled, None);
        Ok(())
    }

    /// Render the log the way it is shown to clients: one
    /// `[<timestamp>] <message>` line per entry.
    pub fn render_logs(&self) -> String {
        let mut out = String::new();
        for line in &self.logs {
            out.push('[');
            out.push_str(&line.at.to_rfc3339());
            out.push_str("] ");
            out.push_str(&line.message);
            out.push('\n');
        }
        out
    }

    fn seal(&mut self, status: JobStatus, result: Option<Value>) {
        self.status = status;
        self.result = result;
        self.finished_at = Some(Utc::now());
    }

    fn ensure_open(&self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Sealed {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    fn ensure_from(&self, to: JobStatus, allowed: &[JobStatus]) -> Result<(), TransitionError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(TransitionError::Illegal {
                id: self.id,
                from: self.status,
                to,
            })
        }
    }
}
