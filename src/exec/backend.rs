// src/exec/backend.rs

//! Pluggable execution back-end abstraction.
//!
//! The orchestrator talks to an `ExecutionAdapter` instead of a concrete
//! transport, so the job state machine is written once:
//!
//! - [`RemoteAdapter`](super::RemoteAdapter) polls an HTTP execution service
//!   on a fixed interval.
//! - [`SubprocessAdapter`](super::SubprocessAdapter) spawns a local process
//!   and pushes its output lines as they arrive.
//! - Tests can provide their own adapter that scripts logs and outcomes.
//!
//! The two transports differ only in [`ExecutionAdapter::wait_for_activity`]:
//! a fixed sleep for pull delivery, a wake-up on new output for push.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::config::ConfigFile;
use crate::errors::{AdapterError, Result};
use crate::job::ExecutionRequest;
use crate::types::{AdapterKind, BoxFuture};

use super::{RemoteAdapter, SubprocessAdapter};

/// Opaque handle returned by `submit`, identifying one execution on the
/// back-end.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionHandle(String);

impl ExecutionHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of an execution as reported by the back-end.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineStatus {
    Running,
    Succeeded {
        result: Value,
    },
    Failed {
        /// Engine-supplied error text, preserved verbatim.
        error: String,
        result: Option<Value>,
    },
}

impl EngineStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EngineStatus::Running)
    }
}

/// Capability shared by every execution back-end.
pub trait ExecutionAdapter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Adapter-specific checks run before a job record is created.
    fn validate(&self, _request: &ExecutionRequest) -> std::result::Result<(), AdapterError> {
        Ok(())
    }

    /// Start an execution. Must return once the back-end has accepted it,
    /// not when it finishes.
    fn submit<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, std::result::Result<ExecutionHandle, AdapterError>>;

    /// Suspend until it is worth polling again.
    fn wait_for_activity<'a>(&'a self, handle: &'a ExecutionHandle) -> BoxFuture<'a, ()>;

    /// Lines produced after the first `since` lines, in order. May be empty.
    fn poll_logs<'a>(
        &'a self,
        handle: &'a ExecutionHandle,
        since: usize,
    ) -> BoxFuture<'a, std::result::Result<Vec<String>, AdapterError>>;

    fn poll_status<'a>(
        &'a self,
        handle: &'a ExecutionHandle,
    ) -> BoxFuture<'a, std::result::Result<EngineStatus, AdapterError>>;

    /// Best-effort termination request; the execution may keep running for a
    /// while after this returns.
    fn cancel<'a>(
        &'a self,
        handle: &'a ExecutionHandle,
    ) -> BoxFuture<'a, std::result::Result<(), AdapterError>>;

    /// Forget any per-handle state once the job is finalised.
    fn release(&self, _handle: &ExecutionHandle) {}
}

/// Build the adapter selected by `[adapter].kind`.
pub fn build_adapter(cfg: &ConfigFile) -> Result<Arc<dyn ExecutionAdapter>> {
    match cfg.adapter {
        AdapterKind::Remote => {
            let adapter = RemoteAdapter::new(&cfg.remote).map_err(anyhow::Error::from)?;
            Ok(Arc::new(adapter))
        }
        AdapterKind::Subprocess => Ok(Arc::new(SubprocessAdapter::new(cfg.subprocess.clone()))),
    }
}
