// src/engine/orchestrator.rs

//! Drives one job from PENDING to a terminal status.
//!
//! The orchestrator is the only writer of its job's record while the job is
//! live. Every batch of lines obtained from the adapter is committed in one
//! store update before the next poll, so a client reading the record always
//! sees a prefix of the engine's output followed by the synthetic lines
//! written here.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorSettings;
use crate::errors::{AdapterError, StoreError, TransitionError};
use crate::exec::{EngineStatus, ExecutionAdapter, ExecutionHandle};
use crate::job::{ExecutionRequest, JobId, JobRecord};
use crate::store::JobStore;
use crate::types::JobStatus;

use super::control::{CancelReason, JobControl};

pub const STARTED_LINE: &str = "pipeline started";
pub const COMPLETED_LINE: &str = "pipeline completed successfully";

fn failed_line(reason: &str) -> String {
    format!("pipeline failed: {reason}")
}

/// `{"error": .., "result"?: ..}` as stored on FAILED records.
fn failure_result(error: &str, engine_result: Option<Value>) -> Value {
    let mut out = json!({ "error": error });
    if let Some(result) = engine_result {
        out["result"] = result;
    }
    out
}

/// Why one polling round did not complete.
#[derive(Debug)]
enum TickError {
    Adapter(AdapterError),
    Store(StoreError),
}

impl From<AdapterError> for TickError {
    fn from(e: AdapterError) -> Self {
        TickError::Adapter(e)
    }
}

impl From<StoreError> for TickError {
    fn from(e: StoreError) -> Self {
        TickError::Store(e)
    }
}

pub struct ExecutionOrchestrator {
    adapter: Arc<dyn ExecutionAdapter>,
    store: Arc<dyn JobStore>,
    settings: OrchestratorSettings,
}

impl std::fmt::Debug for ExecutionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionOrchestrator")
            .field("adapter", &self.adapter.name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ExecutionOrchestrator {
    pub fn new(
        adapter: Arc<dyn ExecutionAdapter>,
        store: Arc<dyn JobStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            adapter,
            store,
            settings,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn ExecutionAdapter> {
        &self.adapter
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Run `job_id` to completion and return its terminal status.
    ///
    /// An `Err` means the record could not be written; the job is left in
    /// whatever state was last committed and the execution is stopped and
    /// released.
    pub async fn run(
        &self,
        job_id: JobId,
        request: ExecutionRequest,
        control: Arc<JobControl>,
    ) -> Result<JobStatus, StoreError> {
        if let Some(reason) = control.cancel_reason() {
            return self.finish_cancelled(job_id, None, 0, reason, &control).await;
        }

        debug!(%job_id, adapter = self.adapter.name(), mode = %request.mode, target = %request.target, "submitting execution");
        let handle = match self.adapter.submit(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(%job_id, error = %e, "submit failed");
                return self
                    .finish_failed(job_id, None, 0, e.to_string(), None, &control)
                    .await;
            }
        };
        info!(%job_id, %handle, "execution accepted");

        let outcome = self.drive(job_id, &handle, &control).await;
        if let Err(e) = &outcome {
            self.abandon(job_id, &handle, e).await;
        }
        outcome
    }

    /// Everything after a successful submit.
    async fn drive(
        &self,
        job_id: JobId,
        handle: &ExecutionHandle,
        control: &JobControl,
    ) -> Result<JobStatus, StoreError> {
        if let Some(reason) = control.cancel_reason() {
            return self.finish_cancelled(job_id, Some(handle), 0, reason, control).await;
        }

        self.commit(job_id, |rec| {
            rec.mark_running()?;
            rec.append_log(STARTED_LINE)
        })
        .await?;

        self.follow(job_id, handle, control).await
    }

    /// Stop and forget an execution whose record can no longer be written.
    async fn abandon(&self, job_id: JobId, handle: &ExecutionHandle, error: &StoreError) {
        warn!(%job_id, %handle, error = %error, "stopping execution after store failure");
        if let Err(e) = self.adapter.cancel(handle).await {
            debug!(%job_id, %handle, error = %e, "back-end cancel failed");
        }
        self.adapter.release(handle);
    }

    /// Poll loop for a RUNNING job.
    async fn follow(
        &self,
        job_id: JobId,
        handle: &ExecutionHandle,
        control: &JobControl,
    ) -> Result<JobStatus, StoreError> {
        let mut offset = 0usize;
        let mut failures = 0u32;

        loop {
            if let Some(reason) = control.cancel_reason() {
                return self
                    .finish_cancelled(job_id, Some(handle), offset, reason, control)
                    .await;
            }

            match self.tick(job_id, handle, &mut offset).await {
                Ok(Some(EngineStatus::Succeeded { result })) => {
                    return self
                        .finish_succeeded(job_id, handle, offset, result, control)
                        .await;
                }
                Ok(Some(EngineStatus::Failed { error, result })) => {
                    return self
                        .finish_failed(job_id, Some(handle), offset, error, result, control)
                        .await;
                }
                Ok(Some(EngineStatus::Running)) | Ok(None) => failures = 0,
                Err(TickError::Store(e)) => return Err(e),
                Err(TickError::Adapter(e)) if e.is_transient() => {
                    failures += 1;
                    warn!(%job_id, %handle, failures, error = %e, "poll failed");
                    if failures >= self.settings.max_consecutive_poll_failures {
                        let reason = format!(
                            "adapter communication error: {failures} consecutive poll failures (last: {e})"
                        );
                        return self
                            .finish_failed(job_id, Some(handle), offset, reason, None, control)
                            .await;
                    }
                }
                Err(TickError::Adapter(e)) => {
                    warn!(%job_id, %handle, error = %e, "poll failed permanently");
                    return self
                        .finish_failed(job_id, Some(handle), offset, e.to_string(), None, control)
                        .await;
                }
            }

            tokio::select! {
                biased;
                _ = control.cancelled() => {}
                _ = self.adapter.wait_for_activity(handle) => {}
            }
        }
    }

    /// One polling round: new lines, status, and once the status is terminal
    /// a final read of the lines written before it.
    async fn tick(
        &self,
        job_id: JobId,
        handle: &ExecutionHandle,
        offset: &mut usize,
    ) -> Result<Option<EngineStatus>, TickError> {
        self.sync_logs(job_id, handle, offset).await?;
        let status = self.adapter.poll_status(handle).await?;
        if !status.is_terminal() {
            return Ok(None);
        }
        self.sync_logs(job_id, handle, offset).await?;
        Ok(Some(status))
    }

    /// Fetch lines past `offset` and commit them as one batch.
    async fn sync_logs(
        &self,
        job_id: JobId,
        handle: &ExecutionHandle,
        offset: &mut usize,
    ) -> Result<(), TickError> {
        let lines = self.adapter.poll_logs(handle, *offset).await?;
        if lines.is_empty() {
            return Ok(());
        }
        let count = lines.len();
        self.commit(job_id, move |rec| rec.append_logs(lines)).await?;
        *offset += count;
        debug!(%job_id, %handle, count, offset = *offset, "committed log batch");
        Ok(())
    }

    async fn finish_succeeded(
        &self,
        job_id: JobId,
        handle: &ExecutionHandle,
        offset: usize,
        result: Value,
        control: &JobControl,
    ) -> Result<JobStatus, StoreError> {
        if let Err(reason) = control.begin_finalize() {
            debug!(%job_id, %handle, "discarding success reported after cancellation");
            return self
                .finish_cancelled(job_id, Some(handle), offset, reason, control)
                .await;
        }
        self.commit(job_id, move |rec| {
            rec.append_log(COMPLETED_LINE)?;
            rec.succeed(result)
        })
        .await?;
        self.adapter.release(handle);
        info!(%job_id, %handle, status = %JobStatus::Success, "job finished");
        Ok(JobStatus::Success)
    }

    async fn finish_failed(
        &self,
        job_id: JobId,
        handle: Option<&ExecutionHandle>,
        offset: usize,
        error: String,
        engine_result: Option<Value>,
        control: &JobControl,
    ) -> Result<JobStatus, StoreError> {
        if let Err(reason) = control.begin_finalize() {
            debug!(%job_id, "discarding failure reported after cancellation");
            return self
                .finish_cancelled(job_id, handle, offset, reason, control)
                .await;
        }

        let result = failure_result(&error, engine_result);
        self.commit(job_id, move |rec| {
            rec.append_log(failed_line(&error))?;
            rec.fail(result)
        })
        .await?;
        if let Some(handle) = handle {
            self.adapter.release(handle);
        }
        info!(%job_id, status = %JobStatus::Failed, "job finished");
        Ok(JobStatus::Failed)
    }

    /// Ask the back-end to stop, collect what it still emits for a bounded
    /// time, then seal the record as CANCELLED.
    ///
    /// The latch stays in its cancel-requested phase until the record is
    /// committed, so repeated cancel requests during the drain are accepted.
    async fn finish_cancelled(
        &self,
        job_id: JobId,
        handle: Option<&ExecutionHandle>,
        mut offset: usize,
        reason: CancelReason,
        control: &JobControl,
    ) -> Result<JobStatus, StoreError> {
        info!(%job_id, ?reason, "cancelling job");

        if let Some(handle) = handle {
            if let Err(e) = self.adapter.cancel(handle).await {
                warn!(%job_id, %handle, error = %e, "back-end cancel failed; sealing anyway");
            }
            self.drain(job_id, handle, &mut offset).await?;
        }

        self.commit(job_id, move |rec| {
            rec.append_log(reason.log_line())?;
            rec.cancel()
        })
        .await?;
        control.seal();
        if let Some(handle) = handle {
            self.adapter.release(handle);
        }
        info!(%job_id, status = %JobStatus::Cancelled, "job finished");
        Ok(JobStatus::Cancelled)
    }

    /// Keep committing output until the back-end reports a terminal status or
    /// the drain timeout runs out. Adapter errors end the drain early.
    async fn drain(
        &self,
        job_id: JobId,
        handle: &ExecutionHandle,
        offset: &mut usize,
    ) -> Result<(), StoreError> {
        let deadline = Instant::now() + self.settings.drain_timeout;
        loop {
            match self.tick(job_id, handle, offset).await {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => {}
                Err(TickError::Store(e)) => return Err(e),
                Err(TickError::Adapter(e)) => {
                    debug!(%job_id, %handle, error = %e, "stopping drain after adapter error");
                    return Ok(());
                }
            }
            if tokio::time::timeout_at(deadline, self.adapter.wait_for_activity(handle))
                .await
                .is_err()
            {
                debug!(%job_id, %handle, "drain timeout elapsed");
                return Ok(());
            }
        }
    }

    async fn commit<F>(&self, job_id: JobId, mutation: F) -> Result<JobRecord, StoreError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), TransitionError> + Send + 'static,
    {
        self.store.update(job_id, Box::new(mutation)).await.inspect_err(|e| {
            error!(%job_id, error = %e, "failed to commit job record");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_result_keeps_engine_payload() {
        assert_eq!(failure_result("boom", None), json!({"error": "boom"}));
        assert_eq!(
            failure_result("exit 1", Some(json!({"exit_code": 1}))),
            json!({"error": "exit 1", "result": {"exit_code": 1}})
        );
    }

    #[test]
    fn failed_line_carries_reason() {
        assert_eq!(failed_line("lint failed"), "pipeline failed: lint failed");
    }
}
