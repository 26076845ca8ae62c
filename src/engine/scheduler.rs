// src/engine/scheduler.rs

//! Public entry point for running jobs.
//!
//! `submit` validates the parameters, registers the job, persists a PENDING
//! record and then starts exactly one orchestration task for the new id. The scheduler keeps at most
//! one `ActiveJob` per id; finished entries are reaped lazily whenever the
//! map is touched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigFile, OrchestratorSettings};
use crate::errors::{AdapterError, Result, SchedulerError, StoreError};
use crate::exec::{ExecutionAdapter, build_adapter};
use crate::job::{ExecutionRequest, JobId, JobRecord};
use crate::store::{JobStore, build_store};

use super::control::{CancelReason, JobControl};
use super::orchestrator::ExecutionOrchestrator;

/// Bookkeeping for one live orchestration task.
struct ActiveJob {
    control: Arc<JobControl>,
    done: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

pub struct JobScheduler {
    orchestrator: Arc<ExecutionOrchestrator>,
    active: Mutex<HashMap<JobId, ActiveJob>>,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("orchestrator", &self.orchestrator)
            .field("active", &self.active().len())
            .finish()
    }
}

impl JobScheduler {
    pub fn new(
        adapter: Arc<dyn ExecutionAdapter>,
        store: Arc<dyn JobStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            orchestrator: Arc::new(ExecutionOrchestrator::new(adapter, store, settings)),
            active: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Build the adapter and store selected by `cfg`.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let adapter = build_adapter(cfg)?;
        let store = build_store(cfg)?;
        Ok(Self::new(adapter, store, cfg.orchestrator))
    }

    fn active(&self) -> MutexGuard<'_, HashMap<JobId, ActiveJob>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self) -> &Arc<dyn JobStore> {
        self.orchestrator.store()
    }

    pub fn adapter_name(&self) -> &'static str {
        self.orchestrator.adapter().name()
    }

    /// Number of orchestration tasks that have not finished yet.
    pub fn running_jobs(&self) -> usize {
        let mut active = self.active();
        reap(&mut active);
        active.len()
    }

    /// Create a PENDING job and start driving it. Returns without waiting
    /// for the job to finish.
    pub async fn submit(&self, parameters: Map<String, Value>) -> std::result::Result<JobId, SchedulerError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }

        let request = ExecutionRequest::from_parameters(&parameters)
            .map_err(SchedulerError::InvalidParameters)?;
        self.orchestrator
            .adapter()
            .validate(&request)
            .map_err(|e| match e {
                AdapterError::InvalidParameters(msg) => SchedulerError::InvalidParameters(msg),
                other => SchedulerError::InvalidParameters(other.to_string()),
            })?;

        let record = JobRecord::new(parameters);
        let job_id = record.id();

        // The job is registered before its record becomes visible, so a
        // `cancel` that finds the record always finds the job's control too.
        let control = Arc::new(JobControl::new());
        let (done_tx, done_rx) = watch::channel(false);
        let (start_tx, start_rx) = oneshot::channel::<()>();
        let orchestrator = Arc::clone(&self.orchestrator);
        let task_control = Arc::clone(&control);

        let handle = tokio::spawn(async move {
            if start_rx.await.is_err() {
                debug!(%job_id, "job was never stored; not starting");
                return;
            }
            match orchestrator.run(job_id, request, task_control).await {
                Ok(status) => debug!(%job_id, %status, "orchestration task finished"),
                Err(e) => error!(%job_id, error = %e, "orchestration task aborted"),
            }
            let _ = done_tx.send(true);
        });

        {
            let mut active = self.active();
            reap(&mut active);
            active.insert(
                job_id,
                ActiveJob {
                    control,
                    done: done_rx,
                    handle,
                },
            );
        }

        if let Err(e) = self.store().insert(record).await {
            // Dropping `start_tx` lets the task exit without running.
            self.active().remove(&job_id);
            return Err(e.into());
        }
        let _ = start_tx.send(());

        info!(%job_id, adapter = self.adapter_name(), "job submitted");
        Ok(job_id)
    }

    /// Typed convenience over [`JobScheduler::submit`].
    pub async fn submit_request(&self, request: &ExecutionRequest) -> std::result::Result<JobId, SchedulerError> {
        self.submit(request.to_parameters()).await
    }

    /// Snapshot of the committed record.
    pub async fn get(&self, job_id: JobId) -> std::result::Result<JobRecord, SchedulerError> {
        Ok(self.store().get(job_id).await?)
    }

    /// All records, most recently started first.
    pub async fn list(&self) -> std::result::Result<Vec<JobRecord>, SchedulerError> {
        Ok(self.store().list().await?)
    }

    /// Request cancellation of a PENDING or RUNNING job.
    ///
    /// Returns once the request is recorded; the record turns CANCELLED when
    /// the job's task has stopped the back-end and drained its output.
    pub async fn cancel(&self, job_id: JobId) -> std::result::Result<(), SchedulerError> {
        let record = self.store().get(job_id).await?;
        if record.is_terminal() {
            return Err(SchedulerError::NotCancellable {
                id: job_id,
                status: record.status(),
            });
        }

        let control = {
            let mut active = self.active();
            reap(&mut active);
            active.get(&job_id).map(|a| Arc::clone(&a.control))
        };
        match control {
            Some(control) => {
                if control.request_cancel(CancelReason::User) {
                    info!(%job_id, "cancellation requested");
                    Ok(())
                } else {
                    let status = self.store().get(job_id).await?.status();
                    Err(SchedulerError::NotCancellable { id: job_id, status })
                }
            }
            // No task owns this record, e.g. it was left behind by an
            // earlier process using the file store.
            None => self.cancel_orphan(job_id).await,
        }
    }

    async fn cancel_orphan(&self, job_id: JobId) -> std::result::Result<(), SchedulerError> {
        warn!(%job_id, "cancelling job with no live orchestration task");
        let result = self
            .store()
            .update(
                job_id,
                Box::new(|rec: &mut JobRecord| {
                    rec.append_log(CancelReason::User.log_line())?;
                    rec.cancel()
                }),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(StoreError::Transition(_)) => {
                let status = self.store().get(job_id).await?.status();
                Err(SchedulerError::NotCancellable { id: job_id, status })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for the job's task to finish and return the final record.
    pub async fn wait(&self, job_id: JobId) -> std::result::Result<JobRecord, SchedulerError> {
        let done = self.active().get(&job_id).map(|a| a.done.clone());
        if let Some(mut done) = done {
            // An error means the task is gone without reporting, e.g. it
            // panicked; the store still holds whatever it committed.
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.get(job_id).await
    }

    /// Refuse new submissions, cancel every live job and wait for their
    /// tasks to finish.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
        }

        let drained: Vec<(JobId, ActiveJob)> = self.active().drain().collect();
        info!(jobs = drained.len(), "shutting down scheduler");

        for (job_id, job) in &drained {
            if !job.handle.is_finished() && job.control.request_cancel(CancelReason::Shutdown) {
                debug!(%job_id, "cancelled for shutdown");
            }
        }
        for (job_id, job) in drained {
            if let Err(e) = job.handle.await {
                warn!(%job_id, error = %e, "orchestration task did not finish cleanly");
            }
        }
    }
}

fn reap(active: &mut HashMap<JobId, ActiveJob>) {
    active.retain(|_, job| !job.handle.is_finished());
}
