#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use execflow::config::OrchestratorSettings;
use execflow::engine::JobScheduler;
use execflow::exec::ExecutionAdapter;
use execflow::job::{JobId, JobRecord};
use execflow::store::{JobStore, MemoryJobStore};

pub use execflow_test_utils::{
    ConfigFileBuilder, FakeAdapter, FakeCall, FakeEngineServer, ParamsBuilder, Round,
    init_tracing, with_timeout,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Short drain so cancellation tests finish quickly.
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        max_consecutive_poll_failures: 5,
        drain_timeout: Duration::from_millis(200),
    }
}

/// A scheduler over `adapter` and a fresh in-memory store.
pub fn scheduler_for(adapter: Arc<FakeAdapter>) -> JobScheduler {
    let adapter: Arc<dyn ExecutionAdapter> = adapter;
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    JobScheduler::new(adapter, store, fast_settings())
}

pub fn messages(record: &JobRecord) -> Vec<String> {
    record.logs().iter().map(|l| l.message.clone()).collect()
}

/// Poll `get` until `pred` holds for the committed record.
pub async fn wait_until<F>(scheduler: &JobScheduler, job_id: JobId, pred: F) -> JobRecord
where
    F: Fn(&JobRecord) -> bool,
{
    with_timeout(async {
        loop {
            let record = scheduler.get(job_id).await.expect("job should exist");
            if pred(&record) {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// `finished_at` is set exactly when the status is terminal.
pub fn assert_finished_consistent(record: &JobRecord) {
    assert_eq!(
        record.finished_at().is_some(),
        record.is_terminal(),
        "finished_at must be set iff the job is terminal (status {})",
        record.status()
    );
}
