mod common;

use serde_json::json;

use execflow::engine::{COMPLETED_LINE, JobScheduler, STARTED_LINE};
use execflow::exec::{EngineStatus, ExecutionAdapter, ExecutionHandle, RemoteAdapter};
use execflow::types::{AdapterKind, JobStatus};

use crate::common::*;

fn remote_scheduler(server: &FakeEngineServer) -> JobScheduler {
    let cfg = ConfigFileBuilder::new()
        .with_adapter(AdapterKind::Remote)
        .with_base_url(server.base_url())
        .build();
    JobScheduler::from_config(&cfg).expect("scheduler should build")
}

#[tokio::test]
async fn polled_job_succeeds_with_wrapped_result() -> TestResult {
    init_tracing();
    let server = FakeEngineServer::start()
        .await?
        .then_status(["analysing repository"], json!({"status": "running"}))
        .then_status(
            Vec::<String>::new(),
            json!({"status": "succeeded", "result": "done"}),
        );
    let scheduler = remote_scheduler(&server);

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;
    let record = with_timeout(scheduler.wait(job_id)).await?;

    assert_eq!(record.status(), JobStatus::Success);
    assert_eq!(
        messages(&record),
        vec![STARTED_LINE, "analysing repository", COMPLETED_LINE]
    );
    assert_eq!(record.result(), Some(&json!({"result": "done"})));
    assert_finished_consistent(&record);

    let submits = server.requests_to("/v1/execute");
    assert_eq!(submits.len(), 1);
    assert_eq!(
        submits[0].body,
        Some(json!({"mode": "review", "target": ".", "options": {}}))
    );
    assert!(!server.requests_to("/v1/status/exec-1").is_empty());
    Ok(())
}

#[tokio::test]
async fn unreachable_engine_fails_after_five_polls() -> TestResult {
    init_tracing();
    let server = FakeEngineServer::start().await?;
    server.set_polls_failing(true);
    let scheduler = remote_scheduler(&server);

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;
    let record = with_timeout(scheduler.wait(job_id)).await?;

    assert_eq!(record.status(), JobStatus::Failed);
    let error = record.error_message().unwrap_or_default();
    assert!(error.starts_with("adapter communication error"), "error was: {error}");
    assert!(error.contains("503"), "error was: {error}");
    // Each failed round stops at the log request.
    assert_eq!(server.requests_to("/v1/logs/").len(), 5);
    assert_finished_consistent(&record);
    Ok(())
}

#[tokio::test]
async fn rejected_submit_fails_as_invalid_parameters() -> TestResult {
    init_tracing();
    let server = FakeEngineServer::start()
        .await?
        .with_submit_reply(422, json!({"detail": "unknown mode"}));
    let scheduler = remote_scheduler(&server);

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;
    let record = with_timeout(scheduler.wait(job_id)).await?;

    assert_eq!(record.status(), JobStatus::Failed);
    let error = record.error_message().unwrap_or_default();
    assert!(error.starts_with("invalid parameters"), "error was: {error}");
    assert!(error.contains("unknown mode"), "error was: {error}");
    assert!(server.requests_to("/v1/status/").is_empty());
    Ok(())
}

#[tokio::test]
async fn engine_failure_is_preserved() -> TestResult {
    init_tracing();
    let server = FakeEngineServer::start().await?.then_status(
        ["checking"],
        json!({"status": "failed", "error": "lint failed", "result": {"issues": 3}}),
    );
    let scheduler = remote_scheduler(&server);

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;
    let record = with_timeout(scheduler.wait(job_id)).await?;

    assert_eq!(record.status(), JobStatus::Failed);
    assert_eq!(
        record.result(),
        Some(&json!({"error": "lint failed", "result": {"issues": 3}}))
    );
    // Lines released together with the terminal status are still committed.
    assert_eq!(
        messages(&record),
        vec![STARTED_LINE, "checking", "pipeline failed: lint failed"]
    );
    Ok(())
}

#[tokio::test]
async fn cancel_reaches_the_engine_and_wins_over_late_success() -> TestResult {
    init_tracing();
    let server = FakeEngineServer::start()
        .await?
        .with_execution_id(json!(42))
        .then_status(["working"], json!({"status": "running"}))
        .with_status_after_cancel(json!({"status": "succeeded", "result": "done"}));
    let scheduler = remote_scheduler(&server);

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;
    wait_until(&scheduler, job_id, |r| messages(r).contains(&"working".to_string())).await;

    scheduler.cancel(job_id).await?;
    let record = with_timeout(scheduler.wait(job_id)).await?;

    assert_eq!(record.status(), JobStatus::Cancelled);
    assert!(record.result().is_none());
    assert_eq!(server.requests_to("/v1/cancel/42").len(), 1);
    assert_eq!(
        messages(&record).last().map(String::as_str),
        Some("cancelled by user")
    );
    Ok(())
}

#[tokio::test]
async fn poll_logs_only_returns_unseen_lines() -> TestResult {
    init_tracing();
    let server = FakeEngineServer::start()
        .await?
        .then_status(["a", "b", "c"], json!({"status": "running"}));
    let cfg = ConfigFileBuilder::new().with_base_url(server.base_url()).build();
    let adapter = RemoteAdapter::new(&cfg.remote)?;
    let handle = ExecutionHandle::new("exec-1");

    assert_eq!(adapter.poll_status(&handle).await?, EngineStatus::Running);
    assert_eq!(adapter.poll_logs(&handle, 0).await?, vec!["a", "b", "c"]);
    assert_eq!(adapter.poll_logs(&handle, 1).await?, vec!["b", "c"]);
    assert!(adapter.poll_logs(&handle, 3).await?.is_empty());
    Ok(())
}
