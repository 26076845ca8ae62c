mod common;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::Notify;

use execflow::engine::{COMPLETED_LINE, STARTED_LINE};
use execflow::exec::EngineStatus;
use execflow::types::JobStatus;

use crate::common::*;

#[tokio::test]
async fn one_line_then_success_is_recorded_verbatim() -> TestResult {
    init_tracing();
    let adapter = Arc::new(
        FakeAdapter::new()
            .then(Round::emit(["analysing repository"]))
            .then(Round::succeed(json!({"result": "done"}))),
    );
    let scheduler = scheduler_for(Arc::clone(&adapter));

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;
    let record = with_timeout(scheduler.wait(job_id)).await?;

    assert_eq!(record.status(), JobStatus::Success);
    assert_eq!(
        messages(&record),
        vec![STARTED_LINE, "analysing repository", COMPLETED_LINE]
    );
    assert_eq!(record.result(), Some(&json!({"result": "done"})));
    assert_finished_consistent(&record);

    assert_eq!(
        adapter.calls()[0],
        FakeCall::Submit {
            mode: "review".into(),
            target: ".".into()
        }
    );
    assert_eq!(adapter.count(&FakeCall::Release), 1);
    assert_eq!(adapter.count(&FakeCall::Cancel), 0);
    Ok(())
}

#[tokio::test]
async fn consecutive_poll_failures_fail_the_job() -> TestResult {
    init_tracing();
    let mut adapter = FakeAdapter::new();
    for _ in 0..5 {
        adapter = adapter.then(Round::PollError("connection refused".into()));
    }
    let adapter = Arc::new(adapter);
    let scheduler = scheduler_for(Arc::clone(&adapter));

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;
    let record = with_timeout(scheduler.wait(job_id)).await?;

    assert_eq!(record.status(), JobStatus::Failed);
    let error = record.error_message().unwrap_or_default();
    assert!(error.contains("adapter communication error"), "error was: {error}");
    assert!(error.contains("5 consecutive poll failures"), "error was: {error}");
    assert_eq!(adapter.count(&FakeCall::PollStatus), 5);
    assert_finished_consistent(&record);
    Ok(())
}

#[tokio::test]
async fn a_successful_poll_resets_the_failure_count() -> TestResult {
    init_tracing();
    let mut adapter = FakeAdapter::new();
    for _ in 0..4 {
        adapter = adapter.then(Round::PollError("timeout".into()));
    }
    adapter = adapter.then(Round::emit(["still going"]));
    for _ in 0..4 {
        adapter = adapter.then(Round::PollError("timeout".into()));
    }
    let adapter = Arc::new(adapter.then(Round::succeed(json!({"result": "ok"}))));
    let scheduler = scheduler_for(Arc::clone(&adapter));

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;
    let record = with_timeout(scheduler.wait(job_id)).await?;

    assert_eq!(record.status(), JobStatus::Success);
    assert!(messages(&record).contains(&"still going".to_string()));
    Ok(())
}

#[tokio::test]
async fn engine_failure_keeps_lines_and_error_text() -> TestResult {
    init_tracing();
    let adapter = Arc::new(
        FakeAdapter::new()
            .then(Round::emit(["step one", "step two"]))
            .then(Round::fail("lint failed")),
    );
    let scheduler = scheduler_for(adapter);

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;
    let record = with_timeout(scheduler.wait(job_id)).await?;

    assert_eq!(record.status(), JobStatus::Failed);
    assert_eq!(
        messages(&record),
        vec![STARTED_LINE, "step one", "step two", "pipeline failed: lint failed"]
    );
    assert_eq!(record.result(), Some(&json!({"error": "lint failed"})));
    assert_finished_consistent(&record);
    Ok(())
}

#[tokio::test]
async fn submit_failure_goes_straight_to_failed() -> TestResult {
    init_tracing();
    let adapter = Arc::new(FakeAdapter::new().failing_submit("connection refused"));
    let scheduler = scheduler_for(Arc::clone(&adapter));

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;
    let record = with_timeout(scheduler.wait(job_id)).await?;

    assert_eq!(record.status(), JobStatus::Failed);
    assert!(!messages(&record).contains(&STARTED_LINE.to_string()));
    assert_eq!(
        record.error_message(),
        Some("adapter communication error: connection refused")
    );
    assert_eq!(adapter.count(&FakeCall::PollStatus), 0);
    assert_finished_consistent(&record);
    Ok(())
}

#[tokio::test]
async fn late_success_after_cancel_is_discarded() -> TestResult {
    init_tracing();
    let adapter = Arc::new(
        FakeAdapter::new()
            .then(Round::emit(["working"]))
            .on_cancel(
                ["received stop request"],
                EngineStatus::Succeeded {
                    result: json!({"result": "done"}),
                },
            ),
    );
    let scheduler = scheduler_for(Arc::clone(&adapter));

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;
    wait_until(&scheduler, job_id, |r| {
        r.status() == JobStatus::Running && messages(r).contains(&"working".to_string())
    })
    .await;

    scheduler.cancel(job_id).await?;
    let record = with_timeout(scheduler.wait(job_id)).await?;

    assert_eq!(record.status(), JobStatus::Cancelled);
    assert!(record.result().is_none());
    let lines = messages(&record);
    assert!(lines.contains(&"received stop request".to_string()));
    assert!(!lines.contains(&COMPLETED_LINE.to_string()));
    assert_eq!(lines.last().map(String::as_str), Some("cancelled by user"));
    assert_eq!(adapter.count(&FakeCall::Cancel), 1);
    assert_finished_consistent(&record);
    Ok(())
}

#[tokio::test]
async fn success_racing_a_cancel_loses() -> TestResult {
    init_tracing();
    let gate = Arc::new(Notify::new());
    let adapter = Arc::new(
        FakeAdapter::new()
            .then(Round::emit(["working"]))
            .then(Round::Gated(
                Arc::clone(&gate),
                EngineStatus::Succeeded {
                    result: json!({"result": "done"}),
                },
            )),
    );
    let scheduler = scheduler_for(adapter);

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;
    wait_until(&scheduler, job_id, |r| messages(r).contains(&"working".to_string())).await;

    // The success report is held back until the cancel has been accepted.
    scheduler.cancel(job_id).await?;
    gate.notify_one();

    let record = with_timeout(scheduler.wait(job_id)).await?;
    assert_eq!(record.status(), JobStatus::Cancelled);
    assert!(record.result().is_none());
    assert!(!messages(&record).contains(&COMPLETED_LINE.to_string()));
    Ok(())
}

#[tokio::test]
async fn readers_only_ever_see_a_prefix_of_the_final_log() -> TestResult {
    init_tracing();
    let mut adapter = FakeAdapter::new();
    for batch in 0..20 {
        adapter = adapter.then(Round::emit((0..3).map(|i| format!("batch {batch} line {i}"))));
    }
    let adapter = Arc::new(adapter.then(Round::succeed(json!({"result": "ok"}))));
    let scheduler = Arc::new(scheduler_for(Arc::clone(&adapter)));

    let job_id = scheduler.submit(ParamsBuilder::review().build()).await?;

    let reader = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            let mut snapshots = Vec::new();
            loop {
                let record = scheduler.get(job_id).await.expect("job should exist");
                let done = record.is_terminal();
                snapshots.push(messages(&record));
                if done {
                    return snapshots;
                }
                tokio::task::yield_now().await;
            }
        })
    };

    let final_record = with_timeout(scheduler.wait(job_id)).await?;
    let snapshots = with_timeout(reader).await?;
    let final_lines = messages(&final_record);

    for snapshot in &snapshots {
        assert!(
            final_lines.starts_with(snapshot),
            "snapshot {snapshot:?} is not a prefix of the final log"
        );
    }
    assert_eq!(final_lines.len(), 20 * 3 + 2);

    let offsets = adapter.log_offsets();
    assert!(offsets.windows(2).all(|w| w[0] <= w[1]), "offsets went backwards: {offsets:?}");
    assert_eq!(offsets.last().copied(), Some(60));
    Ok(())
}
