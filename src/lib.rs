// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod job;
pub mod logging;
pub mod store;
pub mod types;

use std::path::PathBuf;
use std::pin::pin;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_or_default};
use crate::engine::JobScheduler;
use crate::errors::SchedulerError;
use crate::exec::build_adapter;
use crate::job::{ExecutionRequest, JobId, JobRecord};
use crate::types::JobStatus;

/// How often the CLI re-reads the record while following a job.
const FOLLOW_INTERVAL: Duration = Duration::from_millis(200);

/// High-level entry point used by `main.rs`.
///
/// Loads the config, submits one job built from the CLI arguments, prints
/// committed log lines until the job is terminal and returns the process
/// exit code. Ctrl-C cancels the job.
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_or_default(&config_path)?;
    if let Some(kind) = args.adapter {
        cfg.adapter = kind;
    }

    let request = build_request(&args);

    if args.dry_run {
        print_dry_run(&cfg, &request)?;
        return Ok(0);
    }

    let scheduler = JobScheduler::from_config(&cfg)?;
    let job_id = scheduler.submit_request(&request).await?;
    info!(%job_id, adapter = scheduler.adapter_name(), "following job");

    let record = follow(&scheduler, job_id).await?;
    scheduler.shutdown().await;

    report(&record);
    Ok(exit_code(record.status()))
}

fn build_request(args: &CliArgs) -> ExecutionRequest {
    args.options.iter().fold(
        ExecutionRequest::new(args.mode, args.target.clone()),
        |req, (key, value)| req.with_option(key.clone(), value.clone()),
    )
}

/// Print newly committed log lines until the record is terminal.
async fn follow(scheduler: &JobScheduler, job_id: JobId) -> Result<JobRecord> {
    let mut printed = 0usize;
    let mut cancel_sent = false;
    let mut ctrl_c = pin!(tokio::signal::ctrl_c());
    let mut ticker = tokio::time::interval(FOLLOW_INTERVAL);

    loop {
        tokio::select! {
            res = &mut ctrl_c, if !cancel_sent => {
                cancel_sent = true;
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                } else {
                    request_cancel(scheduler, job_id).await?;
                }
            }
            _ = ticker.tick() => {}
        }

        let record = scheduler.get(job_id).await?;
        for line in record.logs().iter().skip(printed) {
            println!("[{}] {}", line.at.to_rfc3339(), line.message);
        }
        printed = record.logs().len();

        if record.is_terminal() {
            return Ok(record);
        }
    }
}

async fn request_cancel(scheduler: &JobScheduler, job_id: JobId) -> Result<()> {
    match scheduler.cancel(job_id).await {
        Ok(()) => {
            eprintln!("cancelling job {job_id}...");
            Ok(())
        }
        Err(SchedulerError::NotCancellable { status, .. }) => {
            debug!(%job_id, %status, "job finished before the cancel request");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn report(record: &JobRecord) {
    match record.status() {
        JobStatus::Success => eprintln!("job {} succeeded", record.id()),
        JobStatus::Failed => eprintln!(
            "job {} failed: {}",
            record.id(),
            record.error_message().unwrap_or("unknown error")
        ),
        status => eprintln!("job {} ended as {status}", record.id()),
    }
}

/// 0 only for SUCCESS.
pub fn exit_code(status: JobStatus) -> i32 {
    match status {
        JobStatus::Success => 0,
        JobStatus::Cancelled => 130,
        _ => 1,
    }
}

/// Print the effective configuration and the request that would be sent.
fn print_dry_run(cfg: &ConfigFile, request: &ExecutionRequest) -> Result<()> {
    println!("execflow dry-run");
    println!("  adapter = {:?}", cfg.adapter);
    println!("  remote.base_url = {}", cfg.remote.base_url);
    println!("  remote.poll_interval = {:?}", cfg.remote.poll_interval);
    println!("  remote.request_timeout = {:?}", cfg.remote.request_timeout);
    println!(
        "  subprocess.command = {} {}",
        cfg.subprocess.program,
        cfg.subprocess.args.join(" ")
    );
    if let Some(dir) = &cfg.subprocess.working_dir {
        println!("  subprocess.working_dir = {}", dir.display());
    }
    println!(
        "  orchestrator.max_consecutive_poll_failures = {}",
        cfg.orchestrator.max_consecutive_poll_failures
    );
    println!(
        "  orchestrator.drain_timeout = {:?}",
        cfg.orchestrator.drain_timeout
    );
    println!("  store = {:?} ({})", cfg.store.kind, cfg.store.dir.display());
    println!();

    println!("request:");
    println!("{}", serde_json::to_string_pretty(request)?);

    let adapter = build_adapter(cfg)?;
    match adapter.validate(request) {
        Ok(()) => println!("request is valid for the {} adapter", adapter.name()),
        Err(e) => println!("request rejected by the {} adapter: {e}", adapter.name()),
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
