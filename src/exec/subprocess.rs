// src/exec/subprocess.rs

//! Local process back-end.
//!
//! Each submitted request spawns `<program> <args..> <mode> <target>
//! [--key=value..]` with piped stdout/stderr. Both streams are read line by
//! line into one shared buffer in arrival order; the orchestrator is woken
//! on every new line and on exit.
//!
//! The exit status is only published after both readers have hit EOF, so a
//! caller that observes a terminal status has already been able to see every
//! line the process wrote.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SubprocessSection;
use crate::errors::AdapterError;
use crate::job::ExecutionRequest;
use crate::types::BoxFuture;

use super::backend::{EngineStatus, ExecutionAdapter, ExecutionHandle};

/// How long to wait for the output readers once the process has exited.
/// Grandchildren that inherited the pipes can keep them open indefinitely.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
enum ExitOutcome {
    Code(i32),
    Signalled,
    WaitFailed(String),
}

/// Shared state of one spawned process.
#[derive(Debug, Default)]
struct ProcessState {
    output: Mutex<Vec<String>>,
    exit: Mutex<Option<ExitOutcome>>,
    activity: Notify,
    kill: CancellationToken,
}

impl ProcessState {
    fn output(&self) -> MutexGuard<'_, Vec<String>> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exit(&self) -> MutexGuard<'_, Option<ExitOutcome>> {
        self.exit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_line(&self, line: String) {
        self.output().push(line);
        self.activity.notify_one();
    }

    fn finish(&self, outcome: ExitOutcome) {
        *self.exit() = Some(outcome);
        self.activity.notify_one();
    }
}

#[derive(Debug)]
pub struct SubprocessAdapter {
    settings: SubprocessSection,
    processes: Mutex<HashMap<ExecutionHandle, Arc<ProcessState>>>,
    next_id: AtomicU64,
}

impl SubprocessAdapter {
    pub fn new(settings: SubprocessSection) -> Self {
        Self {
            settings,
            processes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn processes(&self) -> MutexGuard<'_, HashMap<ExecutionHandle, Arc<ProcessState>>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self, handle: &ExecutionHandle) -> Result<Arc<ProcessState>, AdapterError> {
        self.processes()
            .get(handle)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownHandle(handle.to_string()))
    }

    fn build_command(&self, request: &ExecutionRequest) -> Command {
        let mut cmd = Command::new(&self.settings.program);
        cmd.args(&self.settings.args)
            .arg(request.mode.as_str())
            .arg(&request.target);

        for (key, value) in &request.options {
            match value {
                Value::Bool(true) => {
                    cmd.arg(format!("--{key}"));
                }
                Value::Bool(false) | Value::Null => {}
                Value::String(s) => {
                    cmd.arg(format!("--{key}={s}"));
                }
                other => {
                    cmd.arg(format!("--{key}={other}"));
                }
            }
        }

        if let Some(dir) = &self.settings.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Read `stream` line by line into `state`. Invalid UTF-8 is replaced rather
/// than ending the stream.
fn spawn_reader<R>(stream: R, state: Arc<ProcessState>, handle: ExecutionHandle, label: &'static str) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut segments = BufReader::new(stream).split(b'\n');
        loop {
            match segments.next_segment().await {
                Ok(Some(mut bytes)) => {
                    if bytes.last() == Some(&b'\r') {
                        bytes.pop();
                    }
                    let line = String::from_utf8_lossy(&bytes).into_owned();
                    debug!(%handle, stream = label, "{}", line);
                    state.push_line(line);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(%handle, stream = label, error = %e, "failed reading process output");
                    break;
                }
            }
        }
    })
}

/// Own the child until it exits (or is killed), then publish its outcome.
async fn supervise(mut child: Child, state: Arc<ProcessState>, handle: ExecutionHandle) {
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Arc::clone(&state), handle.clone(), "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Arc::clone(&state), handle.clone(), "stderr"));
    }

    // Either the process exits on its own, or we are asked to kill it.
    let waited = tokio::select! {
        status = child.wait() => status,
        _ = state.kill.cancelled() => {
            info!(%handle, "cancellation requested; killing process");
            if let Err(e) = child.start_kill() {
                warn!(%handle, error = %e, "failed to kill child process on cancellation");
            }
            child.wait().await
        }
    };

    for reader in readers {
        if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
            warn!(%handle, "output pipe still open after exit; dropping remaining output");
        }
    }

    let outcome = match waited {
        Ok(status) => outcome_from_status(status),
        Err(e) => ExitOutcome::WaitFailed(e.to_string()),
    };
    info!(%handle, outcome = ?outcome, "process exited");
    state.finish(outcome);
}

fn outcome_from_status(status: ExitStatus) -> ExitOutcome {
    match status.code() {
        Some(code) => ExitOutcome::Code(code),
        None => ExitOutcome::Signalled,
    }
}

fn engine_status(outcome: &ExitOutcome) -> EngineStatus {
    match outcome {
        ExitOutcome::Code(0) => EngineStatus::Succeeded {
            result: json!({ "exit_code": 0 }),
        },
        ExitOutcome::Code(code) => EngineStatus::Failed {
            error: format!("process exited with non-zero status {code}"),
            result: Some(json!({ "exit_code": code })),
        },
        ExitOutcome::Signalled => EngineStatus::Failed {
            error: "process terminated by signal".to_string(),
            result: None,
        },
        ExitOutcome::WaitFailed(e) => EngineStatus::Failed {
            error: format!("waiting for process failed: {e}"),
            result: None,
        },
    }
}

impl ExecutionAdapter for SubprocessAdapter {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn validate(&self, request: &ExecutionRequest) -> Result<(), AdapterError> {
        if request.target.starts_with('-') {
            return Err(AdapterError::InvalidParameters(format!(
                "target '{}' would be read as a flag",
                request.target
            )));
        }
        for key in request.options.keys() {
            if key.is_empty() || key.contains('=') || key.chars().any(char::is_whitespace) {
                return Err(AdapterError::InvalidParameters(format!(
                    "option name '{key}' cannot be passed on a command line"
                )));
            }
        }
        Ok(())
    }

    fn submit<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<ExecutionHandle, AdapterError>> {
        Box::pin(async move {
            let mut cmd = self.build_command(request);
            let child = cmd
                .spawn()
                .map_err(|e| AdapterError::Spawn(format!("{}: {e}", self.settings.program)))?;

            let n = self.next_id.fetch_add(1, Ordering::Relaxed);
            let handle = ExecutionHandle::new(match child.id() {
                Some(pid) => format!("proc-{n}-{pid}"),
                None => format!("proc-{n}"),
            });
            info!(%handle, program = %self.settings.program, mode = %request.mode, target = %request.target, "spawned process");

            let state = Arc::new(ProcessState::default());
            self.processes().insert(handle.clone(), Arc::clone(&state));
            tokio::spawn(supervise(child, state, handle.clone()));

            Ok(handle)
        })
    }

    fn wait_for_activity<'a>(&'a self, handle: &'a ExecutionHandle) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Ok(state) = self.state(handle) {
                state.activity.notified().await;
            }
        })
    }

    fn poll_logs<'a>(
        &'a self,
        handle: &'a ExecutionHandle,
        since: usize,
    ) -> BoxFuture<'a, Result<Vec<String>, AdapterError>> {
        Box::pin(async move {
            let state = self.state(handle)?;
            let output = state.output();
            Ok(output.get(since..).map(<[String]>::to_vec).unwrap_or_default())
        })
    }

    fn poll_status<'a>(
        &'a self,
        handle: &'a ExecutionHandle,
    ) -> BoxFuture<'a, Result<EngineStatus, AdapterError>> {
        Box::pin(async move {
            let state = self.state(handle)?;
            let exit = state.exit();
            Ok(exit.as_ref().map(engine_status).unwrap_or(EngineStatus::Running))
        })
    }

    fn cancel<'a>(&'a self, handle: &'a ExecutionHandle) -> BoxFuture<'a, Result<(), AdapterError>> {
        Box::pin(async move {
            self.state(handle)?.kill.cancel();
            Ok(())
        })
    }

    fn release(&self, handle: &ExecutionHandle) {
        if let Some(state) = self.processes().remove(handle) {
            // Dropping the last reference does not stop the supervisor; make
            // sure a still-running process is not left behind.
            state.kill.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> SubprocessAdapter {
        SubprocessAdapter::new(SubprocessSection {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo \"$0 $1 $2\"".to_string()],
            working_dir: None,
        })
    }

    #[test]
    fn rejects_flag_like_targets_and_bad_option_names() {
        let a = adapter();
        let ok = ExecutionRequest::new(crate::types::ExecutionMode::Review, ".");
        assert!(a.validate(&ok).is_ok());

        let flag = ExecutionRequest::new(crate::types::ExecutionMode::Review, "--all");
        assert!(matches!(a.validate(&flag), Err(AdapterError::InvalidParameters(_))));

        let bad_key = ok.clone().with_option("a b", 1);
        assert!(matches!(a.validate(&bad_key), Err(AdapterError::InvalidParameters(_))));
    }

    #[test]
    fn exit_codes_map_to_engine_status() {
        assert!(matches!(
            engine_status(&ExitOutcome::Code(0)),
            EngineStatus::Succeeded { .. }
        ));
        match engine_status(&ExitOutcome::Code(3)) {
            EngineStatus::Failed { error, result } => {
                assert!(error.contains("non-zero status 3"));
                assert_eq!(result, Some(json!({"exit_code": 3})));
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_handles_are_rejected() {
        let a = adapter();
        let h = ExecutionHandle::new("nope");
        assert!(matches!(a.poll_logs(&h, 0).await, Err(AdapterError::UnknownHandle(_))));
        assert!(matches!(a.poll_status(&h).await, Err(AdapterError::UnknownHandle(_))));
    }
}
