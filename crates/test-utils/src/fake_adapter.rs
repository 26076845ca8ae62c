use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use execflow::errors::AdapterError;
use execflow::exec::{EngineStatus, ExecutionAdapter, ExecutionHandle};
use execflow::job::ExecutionRequest;
use execflow::types::BoxFuture;
use serde_json::Value;
use tokio::sync::Notify;

/// One step of a scripted execution, consumed by each `poll_status` call.
#[derive(Debug, Clone)]
pub enum Round {
    /// Make `lines` available to later `poll_logs` calls; still running.
    Emit(Vec<String>),
    /// Report this status from now on.
    Report(EngineStatus),
    /// Fail this poll with a transient communication error.
    PollError(String),
    /// Block the poll until `gate` is notified, then report the status.
    Gated(Arc<Notify>, EngineStatus),
}

impl Round {
    pub fn emit<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Round::Emit(lines.into_iter().map(Into::into).collect())
    }

    pub fn succeed(result: Value) -> Self {
        Round::Report(EngineStatus::Succeeded { result })
    }

    pub fn fail(error: &str) -> Self {
        Round::Report(EngineStatus::Failed {
            error: error.to_string(),
            result: None,
        })
    }
}

/// Every adapter call, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    Submit { mode: String, target: String },
    PollLogs { since: usize },
    PollStatus,
    Cancel,
    Release,
}

#[derive(Debug)]
struct FakeState {
    script: VecDeque<Round>,
    output: Vec<String>,
    status: EngineStatus,
    submit_error: Option<String>,
    rejection: Option<String>,
    after_cancel: Option<(Vec<String>, EngineStatus)>,
    calls: Vec<FakeCall>,
}

/// A scripted adapter that records how the orchestrator drives it.
///
/// Once the script runs out, the last reported status is repeated, so an
/// unscripted job stays RUNNING until it is cancelled.
#[derive(Debug)]
pub struct FakeAdapter {
    state: Mutex<FakeState>,
    interval: Duration,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                script: VecDeque::new(),
                output: Vec::new(),
                status: EngineStatus::Running,
                submit_error: None,
                rejection: None,
                after_cancel: None,
                calls: Vec::new(),
            }),
            interval: Duration::from_millis(5),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn then(self, round: Round) -> Self {
        self.state().script.push_back(round);
        self
    }

    /// Make `submit` fail as if the engine could not be reached.
    pub fn failing_submit(self, message: &str) -> Self {
        self.state().submit_error = Some(message.to_string());
        self
    }

    /// Make `validate` reject every request.
    pub fn rejecting(self, message: &str) -> Self {
        self.state().rejection = Some(message.to_string());
        self
    }

    /// What the engine does once `cancel` is called: emit some more lines
    /// and then report `status` (e.g. a late success).
    pub fn on_cancel<I, S>(self, lines: I, status: EngineStatus) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().after_cancel = Some((lines.into_iter().map(Into::into).collect(), status));
        self
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, call: &FakeCall) -> usize {
        self.state().calls.iter().filter(|c| *c == call).count()
    }

    /// `since` offsets passed to `poll_logs`, in call order.
    pub fn log_offsets(&self) -> Vec<usize> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                FakeCall::PollLogs { since } => Some(*since),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: FakeCall) {
        self.state().calls.push(call);
    }
}

impl ExecutionAdapter for FakeAdapter {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn validate(&self, _request: &ExecutionRequest) -> Result<(), AdapterError> {
        match &self.state().rejection {
            Some(msg) => Err(AdapterError::InvalidParameters(msg.clone())),
            None => Ok(()),
        }
    }

    fn submit<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<ExecutionHandle, AdapterError>> {
        Box::pin(async move {
            self.record(FakeCall::Submit {
                mode: request.mode.to_string(),
                target: request.target.clone(),
            });
            match self.state().submit_error.clone() {
                Some(msg) => Err(AdapterError::Unreachable(msg)),
                None => Ok(ExecutionHandle::new("fake-1")),
            }
        })
    }

    fn wait_for_activity<'a>(&'a self, _handle: &'a ExecutionHandle) -> BoxFuture<'a, ()> {
        Box::pin(tokio::time::sleep(self.interval))
    }

    fn poll_logs<'a>(
        &'a self,
        _handle: &'a ExecutionHandle,
        since: usize,
    ) -> BoxFuture<'a, Result<Vec<String>, AdapterError>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(FakeCall::PollLogs { since });
            Ok(state.output.get(since..).map(<[String]>::to_vec).unwrap_or_default())
        })
    }

    fn poll_status<'a>(
        &'a self,
        _handle: &'a ExecutionHandle,
    ) -> BoxFuture<'a, Result<EngineStatus, AdapterError>> {
        Box::pin(async move {
            let round = {
                let mut state = self.state();
                state.calls.push(FakeCall::PollStatus);
                state.script.pop_front()
            };

            let status = match round {
                None => return Ok(self.state().status.clone()),
                Some(Round::Emit(lines)) => {
                    let mut state = self.state();
                    state.output.extend(lines);
                    state.status.clone()
                }
                Some(Round::Report(status)) => status,
                Some(Round::PollError(msg)) => return Err(AdapterError::Unreachable(msg)),
                Some(Round::Gated(gate, status)) => {
                    gate.notified().await;
                    status
                }
            };
            self.state().status = status.clone();
            Ok(status)
        })
    }

    fn cancel<'a>(&'a self, _handle: &'a ExecutionHandle) -> BoxFuture<'a, Result<(), AdapterError>> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(FakeCall::Cancel);
            state.script.clear();
            if let Some((lines, status)) = state.after_cancel.take() {
                state.output.extend(lines);
                state.status = status;
            }
            Ok(())
        })
    }

    fn release(&self, _handle: &ExecutionHandle) {
        self.record(FakeCall::Release);
    }
}
