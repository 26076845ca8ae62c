//! A tiny HTTP/1.1 engine speaking the remote wire protocol.
//!
//! One request per connection, `Content-Length` framing, `Connection: close`
//! on every response. Good enough for `reqwest` and nothing else.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

/// A request as seen by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
struct StatusRound {
    new_logs: Vec<String>,
    reply: Value,
}

#[derive(Debug)]
struct ServerState {
    execution_id: Value,
    submit_reply: Option<(u16, Value)>,
    logs: Vec<String>,
    rounds: VecDeque<StatusRound>,
    last_status: Value,
    polls_failing: bool,
    after_cancel: Option<Value>,
    requests: Vec<RecordedRequest>,
}

#[derive(Debug)]
pub struct FakeEngineServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    task: JoinHandle<()>,
}

impl Drop for FakeEngineServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(state: &Mutex<ServerState>) -> MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeEngineServer {
    /// Bind to an ephemeral port on localhost and start serving.
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServerState {
            execution_id: json!("exec-1"),
            submit_reply: None,
            logs: Vec::new(),
            rounds: VecDeque::new(),
            last_status: json!({ "status": "running" }),
            polls_failing: false,
            after_cancel: None,
            requests: Vec::new(),
        }));

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, state).await {
                        debug!(error = %e, "fake engine connection failed");
                    }
                });
            }
        });

        Ok(Self { addr, state, task })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        lock(&self.state)
    }

    pub fn with_execution_id(self, id: Value) -> Self {
        self.state().execution_id = id;
        self
    }

    /// Answer `POST /v1/execute` with this status code and body.
    pub fn with_submit_reply(self, code: u16, body: Value) -> Self {
        self.state().submit_reply = Some((code, body));
        self
    }

    /// Queue one `GET /v1/status` answer. `new_logs` become visible to
    /// `GET /v1/logs` when the round is served. The last answer repeats once
    /// the queue is empty.
    pub fn then_status<I, S>(self, new_logs: I, reply: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().rounds.push_back(StatusRound {
            new_logs: new_logs.into_iter().map(Into::into).collect(),
            reply,
        });
        self
    }

    /// Status reported after `POST /v1/cancel`.
    pub fn with_status_after_cancel(self, reply: Value) -> Self {
        self.state().after_cancel = Some(reply);
        self
    }

    /// Answer everything but `POST /v1/execute` with 503 while set.
    pub fn set_polls_failing(&self, failing: bool) {
        self.state().polls_failing = failing;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    pub fn requests_to(&self, prefix: &str) -> Vec<RecordedRequest> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.path.starts_with(prefix))
            .cloned()
            .collect()
    }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<ServerState>>) -> anyhow::Result<()> {
    let mut reader = BufReader::new(&mut stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        if line == "\r\n" || line.is_empty() {
            break;
        }
        if let Some(val) = line.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = val.trim().parse().unwrap_or(0);
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await?;
    }
    let body = serde_json::from_slice(&body).ok();

    let (code, reply) = route(&state, &method, &target, body);
    let payload = reply.to_string();
    let response = format!(
        "HTTP/1.1 {code} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        reason(code),
        payload.len(),
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

fn route(state: &Mutex<ServerState>, method: &str, target: &str, body: Option<Value>) -> (u16, Value) {
    let mut state = lock(state);
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    state.requests.push(RecordedRequest {
        method: method.to_string(),
        path: path.to_string(),
        body,
    });

    if state.polls_failing && !(method == "POST" && path == "/v1/execute") {
        return (503, json!({ "detail": "engine unavailable" }));
    }

    match (method, path) {
        ("POST", "/v1/execute") => match state.submit_reply.clone() {
            Some(reply) => reply,
            None => (200, json!({ "execution_id": state.execution_id })),
        },
        ("GET", p) if p.starts_with("/v1/logs/") => {
            let since = query
                .split('&')
                .find_map(|kv| kv.strip_prefix("last_index="))
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(0);
            let logs = state.logs.get(since..).map(<[String]>::to_vec).unwrap_or_default();
            (200, json!({ "logs": logs }))
        }
        ("GET", p) if p.starts_with("/v1/status/") => {
            if let Some(round) = state.rounds.pop_front() {
                state.logs.extend(round.new_logs);
                state.last_status = round.reply;
            }
            (200, state.last_status.clone())
        }
        ("POST", p) if p.starts_with("/v1/cancel/") => {
            state.rounds.clear();
            if let Some(reply) = state.after_cancel.take() {
                state.last_status = reply;
            }
            (200, json!({ "cancelled": true }))
        }
        _ => (404, json!({ "detail": "not found" })),
    }
}

fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
