// src/exec/remote.rs

//! HTTP client for a remote execution service.
//!
//! Wire protocol:
//!
//! | call   | request                                    | response                               |
//! |--------|--------------------------------------------|----------------------------------------|
//! | submit | `POST /v1/execute {mode, target, options}` | `{"execution_id": ..}`                 |
//! | logs   | `GET /v1/logs/{id}?last_index=N`           | `{"logs": [..]}`                       |
//! | status | `GET /v1/status/{id}`                      | `{"status", "result"?, "error"?}`      |
//! | cancel | `POST /v1/cancel/{id}`                     | any 2xx                                |

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::RemoteSettings;
use crate::errors::AdapterError;
use crate::job::ExecutionRequest;
use crate::types::BoxFuture;

use super::backend::{EngineStatus, ExecutionAdapter, ExecutionHandle};

#[derive(Debug, Clone)]
pub struct RemoteAdapter {
    client: Client,
    base_url: String,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    execution_id: Value,
}

#[derive(Debug, Deserialize)]
struct LogsResponse {
    #[serde(default)]
    logs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RemoteAdapter {
    pub fn new(settings: &RemoteSettings) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| AdapterError::Unreachable(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            poll_interval: settings.poll_interval,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Turn a non-2xx response into an adapter error, carrying the body text.
async fn check(resp: Response, what: &str) -> Result<Response, AdapterError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let detail = format!("{what} returned HTTP {status}: {}", body.trim());
    if status.is_client_error() && status != StatusCode::NOT_FOUND {
        Err(AdapterError::InvalidParameters(detail))
    } else {
        Err(AdapterError::Unreachable(detail))
    }
}

fn handle_from_value(id: Value) -> Result<ExecutionHandle, AdapterError> {
    match id {
        Value::String(s) if !s.is_empty() => Ok(ExecutionHandle::new(s)),
        Value::Number(n) => Ok(ExecutionHandle::new(n.to_string())),
        other => Err(AdapterError::Protocol(format!(
            "execution_id must be a string or number, got {other}"
        ))),
    }
}

fn status_from_response(resp: StatusResponse) -> Result<EngineStatus, AdapterError> {
    match resp.status.as_str() {
        "running" | "pending" | "queued" => Ok(EngineStatus::Running),
        // The engine's payload is wrapped so the record always holds an object.
        "succeeded" => Ok(EngineStatus::Succeeded {
            result: json!({ "result": resp.result }),
        }),
        "failed" => Ok(EngineStatus::Failed {
            error: resp
                .error
                .unwrap_or_else(|| "engine reported failure without detail".to_string()),
            result: resp.result,
        }),
        other => Err(AdapterError::Protocol(format!("unknown status '{other}'"))),
    }
}

impl ExecutionAdapter for RemoteAdapter {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn submit<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<ExecutionHandle, AdapterError>> {
        Box::pin(async move {
            debug!(base_url = %self.base_url, mode = %request.mode, target = %request.target, "submitting execution");
            let resp = self
                .client
                .post(self.url("/v1/execute"))
                .json(request)
                .send()
                .await?;
            let body: SubmitResponse = check(resp, "execute").await?.json().await?;
            handle_from_value(body.execution_id)
        })
    }

    fn wait_for_activity<'a>(&'a self, _handle: &'a ExecutionHandle) -> BoxFuture<'a, ()> {
        Box::pin(tokio::time::sleep(self.poll_interval))
    }

    fn poll_logs<'a>(
        &'a self,
        handle: &'a ExecutionHandle,
        since: usize,
    ) -> BoxFuture<'a, Result<Vec<String>, AdapterError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(self.url(&format!("/v1/logs/{handle}")))
                .query(&[("last_index", since)])
                .send()
                .await?;
            let body: LogsResponse = check(resp, "logs").await?.json().await?;
            Ok(body.logs)
        })
    }

    fn poll_status<'a>(
        &'a self,
        handle: &'a ExecutionHandle,
    ) -> BoxFuture<'a, Result<EngineStatus, AdapterError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(self.url(&format!("/v1/status/{handle}")))
                .send()
                .await?;
            let body: StatusResponse = check(resp, "status").await?.json().await?;
            status_from_response(body)
        })
    }

    fn cancel<'a>(&'a self, handle: &'a ExecutionHandle) -> BoxFuture<'a, Result<(), AdapterError>> {
        Box::pin(async move {
            let resp = self
                .client
                .post(self.url(&format!("/v1/cancel/{handle}")))
                .send()
                .await?;
            if let Err(e) = check(resp, "cancel").await {
                warn!(%handle, error = %e, "remote engine rejected cancellation");
                return Err(e);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(raw: Value) -> Result<EngineStatus, AdapterError> {
        status_from_response(serde_json::from_value(raw).unwrap())
    }

    #[test]
    fn maps_wire_statuses() {
        assert_eq!(status(json!({"status": "running"})).unwrap(), EngineStatus::Running);
        assert_eq!(
            status(json!({"status": "succeeded", "result": "done"})).unwrap(),
            EngineStatus::Succeeded {
                result: json!({"result": "done"})
            }
        );
        assert_eq!(
            status(json!({"status": "failed", "error": "lint failed"})).unwrap(),
            EngineStatus::Failed {
                error: "lint failed".to_string(),
                result: None
            }
        );
        assert!(matches!(
            status(json!({"status": "exploded"})),
            Err(AdapterError::Protocol(_))
        ));
    }

    #[test]
    fn accepts_numeric_execution_ids() {
        assert_eq!(handle_from_value(json!(42)).unwrap().as_str(), "42");
        assert_eq!(handle_from_value(json!("abc")).unwrap().as_str(), "abc");
        assert!(handle_from_value(json!(null)).is_err());
        assert!(handle_from_value(json!("")).is_err());
    }
}
