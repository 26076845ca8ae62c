// src/job/request.rs

use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::ExecutionMode;

/// Default target when the caller does not name one: the engine's working
/// directory.
pub const DEFAULT_TARGET: &str = ".";

/// The typed view of a job's `input_parameters` that adapters consume.
///
/// Parameters are otherwise opaque: only `mode`, `target` and `options` are
/// read, and `options` is forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRequest {
    pub mode: ExecutionMode,
    pub target: String,
    pub options: Map<String, Value>,
}

impl ExecutionRequest {
    pub fn new(mode: ExecutionMode, target: impl Into<String>) -> Self {
        Self {
            mode,
            target: target.into(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Extract the request from a caller-supplied parameter map.
    ///
    /// Missing `mode` defaults to `review` and missing `target` to `"."`;
    /// present-but-malformed values are rejected.
    pub fn from_parameters(params: &Map<String, Value>) -> Result<Self, String> {
        let mode = match params.get("mode") {
            None | Some(Value::Null) => ExecutionMode::default(),
            Some(Value::String(s)) => s.parse()?,
            Some(other) => return Err(format!("`mode` must be a string, got {other}")),
        };

        let target = match params.get("target") {
            None | Some(Value::Null) => DEFAULT_TARGET.to_string(),
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err("`target` must not be empty".to_string());
            }
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(format!("`target` must be a string, got {other}")),
        };

        let options = match params.get("options") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => return Err(format!("`options` must be an object, got {other}")),
        };

        Ok(Self {
            mode,
            target,
            options,
        })
    }

    /// The parameter map this request round-trips to.
    pub fn to_parameters(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("mode".into(), Value::String(self.mode.to_string()));
        params.insert("target".into(), Value::String(self.target.clone()));
        params.insert("options".into(), Value::Object(self.options.clone()));
        params
    }
}
