// src/job/mod.rs

//! Job records and the requests they are built from.
//!
//! - [`record`] holds [`JobRecord`], the persisted state of one execution,
//!   together with the methods that enforce its state machine.
//! - [`request`] turns the caller's opaque parameter map into a typed
//!   [`ExecutionRequest`] for the adapters.

pub mod record;
pub mod request;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use record::{JobRecord, LogLine};
pub use request::ExecutionRequest;

/// Opaque identity of a job, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(JobId)
    }
}
