// src/exec/mod.rs

//! Execution back-ends.
//!
//! - [`backend`] defines the `ExecutionAdapter` trait that the orchestrator
//!   is written against, plus [`build_adapter`] which picks the variant
//!   configured for this deployment.
//! - [`remote`] polls an HTTP execution service on a fixed interval.
//! - [`subprocess`] runs the engine as a local process via
//!   `tokio::process::Command` and streams its combined output.

pub mod backend;
pub mod remote;
pub mod subprocess;

pub use backend::{EngineStatus, ExecutionAdapter, ExecutionHandle, build_adapter};
pub use remote::RemoteAdapter;
pub use subprocess::SubprocessAdapter;
