// src/engine/mod.rs

//! Job orchestration.
//!
//! - [`scheduler`] is the public surface: submit, get, cancel, wait,
//!   shutdown. It owns one orchestration task per live job.
//! - [`orchestrator`] drives a single job through the state machine against
//!   an [`ExecutionAdapter`](crate::exec::ExecutionAdapter), committing log
//!   batches as they arrive.
//! - [`control`] is the latch that decides between a cancellation and a
//!   late SUCCESS/FAILED report.

pub mod control;
pub mod orchestrator;
pub mod scheduler;

pub use control::{CancelReason, JobControl};
pub use orchestrator::{COMPLETED_LINE, ExecutionOrchestrator, STARTED_LINE};
pub use scheduler::JobScheduler;
