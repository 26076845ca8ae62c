// src/engine/control.rs

//! Per-job cancellation latch shared between the scheduler and the job's
//! orchestration task.
//!
//! The terminal decision is linearised through one small mutex:
//!
//! - the scheduler records a cancellation only while the job is `Active`;
//! - the task claims a SUCCESS/FAILED outcome only while no cancellation has
//!   been recorded.
//!
//! Whichever gets there first wins. A late SUCCESS/FAILED report after a
//! recorded cancellation is therefore always discarded, and a cancellation
//! that arrives once the task has started finalising is refused.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why a job was cancelled. Decides the log line written on CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    User,
    Shutdown,
}

impl CancelReason {
    pub fn log_line(self) -> &'static str {
        match self {
            CancelReason::User => "cancelled by user",
            CancelReason::Shutdown => "cancelled: scheduler shutting down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    CancelRequested(CancelReason),
    Finalizing,
}

#[derive(Debug)]
pub struct JobControl {
    token: CancellationToken,
    phase: Mutex<Phase>,
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

impl JobControl {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            phase: Mutex::new(Phase::Active),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a cancellation request.
    ///
    /// Returns `false` when the job has already started finalising and can no
    /// longer be cancelled. Repeated requests are accepted; the first reason
    /// sticks.
    pub fn request_cancel(&self, reason: CancelReason) -> bool {
        let mut phase = self.phase();
        match *phase {
            Phase::Active => {
                *phase = Phase::CancelRequested(reason);
                self.token.cancel();
                true
            }
            Phase::CancelRequested(_) => true,
            Phase::Finalizing => false,
        }
    }

    /// Resolves once a cancellation has been recorded.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match *self.phase() {
            Phase::CancelRequested(reason) => Some(reason),
            _ => None,
        }
    }

    /// Claim the right to write a SUCCESS/FAILED outcome.
    ///
    /// Fails with the recorded reason if a cancellation got in first.
    pub fn begin_finalize(&self) -> Result<(), CancelReason> {
        let mut phase = self.phase();
        match *phase {
            Phase::Active => {
                *phase = Phase::Finalizing;
                Ok(())
            }
            Phase::CancelRequested(reason) => Err(reason),
            Phase::Finalizing => Ok(()),
        }
    }

    /// Close the latch after a cancellation has been honoured.
    pub fn seal(&self) {
        *self.phase() = Phase::Finalizing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_before_finalize_wins() {
        let control = JobControl::new();
        assert!(control.request_cancel(CancelReason::User));
        assert_eq!(control.begin_finalize(), Err(CancelReason::User));
        assert_eq!(control.cancel_reason(), Some(CancelReason::User));
    }

    #[test]
    fn finalize_before_cancel_refuses_cancel() {
        let control = JobControl::new();
        assert_eq!(control.begin_finalize(), Ok(()));
        assert!(!control.request_cancel(CancelReason::User));
        assert_eq!(control.cancel_reason(), None);
    }

    #[test]
    fn first_reason_sticks() {
        let control = JobControl::new();
        assert!(control.request_cancel(CancelReason::Shutdown));
        assert!(control.request_cancel(CancelReason::User));
        assert_eq!(control.cancel_reason(), Some(CancelReason::Shutdown));
    }

    #[test]
    fn repeat_requests_are_accepted_until_sealed() {
        let control = JobControl::new();
        assert!(control.request_cancel(CancelReason::User));
        assert!(control.request_cancel(CancelReason::User));
        control.seal();
        assert!(!control.request_cancel(CancelReason::User));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_request() {
        let control = JobControl::new();
        control.request_cancel(CancelReason::User);
        tokio::time::timeout(std::time::Duration::from_millis(100), control.cancelled())
            .await
            .expect("cancellation should be observable");
    }
}
