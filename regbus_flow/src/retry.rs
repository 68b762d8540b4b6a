//! Whole-flow retry with a recovery action between attempts.
//!
//! There is no per-step retry: a failed attempt runs the recovery action,
//! waits `delay_ms` and starts the flow again from its first step.

use crate::error::MotionError;
use crate::flow::FlowDefinition;
use crate::motion::MotionController;
use crate::orchestrator::{FlowOrchestrator, FlowOutcome, FlowStatus};
use regbus_bus::RegisterAccess;
use regbus_common::cancel::CancelToken;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
        }
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Brings the cell back to a state where the flow can start over.
pub trait RecoveryAction<M>: Send {
    fn recover(&mut self, motion: &mut M, cancel: &CancelToken) -> Result<(), MotionError>;
}

impl<M, F> RecoveryAction<M> for F
where
    F: FnMut(&mut M, &CancelToken) -> Result<(), MotionError> + Send,
{
    fn recover(&mut self, motion: &mut M, cancel: &CancelToken) -> Result<(), MotionError> {
        self(motion, cancel)
    }
}

/// Pause the arm, wait, resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseResumeRecovery {
    pub pause: Duration,
}

impl Default for PauseResumeRecovery {
    fn default() -> Self {
        Self {
            pause: Duration::from_millis(500),
        }
    }
}

impl<M: MotionController> RecoveryAction<M> for PauseResumeRecovery {
    fn recover(&mut self, motion: &mut M, cancel: &CancelToken) -> Result<(), MotionError> {
        motion.pause()?;
        // Resume even when cancelled.
        cancel.sleep(self.pause);
        motion.resume()
    }
}

impl<M: MotionController, A: RegisterAccess> FlowOrchestrator<M, A> {
    /// Run `flow` until it succeeds, is cancelled or runs out of attempts.
    ///
    /// The returned outcome is the last attempt's, with `attempts` and
    /// `execution_time` covering the whole run.
    pub fn execute_with_retry<R: RecoveryAction<M>>(
        &mut self,
        flow: &FlowDefinition,
        policy: &RetryPolicy,
        recovery: &mut R,
    ) -> FlowOutcome {
        let started = Instant::now();
        let cancel = self.cancel_token().clone();
        let max_attempts = policy.max_attempts();
        let mut attempt = 1;

        loop {
            let mut outcome = self.execute(flow);
            outcome.attempts = attempt;
            outcome.execution_time = started.elapsed();

            if outcome.success {
                if attempt > 1 {
                    info!(flow = flow.id, attempt, "flow succeeded after retry");
                }
                return outcome;
            }
            if outcome.status == FlowStatus::Cancelled {
                return outcome;
            }
            if attempt >= max_attempts {
                error!(
                    flow = flow.id,
                    attempts = attempt,
                    error = %outcome.message,
                    "flow failed, giving up"
                );
                return outcome;
            }

            warn!(
                flow = flow.id,
                attempt,
                max_attempts,
                error = %outcome.message,
                "flow attempt failed, recovering"
            );
            if let Err(e) = recovery.recover(self.motion_mut(), &cancel) {
                error!(flow = flow.id, error = %e, "recovery failed");
                outcome.message = format!("{}; recovery failed: {e}", outcome.message);
                outcome.execution_time = started.elapsed();
                return outcome;
            }
            if cancel.sleep(policy.delay()) {
                self.set_status(FlowStatus::Cancelled);
                outcome.status = FlowStatus::Cancelled;
                outcome.execution_time = started.elapsed();
                return outcome;
            }
            attempt += 1;
        }
    }
}
