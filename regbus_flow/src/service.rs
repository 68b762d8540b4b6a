//! Flow service: runs registered flows on request from the bus.
//!
//! Bound to the motion module through a `DeviceLoop`. Opcode N starts flow N
//! through the retry wrapper. A flow that still fails after its retries
//! raises Alarm; [`RESET`] clears it and returns the orchestrator to Idle.
//!
//! Result block:
//!
//! | Offset | Content                          |
//! |--------|----------------------------------|
//! | +0     | success flag                     |
//! | +1     | steps completed                  |
//! | +2     | total steps                      |
//! | +3, +4 | execution time ms, hi/lo         |
//! | +5     | attempts                         |
//! | +6     | final [`FlowStatus`] code        |

use crate::error::{FlowError, FlowResult};
use crate::flow::FlowDefinition;
use crate::motion::MotionController;
use crate::orchestrator::{FlowOrchestrator, FlowOutcome, FlowStatus};
use crate::retry::{PauseResumeRecovery, RecoveryAction, RetryPolicy};
use regbus_bus::RegisterAccess;
use regbus_common::consts::{MOTION_LEN, NOP};
use regbus_common::layout::{CONTROL_WIDTH, STATUS_WIDTH};
use regbus_common::words::split_i32;
use regbus_handshake::{Command, CommandHandler, HandlerError, ResultBlock};
use static_assertions::const_assert;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Clears Alarm on the motion module.
pub const RESET: u16 = 255;

pub const RESULT_WIDTH: u16 = 7;

const_assert!(RESULT_WIDTH <= MOTION_LEN - CONTROL_WIDTH - STATUS_WIDTH);

pub const fn status_code(status: FlowStatus) -> u16 {
    match status {
        FlowStatus::Idle => 0,
        FlowStatus::Running => 1,
        FlowStatus::Completed => 2,
        FlowStatus::Error => 3,
        FlowStatus::Cancelled => 4,
    }
}

/// [`CommandHandler`] that maps opcodes to flows.
pub struct FlowService<M, A, R = PauseResumeRecovery> {
    orchestrator: FlowOrchestrator<M, A>,
    flows: BTreeMap<u16, FlowDefinition>,
    policy: RetryPolicy,
    recovery: R,
    last_outcome: Option<FlowOutcome>,
}

impl<M, A> FlowService<M, A>
where
    M: MotionController,
    A: RegisterAccess,
{
    pub fn new(orchestrator: FlowOrchestrator<M, A>) -> Self {
        Self::with_recovery(orchestrator, PauseResumeRecovery::default())
    }
}

impl<M, A, R> FlowService<M, A, R>
where
    M: MotionController,
    A: RegisterAccess,
    R: RecoveryAction<M>,
{
    pub fn with_recovery(orchestrator: FlowOrchestrator<M, A>, recovery: R) -> Self {
        Self {
            orchestrator,
            flows: BTreeMap::new(),
            policy: RetryPolicy::default(),
            recovery,
            last_outcome: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register `flow` under its id; returns the flow it replaced.
    pub fn register(&mut self, flow: FlowDefinition) -> FlowResult<Option<FlowDefinition>> {
        if flow.id == NOP || flow.id == RESET {
            return Err(FlowError::ReservedFlowId(flow.id));
        }
        info!(flow = flow.id, name = %flow.name, steps = flow.len(), "flow registered");
        Ok(self.flows.insert(flow.id, flow))
    }

    /// Register every `*.json` flow in `dir`. Returns how many were loaded.
    pub fn load_dir(&mut self, dir: &Path) -> FlowResult<usize> {
        let mut loaded = 0;
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        for path in paths {
            if let Some(previous) = self.register(FlowDefinition::load(&path)?)? {
                warn!(
                    flow = previous.id,
                    path = %path.display(),
                    "flow id defined twice, later file wins"
                );
            }
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn flow_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.flows.keys().copied()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn orchestrator(&self) -> &FlowOrchestrator<M, A> {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut FlowOrchestrator<M, A> {
        &mut self.orchestrator
    }

    pub fn last_outcome(&self) -> Option<&FlowOutcome> {
        self.last_outcome.as_ref()
    }

    /// Run flow `id` through the retry wrapper.
    pub fn run(&mut self, id: u16) -> FlowResult<FlowOutcome> {
        let flow = self.flows.get(&id).ok_or(FlowError::UnknownFlow(id))?;
        let outcome = self
            .orchestrator
            .execute_with_retry(flow, &self.policy, &mut self.recovery);
        self.last_outcome = Some(outcome.clone());
        Ok(outcome)
    }
}

impl<M, A, R> CommandHandler for FlowService<M, A, R>
where
    M: MotionController,
    A: RegisterAccess,
    R: RecoveryAction<M>,
{
    fn initialize(&mut self) -> Result<(), HandlerError> {
        info!(flows = self.flows.len(), "flow service ready");
        Ok(())
    }

    fn handle(&mut self, command: &Command, results: &mut ResultBlock) -> Result<(), HandlerError> {
        if command.opcode == RESET {
            self.orchestrator.reset();
            return Ok(());
        }
        let outcome = match self.run(command.opcode) {
            Ok(outcome) => outcome,
            Err(e) => return Err(HandlerError::Rejected(e.to_string())),
        };
        let millis = i32::try_from(outcome.execution_time.as_millis()).unwrap_or(i32::MAX);
        let [ms_hi, ms_lo] = split_i32(millis);
        results.set_slice(
            0,
            &[
                u16::from(outcome.success),
                outcome.steps_completed,
                outcome.total_steps,
                ms_hi,
                ms_lo,
                u16::try_from(outcome.attempts).unwrap_or(u16::MAX),
                status_code(outcome.status),
            ],
        )?;
        if outcome.success {
            Ok(())
        } else {
            Err(HandlerError::Failed(outcome.message))
        }
    }

    fn reset(&mut self) -> Result<(), HandlerError> {
        self.orchestrator.reset();
        Ok(())
    }
}
