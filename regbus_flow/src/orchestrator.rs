//! Flow execution.
//!
//! Motion steps are queued on the controller without waiting. Before any
//! device step the orchestrator inserts a barrier ([`MotionController::sync`])
//! so the device acts on a settled arm. A step with `barrier: true` syncs
//! after it runs and every flow ends with a barrier.
//!
//! The first failing step aborts the flow. Nothing is undone; the outcome
//! records how many steps completed and the error message.

use crate::device::{DeviceAdapter, DeviceOutput};
use crate::error::{FlowError, FlowResult};
use crate::flow::{FlowDefinition, FlowStep, Operation, Target};
use crate::motion::MotionController;
use crate::points::{PointTable, Pose};
use crate::progress::ProgressWriter;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regbus_bus::RegisterAccess;
use regbus_common::cancel::CancelToken;
use regbus_handshake::vision::DetectionResult;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// ─── Status ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Result of one flow execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowOutcome {
    pub flow_id: u16,
    pub success: bool,
    pub status: FlowStatus,
    pub message: String,
    pub execution_time: Duration,
    pub steps_completed: u16,
    pub total_steps: u16,
    /// Attempts made, 1 unless run through the retry wrapper.
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

// ─── Orchestrator ───────────────────────────────────────────────────

/// Runs flows against one motion controller and a set of named devices.
pub struct FlowOrchestrator<M, A> {
    motion: M,
    devices: BTreeMap<String, Box<dyn DeviceAdapter>>,
    points: PointTable,
    progress: ProgressWriter<A>,
    status: Arc<RwLock<FlowStatus>>,
    last_detection: Option<DetectionResult>,
    motion_pending: bool,
    cancel: CancelToken,
}

impl<M: MotionController, A: RegisterAccess> FlowOrchestrator<M, A> {
    pub fn new(
        motion: M,
        points: PointTable,
        progress: ProgressWriter<A>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            motion,
            devices: BTreeMap::new(),
            points,
            progress,
            status: Arc::new(RwLock::new(FlowStatus::Idle)),
            last_detection: None,
            motion_pending: false,
            cancel,
        }
    }

    /// Register a device under `name`, replacing any previous one.
    pub fn add_device(&mut self, name: impl Into<String>, device: Box<dyn DeviceAdapter>) {
        let name = name.into();
        debug!(device = %name, adapter = device.name(), "device registered");
        self.devices.insert(name, device);
    }

    pub fn with_device(mut self, name: impl Into<String>, device: Box<dyn DeviceAdapter>) -> Self {
        self.add_device(name, device);
        self
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn motion(&self) -> &M {
        &self.motion
    }

    pub fn motion_mut(&mut self) -> &mut M {
        &mut self.motion
    }

    pub fn points(&self) -> &PointTable {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut PointTable {
        &mut self.points
    }

    pub fn progress(&self) -> &ProgressWriter<A> {
        &self.progress
    }

    pub fn status(&self) -> FlowStatus {
        *self.status.read()
    }

    /// Shared view of the status for observers on other threads.
    pub fn status_handle(&self) -> Arc<RwLock<FlowStatus>> {
        Arc::clone(&self.status)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn last_detection(&self) -> Option<&DetectionResult> {
        self.last_detection.as_ref()
    }

    /// Back to Idle, forgetting the last detection.
    pub fn reset(&mut self) {
        self.last_detection = None;
        self.motion_pending = false;
        self.set_status(FlowStatus::Idle);
        info!("orchestrator reset");
    }

    /// Execute `flow` once.
    pub fn execute(&mut self, flow: &FlowDefinition) -> FlowOutcome {
        let started = Instant::now();
        let total = u16::try_from(flow.len()).unwrap_or(u16::MAX);
        self.set_status(FlowStatus::Running);
        info!(flow = flow.id, name = %flow.name, steps = total, "flow started");
        self.report_progress(0, total);

        let mut completed = 0u16;
        let result = self.run_steps(flow, total, &mut completed);

        let (status, message) = match result {
            Ok(()) => {
                info!(
                    flow = flow.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "flow completed"
                );
                (FlowStatus::Completed, format!("flow '{}' completed", flow.name))
            }
            Err(FlowError::Cancelled) => {
                warn!(flow = flow.id, completed, "flow cancelled");
                (FlowStatus::Cancelled, FlowError::Cancelled.to_string())
            }
            Err(e) => {
                let step = flow
                    .steps
                    .get(usize::from(completed))
                    .map_or("final barrier", |s| s.name.as_str());
                error!(flow = flow.id, step, completed, error = %e, "flow aborted");
                (FlowStatus::Error, format!("step '{step}' failed: {e}"))
            }
        };
        self.set_status(status);

        FlowOutcome {
            flow_id: flow.id,
            success: status == FlowStatus::Completed,
            status,
            message,
            execution_time: started.elapsed(),
            steps_completed: completed,
            total_steps: total,
            attempts: 1,
            finished_at: Utc::now(),
        }
    }

    fn run_steps(
        &mut self,
        flow: &FlowDefinition,
        total: u16,
        completed: &mut u16,
    ) -> FlowResult<()> {
        for step in &flow.steps {
            if self.cancel.is_cancelled() {
                return Err(FlowError::Cancelled);
            }
            self.run_step(step)?;
            *completed = completed.saturating_add(1);
            self.report_progress(*completed, total);
        }
        self.barrier()
    }

    fn run_step(&mut self, step: &FlowStep) -> FlowResult<()> {
        debug!(step = %step.name, "step");
        match &step.operation {
            Operation::MoveJoint { target } => {
                let pose = self.resolve(target)?;
                debug!(step = %step.name, %pose, "move joint");
                self.motion.move_joint(&pose)?;
                self.motion_pending = true;
            }
            Operation::MoveLinear { target } => {
                let pose = self.resolve(target)?;
                debug!(step = %step.name, %pose, "move linear");
                self.motion.move_linear(&pose)?;
                self.motion_pending = true;
            }
            Operation::Device { device, action } => {
                self.barrier()?;
                let adapter = self
                    .devices
                    .get_mut(device)
                    .ok_or_else(|| FlowError::UnknownDevice(device.clone()))?;
                let output = adapter.perform(action, &self.cancel)?;
                debug!(step = %step.name, device = %device, action = action.name(), "device done");
                if let Some(detection) = output.detection() {
                    self.last_detection = Some(detection.clone());
                }
                if let DeviceOutput::Angle(angle) = output {
                    info!(step = %step.name, angle = angle.angle, "angle measured");
                }
            }
            Operation::Delay { ms } => {
                if self.cancel.sleep(Duration::from_millis(*ms)) {
                    return Err(FlowError::Cancelled);
                }
            }
            Operation::SetOutput { index, on } => {
                self.motion.set_output(*index, *on)?;
                self.motion_pending = true;
            }
        }
        if step.barrier {
            self.barrier()?;
        }
        Ok(())
    }

    /// Wait for queued motion to settle.
    fn barrier(&mut self) -> FlowResult<()> {
        if self.motion_pending {
            self.motion.sync()?;
            self.motion_pending = false;
            debug!("barrier");
        }
        Ok(())
    }

    fn resolve(&self, target: &Target) -> FlowResult<Pose> {
        match target {
            Target::Point(name) => self.points.get(name),
            Target::Pose(pose) => Ok(*pose),
            Target::LastDetection { reference } => {
                let detection = self.last_detection.as_ref().ok_or(FlowError::NoDetection)?;
                let (Some(x), Some(y)) = (detection.world_x, detection.world_y) else {
                    return Err(FlowError::NoDetection);
                };
                let reference = self.points.get(reference)?;
                Ok(Pose {
                    x,
                    y,
                    ..reference
                })
            }
        }
    }

    fn report_progress(&self, current: u16, total: u16) {
        if let Err(e) = self.progress.write(current, total) {
            warn!(error = %e, current, total, "progress write failed");
        }
    }

    pub(crate) fn set_status(&self, status: FlowStatus) {
        *self.status.write() = status;
    }
}
