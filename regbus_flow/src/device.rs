//! Device adapters as seen by a flow.
//!
//! A flow step names a device and a [`DeviceAction`]; the orchestrator looks
//! the device up and calls [`DeviceAdapter::perform`]. The handshake adapters
//! from `regbus_handshake` implement the trait directly.

use crate::error::{FlowError, FlowResult};
use regbus_bus::RegisterAccess;
use regbus_common::cancel::CancelToken;
use regbus_handshake::angle::{AngleClient, AngleError, AngleResult, DetectionMode};
use regbus_handshake::gripper::{DEFAULT_GRIP_ATTEMPTS, GripOutcome, GripperClient};
use regbus_handshake::vision::{DetectionResult, VisionClient};
use regbus_handshake::{HandshakeError, ResultQueue};
use serde::{Deserialize, Serialize};

/// Action requested from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeviceAction {
    /// Take the next queued detection, running a cycle if the queue is empty.
    NextDetection,
    /// Run a detection cycle and queue all of its results.
    CaptureDetect,
    Capture,
    Initialize,
    Grip {
        target: u16,
        #[serde(default)]
        attempts: Option<u32>,
    },
    Release { position: u16 },
    Open,
    Close,
    MoveTo { position: u16 },
    Stop,
    DetectAngle {
        #[serde(default)]
        mode: DetectionMode,
    },
    Reset,
}

impl DeviceAction {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NextDetection => "next_detection",
            Self::CaptureDetect => "capture_detect",
            Self::Capture => "capture",
            Self::Initialize => "initialize",
            Self::Grip { .. } => "grip",
            Self::Release { .. } => "release",
            Self::Open => "open",
            Self::Close => "close",
            Self::MoveTo { .. } => "move_to",
            Self::Stop => "stop",
            Self::DetectAngle { .. } => "detect_angle",
            Self::Reset => "reset",
        }
    }
}

/// What a device action produced.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceOutput {
    None,
    Detection(DetectionResult),
    /// Results a capture cycle added to the detection queue.
    Queued(usize),
    Angle(AngleResult),
    Grip(GripOutcome),
}

impl DeviceOutput {
    /// The detection a later `LastDetection` target should use, if any.
    pub fn detection(&self) -> Option<&DetectionResult> {
        match self {
            Self::Detection(d) => Some(d),
            _ => None,
        }
    }
}

/// A device a flow can drive.
pub trait DeviceAdapter: Send {
    /// Name used in log lines and errors.
    fn name(&self) -> &str;

    fn perform(&mut self, action: &DeviceAction, cancel: &CancelToken)
        -> FlowResult<DeviceOutput>;
}

fn unsupported(device: &str, action: &DeviceAction) -> FlowError {
    FlowError::UnsupportedAction {
        device: device.to_string(),
        action: action.name(),
    }
}

// ─── Vision ─────────────────────────────────────────────────────────

impl<A: RegisterAccess> DeviceAdapter for ResultQueue<DetectionResult, VisionClient<A>> {
    fn name(&self) -> &str {
        &self.source().handshake().layout().name
    }

    fn perform(
        &mut self,
        action: &DeviceAction,
        cancel: &CancelToken,
    ) -> FlowResult<DeviceOutput> {
        let vision = self.source();
        let wrap = |e: HandshakeError| FlowError::device(self.name(), e);
        match action {
            DeviceAction::NextDetection => match self.dequeue_next() {
                Some(detection) => Ok(DeviceOutput::Detection(detection)),
                None => Err(wrap(HandshakeError::failed("detection cycle yielded nothing"))),
            },
            DeviceAction::CaptureDetect => self
                .run_cycle(cancel)
                .map(DeviceOutput::Queued)
                .map_err(wrap),
            DeviceAction::Capture => vision
                .capture(cancel)
                .map(|()| DeviceOutput::None)
                .map_err(wrap),
            DeviceAction::Initialize => vision
                .initialize(cancel)
                .map(|()| DeviceOutput::None)
                .map_err(wrap),
            other => Err(unsupported(self.name(), other)),
        }
    }
}

// ─── Gripper ────────────────────────────────────────────────────────

impl<A: RegisterAccess> DeviceAdapter for GripperClient<A> {
    fn name(&self) -> &str {
        &self.handshake().layout().name
    }

    fn perform(
        &mut self,
        action: &DeviceAction,
        cancel: &CancelToken,
    ) -> FlowResult<DeviceOutput> {
        let done = |r: Result<(), HandshakeError>| {
            r.map(|()| DeviceOutput::None)
                .map_err(|e| FlowError::device(self.name(), e))
        };
        match action {
            DeviceAction::Grip { target, attempts } => self
                .smart_grip(*target, attempts.unwrap_or(DEFAULT_GRIP_ATTEMPTS), cancel)
                .map(DeviceOutput::Grip)
                .map_err(|e| FlowError::device(self.name(), e)),
            DeviceAction::Release { position } => done(self.smart_release(*position, cancel)),
            DeviceAction::MoveTo { position } => done(self.move_to(*position, cancel)),
            DeviceAction::Open => done(self.quick_open(cancel)),
            DeviceAction::Close => done(self.quick_close(cancel)),
            DeviceAction::Initialize => done(self.initialize(cancel)),
            DeviceAction::Stop => done(self.stop(cancel)),
            other => Err(unsupported(self.name(), other)),
        }
    }
}

// ─── Angle ──────────────────────────────────────────────────────────

impl<A: RegisterAccess> DeviceAdapter for AngleClient<A> {
    fn name(&self) -> &str {
        &self.handshake().layout().name
    }

    fn perform(
        &mut self,
        action: &DeviceAction,
        cancel: &CancelToken,
    ) -> FlowResult<DeviceOutput> {
        match action {
            DeviceAction::DetectAngle { mode } => match self.detect(*mode, cancel) {
                Ok(result) => Ok(DeviceOutput::Angle(result)),
                Err(AngleError::NoValidContour) => Err(FlowError::device(
                    self.name(),
                    HandshakeError::failed("NO_VALID_CONTOUR"),
                )),
                Err(AngleError::Handshake(e)) => Err(FlowError::device(self.name(), e)),
            },
            DeviceAction::Reset => self
                .reset(cancel)
                .map(|()| DeviceOutput::None)
                .map_err(|e| FlowError::device(self.name(), e)),
            other => Err(unsupported(self.name(), other)),
        }
    }
}
