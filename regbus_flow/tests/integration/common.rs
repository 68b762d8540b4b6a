//! Simulated arm and modules shared by the flow tests.

use parking_lot::Mutex;
use regbus_bus::RegisterBus;
use regbus_common::cancel::CancelToken;
use regbus_common::layout::{ModuleLayout, default_progress_range};
use regbus_flow::{
    FlowOrchestrator, MotionController, MotionError, PointTable, Pose, ProgressWriter,
};
use regbus_handshake::gripper::{self, GripStatus, GripperState};
use regbus_handshake::vision::{self, Circle};
use regbus_handshake::{
    AckMode, Command, CommandHandler, DeviceConfig, DeviceHandle, DeviceLoop, HandlerError,
    HandshakeConfig, ResultBlock,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Ordered record of arm and device activity.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Fresh bus; `RUST_LOG` enables module and client logs.
pub fn bus() -> Arc<RegisterBus> {
    regbus_bus::init_tracing();
    Arc::new(RegisterBus::new(1000))
}

pub fn client_config() -> HandshakeConfig {
    HandshakeConfig {
        poll_interval_ms: 5,
        ready_timeout_ms: 2_000,
        completion_timeout_ms: 5_000,
        ..HandshakeConfig::default()
    }
}

pub fn device_config(reset_opcode: Option<u16>) -> DeviceConfig {
    DeviceConfig {
        poll_interval_ms: 10,
        ack_mode: AckMode::Explicit,
        reset_opcode,
        ..DeviceConfig::default()
    }
}

/// Spawn a device loop and wait until it publishes Ready.
pub fn spawn_device<H: CommandHandler + 'static>(
    bus: &Arc<RegisterBus>,
    layout: ModuleLayout,
    handler: H,
    reset_opcode: Option<u16>,
) -> DeviceHandle<H> {
    let status_addr = layout.status_addr();
    let handle = DeviceLoop::new(Arc::clone(bus), layout, handler, device_config(reset_opcode))
        .spawn(CancelToken::new())
        .unwrap();
    for _ in 0..200 {
        if bus.read(status_addr).unwrap() != 0 {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    handle
}

pub fn points() -> PointTable {
    let mut points = PointTable::new();
    points.insert("home", Pose::new(300.0, 0.0, 120.0, 0.0));
    points.insert("pick_above", Pose::new(0.0, 0.0, 60.0, 15.0));
    points.insert("place", Pose::new(180.0, 210.0, 15.0, 90.0));
    points
}

pub fn orchestrator(
    bus: &Arc<RegisterBus>,
    arm: SimArm,
) -> FlowOrchestrator<SimArm, Arc<RegisterBus>> {
    let progress = ProgressWriter::new(Arc::clone(bus), default_progress_range()).unwrap();
    FlowOrchestrator::new(arm, points(), progress, CancelToken::new())
}

// ─── Arm ────────────────────────────────────────────────────────────

/// Arm that journals every call. The first `failing_syncs` syncs fail.
pub struct SimArm {
    pub journal: Journal,
    pub failing_syncs: u32,
}

impl SimArm {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: Arc::clone(journal),
            failing_syncs: 0,
        }
    }

    fn log(&self, entry: String) {
        self.journal.lock().push(entry);
    }
}

impl MotionController for SimArm {
    fn move_joint(&mut self, target: &Pose) -> Result<(), MotionError> {
        self.log(format!("joint {} {} {} {}", target.x, target.y, target.z, target.r));
        Ok(())
    }

    fn move_linear(&mut self, target: &Pose) -> Result<(), MotionError> {
        self.log(format!("linear {} {} {} {}", target.x, target.y, target.z, target.r));
        Ok(())
    }

    fn sync(&mut self) -> Result<(), MotionError> {
        if self.failing_syncs > 0 {
            self.failing_syncs -= 1;
            self.log("sync failed".into());
            return Err(MotionError::Failed("collision detected".into()));
        }
        self.log("sync".into());
        Ok(())
    }

    fn set_output(&mut self, index: u16, on: bool) -> Result<(), MotionError> {
        self.log(format!("do {index} {on}"));
        Ok(())
    }

    fn pause(&mut self) -> Result<(), MotionError> {
        self.log("pause".into());
        Ok(())
    }

    fn resume(&mut self) -> Result<(), MotionError> {
        self.log("resume".into());
        Ok(())
    }
}

// ─── Modules ────────────────────────────────────────────────────────

/// Camera returning scripted frames, one per CAPTURE_DETECT.
pub struct SimCamera {
    pub frames: VecDeque<Vec<Circle>>,
    pub captures: u32,
}

impl SimCamera {
    pub fn new(frames: Vec<Vec<Circle>>) -> Self {
        Self {
            frames: frames.into(),
            captures: 0,
        }
    }
}

impl CommandHandler for SimCamera {
    fn handle(&mut self, command: &Command, results: &mut ResultBlock) -> Result<(), HandlerError> {
        match command.opcode {
            vision::CAPTURE_DETECT => {
                self.captures += 1;
                let frame = self.frames.pop_front().unwrap_or_default();
                vision::encode_circles(&frame, results)?;
                Ok(())
            }
            vision::CAPTURE | vision::INITIALIZE => Ok(()),
            other => Err(HandlerError::Rejected(format!("unknown opcode {other}"))),
        }
    }
}

/// Gripper that stops on a part when closing below `part_at`.
pub struct SimGripper {
    pub journal: Journal,
    pub part_at: Option<u16>,
}

impl CommandHandler for SimGripper {
    fn handle(&mut self, command: &Command, results: &mut ResultBlock) -> Result<(), HandlerError> {
        match command.opcode {
            gripper::MOVE_ABS => {
                let target = command.param1;
                self.journal.lock().push(format!("gripper {target}"));
                let state = match self.part_at {
                    Some(part) if target < part => GripperState {
                        status: GripStatus::Gripped,
                        position: part,
                    },
                    _ => GripperState {
                        status: GripStatus::Reached,
                        position: target,
                    },
                };
                state.encode(results)?;
                Ok(())
            }
            gripper::INITIALIZE | gripper::STOP => Ok(()),
            other => Err(HandlerError::Rejected(format!("unknown opcode {other}"))),
        }
    }
}
