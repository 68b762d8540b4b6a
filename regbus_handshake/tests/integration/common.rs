//! Simulated modules and shared fixtures.

use parking_lot::Mutex;
use regbus_bus::RegisterBus;
use regbus_common::cancel::CancelToken;
use regbus_common::layout::ModuleLayout;
use regbus_handshake::angle::{self, AngleResult};
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

/// Fresh bus; `RUST_LOG` enables module and client logs.
pub fn bus() -> Arc<RegisterBus> {
    regbus_bus::init_tracing();
    Arc::new(RegisterBus::new(3000))
}

pub fn client_config() -> HandshakeConfig {
    HandshakeConfig {
        poll_interval_ms: 10,
        ready_timeout_ms: 2_000,
        completion_timeout_ms: 10_000,
        ..HandshakeConfig::default()
    }
}

pub fn device_config(ack_mode: AckMode, reset_opcode: Option<u16>) -> DeviceConfig {
    DeviceConfig {
        poll_interval_ms: 10,
        ack_mode,
        settle_ms: 50,
        reset_opcode,
        ..DeviceConfig::default()
    }
}

/// Spawn a device loop and wait until it publishes Ready.
pub fn spawn_device<H: CommandHandler + 'static>(
    bus: &Arc<RegisterBus>,
    layout: ModuleLayout,
    handler: H,
    config: DeviceConfig,
) -> DeviceHandle<H> {
    let status_addr = layout.status_addr();
    let handle = DeviceLoop::new(Arc::clone(bus), layout, handler, config)
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

// ─── Vision ─────────────────────────────────────────────────────────

/// Camera returning scripted frames, one per CAPTURE_DETECT.
pub struct SimCamera {
    pub frames: VecDeque<Vec<Circle>>,
    pub exposure: Duration,
    pub captures: u32,
}

impl SimCamera {
    pub fn new(frames: Vec<Vec<Circle>>) -> Self {
        Self {
            frames: frames.into(),
            exposure: Duration::from_millis(100),
            captures: 0,
        }
    }
}

impl CommandHandler for SimCamera {
    fn handle(&mut self, command: &Command, results: &mut ResultBlock) -> Result<(), HandlerError> {
        match command.opcode {
            vision::CAPTURE => {
                self.captures += 1;
                Ok(())
            }
            vision::CAPTURE_DETECT => {
                thread::sleep(self.exposure);
                self.captures += 1;
                let frame = self.frames.pop_front().unwrap_or_default();
                vision::encode_circles(&frame, results)?;
                Ok(())
            }
            vision::INITIALIZE => Ok(()),
            other => Err(HandlerError::Rejected(format!("unknown opcode {other}"))),
        }
    }
}

// ─── Gripper ────────────────────────────────────────────────────────

/// Gripper whose fingers stop at the scripted positions, in order.
/// Once the script runs out the fingers reach the target.
pub struct SimGripper {
    pub stops: VecDeque<u16>,
    pub force: u16,
    pub moves: Arc<Mutex<Vec<u16>>>,
    /// Moves rejected before any is executed.
    pub rejected_moves: u32,
}

impl CommandHandler for SimGripper {
    fn handle(&mut self, command: &Command, results: &mut ResultBlock) -> Result<(), HandlerError> {
        let state = match command.opcode {
            gripper::MOVE_ABS => {
                let target = command.param1;
                self.moves.lock().push(target);
                if self.rejected_moves > 0 {
                    self.rejected_moves -= 1;
                    return Err(HandlerError::Rejected("fingers not homed".into()));
                }
                match self.stops.pop_front() {
                    Some(stop) => GripperState {
                        status: GripStatus::Gripped,
                        position: stop,
                    },
                    None => GripperState {
                        status: GripStatus::Reached,
                        position: target,
                    },
                }
            }
            gripper::SET_FORCE => {
                self.force = command.param1;
                return Ok(());
            }
            gripper::INITIALIZE | gripper::STOP | gripper::SET_SPEED => return Ok(()),
            gripper::QUICK_OPEN => GripperState {
                status: GripStatus::Reached,
                position: 1000,
            },
            gripper::QUICK_CLOSE => GripperState {
                status: GripStatus::Reached,
                position: 0,
            },
            other => return Err(HandlerError::Rejected(format!("unknown opcode {other}"))),
        };
        state.encode(results)?;
        Ok(())
    }
}

// ─── Angle ──────────────────────────────────────────────────────────

/// Scripted angle detector. `Err` entries raise Alarm, `None` reports no contour.
pub struct SimAngle {
    pub script: VecDeque<Result<Option<AngleResult>, String>>,
    pub resets: u32,
    pub delay: Duration,
}

impl CommandHandler for SimAngle {
    fn handle(&mut self, command: &Command, results: &mut ResultBlock) -> Result<(), HandlerError> {
        match command.opcode {
            angle::DETECT => {
                thread::sleep(self.delay);
                match self.script.pop_front() {
                    Some(Ok(Some(result))) => result.encode(results).map_err(Into::into),
                    Some(Ok(None)) | None => Ok(()),
                    Some(Err(reason)) => Err(HandlerError::Failed(reason)),
                }
            }
            angle::RESET => Ok(()),
            other => Err(HandlerError::Rejected(format!("unknown opcode {other}"))),
        }
    }

    fn reset(&mut self) -> Result<(), HandlerError> {
        self.resets += 1;
        Ok(())
    }
}
