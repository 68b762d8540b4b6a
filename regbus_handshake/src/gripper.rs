//! Gripper module adapter.
//!
//! Result block: grip status at +0, measured position at +1.

use crate::block::ResultBlock;
use crate::client::HandshakeClient;
use crate::command::Command;
use crate::config::HandshakeConfig;
use crate::error::{ErrorKind, HandshakeError, HandshakeResult};
use regbus_bus::RegisterAccess;
use regbus_common::cancel::CancelToken;
use regbus_common::layout::ModuleLayout;
use serde::Serialize;
use tracing::{info, warn};

pub const INITIALIZE: u16 = 1;
pub const STOP: u16 = 2;
pub const MOVE_ABS: u16 = 3;
pub const SET_FORCE: u16 = 5;
pub const SET_SPEED: u16 = 6;
pub const QUICK_OPEN: u16 = 7;
pub const QUICK_CLOSE: u16 = 8;

const STATUS_OFFSET: u16 = 0;
const POSITION_OFFSET: u16 = 1;

/// Position difference above which an object is considered held.
pub const GRIP_THRESHOLD: u16 = 20;
pub const DEFAULT_GRIP_ATTEMPTS: u32 = 3;

/// Grip status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GripStatus {
    Moving,
    Reached,
    Gripped,
    Dropped,
    Unknown(u16),
}

impl GripStatus {
    pub const fn from_register(raw: u16) -> Self {
        match raw {
            0 => Self::Moving,
            1 => Self::Reached,
            2 => Self::Gripped,
            3 => Self::Dropped,
            other => Self::Unknown(other),
        }
    }

    pub const fn to_register(self) -> u16 {
        match self {
            Self::Moving => 0,
            Self::Reached => 1,
            Self::Gripped => 2,
            Self::Dropped => 3,
            Self::Unknown(raw) => raw,
        }
    }
}

/// Gripper result block contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GripperState {
    pub status: GripStatus,
    pub position: u16,
}

impl GripperState {
    pub fn encode(&self, results: &mut ResultBlock) -> HandshakeResult<()> {
        results.set(STATUS_OFFSET, self.status.to_register())?;
        results.set(POSITION_OFFSET, self.position)
    }
}

/// Outcome of a successful smart grip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GripOutcome {
    pub attempts: u32,
    pub position: u16,
}

/// Client for the gripper module.
#[derive(Debug)]
pub struct GripperClient<A> {
    handshake: HandshakeClient<A>,
}

impl<A: RegisterAccess> GripperClient<A> {
    pub fn new(access: A, layout: ModuleLayout, config: HandshakeConfig) -> Self {
        Self {
            handshake: HandshakeClient::new(access, layout, config),
        }
    }

    pub fn handshake(&self) -> &HandshakeClient<A> {
        &self.handshake
    }

    fn run(&self, command: Command, cancel: &CancelToken) -> HandshakeResult<()> {
        self.handshake.execute(command, cancel).map(|_| ())
    }

    pub fn initialize(&self, cancel: &CancelToken) -> HandshakeResult<()> {
        self.run(Command::new(INITIALIZE), cancel)
    }

    pub fn stop(&self, cancel: &CancelToken) -> HandshakeResult<()> {
        self.run(Command::new(STOP), cancel)
    }

    pub fn move_to(&self, position: u16, cancel: &CancelToken) -> HandshakeResult<()> {
        self.run(Command::new(MOVE_ABS).with_params(position, 0), cancel)
    }

    /// Force in percent, 20..=100.
    pub fn set_force(&self, percent: u16, cancel: &CancelToken) -> HandshakeResult<()> {
        check_percent("force", percent)?;
        self.run(Command::new(SET_FORCE).with_params(percent, 0), cancel)
    }

    /// Speed in percent, 1..=100.
    pub fn set_speed(&self, percent: u16, cancel: &CancelToken) -> HandshakeResult<()> {
        if !(1..=100).contains(&percent) {
            return Err(HandshakeError::new(
                ErrorKind::Validation,
                format!("speed {percent}% outside 1..=100"),
            ));
        }
        self.run(Command::new(SET_SPEED).with_params(percent, 0), cancel)
    }

    pub fn quick_open(&self, cancel: &CancelToken) -> HandshakeResult<()> {
        self.run(Command::new(QUICK_OPEN), cancel)
    }

    pub fn quick_close(&self, cancel: &CancelToken) -> HandshakeResult<()> {
        self.run(Command::new(QUICK_CLOSE), cancel)
    }

    pub fn state(&self) -> HandshakeResult<GripperState> {
        match self.handshake.read_results(STATUS_OFFSET, 2)?.as_slice() {
            &[status, position] => Ok(GripperState {
                status: GripStatus::from_register(status),
                position,
            }),
            other => Err(HandshakeError::new(
                ErrorKind::System,
                format!("short gripper result read: {other:?}"),
            )),
        }
    }

    /// Close toward `target` until an object stops the fingers.
    ///
    /// An attempt succeeds when the measured position differs from `target`
    /// by more than [`GRIP_THRESHOLD`]; reaching the target means nothing
    /// was held. Failed attempts are retried, cancellation is not.
    pub fn smart_grip(
        &self,
        target: u16,
        max_attempts: u32,
        cancel: &CancelToken,
    ) -> HandshakeResult<GripOutcome> {
        let mut last_error = None;
        for attempt in 1..=max_attempts.max(1) {
            match self.move_to(target, cancel).and_then(|()| self.state()) {
                Ok(state) => {
                    let diff = state.position.abs_diff(target);
                    if diff > GRIP_THRESHOLD {
                        info!(attempt, position = state.position, diff, "object gripped");
                        return Ok(GripOutcome {
                            attempts: attempt,
                            position: state.position,
                        });
                    }
                    warn!(attempt, position = state.position, "no object between fingers");
                    last_error = None;
                }
                Err(e) if e.kind == ErrorKind::Cancelled => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "grip attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            HandshakeError::failed(format!(
                "no object gripped after {} attempts",
                max_attempts.max(1)
            ))
        }))
    }

    /// Open to `position`.
    pub fn smart_release(&self, position: u16, cancel: &CancelToken) -> HandshakeResult<()> {
        self.move_to(position, cancel)
    }
}

fn check_percent(what: &str, percent: u16) -> HandshakeResult<()> {
    if !(20..=100).contains(&percent) {
        return Err(HandshakeError::new(
            ErrorKind::Validation,
            format!("{what} {percent}% outside 20..=100"),
        ));
    }
    Ok(())
}
