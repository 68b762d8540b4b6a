//! Device side of the handshake.
//!
//! A [`DeviceLoop`] owns one module range. Each poll it reads the control
//! block, drives the module state machine and publishes the status block.
//!
//! ```text
//!   Starting ──InitOk──► Idle ──Command──► Busy ──Done──► AwaitingAck ──Ack──► Idle
//!       │                                   │
//!   InitFailed                            Failed
//!       ▼                                   ▼
//!     Alarm ◄───────────────────────────────┘
//!       │ reset opcode
//!       └──────────────► Busy
//! ```
//!
//! | State       | Ready | Running | Alarm |
//! |-------------|-------|---------|-------|
//! | Starting    | 0     | 0       | 0     |
//! | Idle        | 1     | 0       | 0     |
//! | Busy        | 0     | 1       | 0     |
//! | AwaitingAck | 0 (explicit) / 1 (auto-clear) | 0 | 0 |
//! | Alarm       | 0     | 0       | 1     |

use crate::block::{ResultBlock, StatusBlock};
use crate::command::Command;
use crate::config::{AckMode, DeviceConfig, DuplicatePolicy};
use crate::error::{ErrorKind, HandshakeError, HandshakeResult};
use regbus_bus::RegisterAccess;
use regbus_common::cancel::CancelToken;
use regbus_common::consts::{MAX_WRITE_QUANTITY, NOP};
use regbus_common::layout::ModuleLayout;
use regbus_common::status::{ResultCode, StatusWord};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ─── Handler ────────────────────────────────────────────────────────

/// Failure reported by a command handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Unknown opcode or bad parameters. Published as `Rejected`, no alarm.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Execution failed. Raises Alarm.
    #[error("failed: {0}")]
    Failed(String),
}

impl From<HandshakeError> for HandlerError {
    fn from(err: HandshakeError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Module behaviour executed by a [`DeviceLoop`].
pub trait CommandHandler: Send {
    /// Called once when the loop starts. Failure raises Alarm.
    fn initialize(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Execute one command, writing outputs into `results`.
    fn handle(&mut self, command: &Command, results: &mut ResultBlock) -> Result<(), HandlerError>;

    /// Called for the reset opcode while in Alarm.
    fn reset(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }
}

// ─── State machine ──────────────────────────────────────────────────

/// Handshake state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Starting,
    Idle,
    Busy,
    AwaitingAck,
    Alarm,
}

/// Event driving a [`DeviceState`] transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    InitOk,
    InitFailed,
    CommandSeen,
    /// Reset opcode observed while in Alarm.
    ResetSeen,
    CommandDone,
    CommandFailed,
    /// Command register back to NOP, or auto-cleared.
    AckSeen,
}

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    Ok(DeviceState),
    Rejected(&'static str),
}

/// Module state holder.
#[derive(Debug, Clone)]
pub struct DeviceStateMachine {
    state: DeviceState,
}

impl Default for DeviceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStateMachine {
    pub const fn new() -> Self {
        Self {
            state: DeviceState::Starting,
        }
    }

    #[inline]
    pub const fn state(&self) -> DeviceState {
        self.state
    }

    pub fn handle_event(&mut self, event: DeviceEvent) -> TransitionResult {
        use DeviceEvent::*;
        use DeviceState::*;

        let next = match (self.state, event) {
            (Starting, InitOk) => Idle,
            (Starting, InitFailed) => Alarm,

            (Idle, CommandSeen) => Busy,
            (Alarm, ResetSeen) => Busy,

            (Busy, CommandDone) => AwaitingAck,
            (Busy, CommandFailed) => Alarm,

            (AwaitingAck, AckSeen) => Idle,

            (Alarm, CommandSeen) => return TransitionResult::Rejected("Alarm: only the reset opcode is accepted"),
            (Busy, _) => return TransitionResult::Rejected("Busy: command still executing"),
            _ => return TransitionResult::Rejected("invalid event for current state"),
        };

        self.state = next;
        TransitionResult::Ok(next)
    }

    /// Status bits for the current state, without Initialized.
    pub const fn status_bits(&self, ack_mode: AckMode) -> StatusWord {
        match self.state {
            DeviceState::Starting => StatusWord::empty(),
            DeviceState::Idle => StatusWord::READY,
            DeviceState::Busy => StatusWord::RUNNING,
            DeviceState::AwaitingAck => match ack_mode {
                AckMode::Explicit => StatusWord::empty(),
                AckMode::AutoClear => StatusWord::READY,
            },
            DeviceState::Alarm => StatusWord::ALARM,
        }
    }
}

// ─── Loop ───────────────────────────────────────────────────────────

/// Command awaiting acknowledgement.
#[derive(Debug, Clone, Copy)]
struct Completed {
    command: Command,
    at: Instant,
}

/// Polling loop owning one module range.
pub struct DeviceLoop<A, H> {
    access: A,
    layout: ModuleLayout,
    handler: H,
    config: DeviceConfig,
    machine: DeviceStateMachine,
    published: StatusBlock,
    initialized: bool,
    completed: Option<Completed>,
    last_refused: Option<Command>,
}

impl<A: RegisterAccess, H: CommandHandler> DeviceLoop<A, H> {
    pub fn new(access: A, layout: ModuleLayout, handler: H, config: DeviceConfig) -> Self {
        Self {
            access,
            layout,
            handler,
            config,
            machine: DeviceStateMachine::new(),
            published: StatusBlock::default(),
            initialized: false,
            completed: None,
            last_refused: None,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.machine.state()
    }

    pub fn layout(&self) -> &ModuleLayout {
        &self.layout
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Last status block written to the bus.
    pub fn published(&self) -> StatusBlock {
        self.published
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Auto-clear needs a compare that no client write can interleave with.
    pub fn check_access(&self) -> HandshakeResult<()> {
        if self.config.ack_mode == AckMode::AutoClear && !self.access.atomic_compare() {
            return Err(HandshakeError::new(
                ErrorKind::Validation,
                format!(
                    "module {}: auto-clear requires local bus access, use explicit ack",
                    self.layout.name
                ),
            ));
        }
        Ok(())
    }

    /// Reset the module range and run the handler's initialization.
    pub fn start(&mut self) -> HandshakeResult<()> {
        self.check_access()?;
        self.clear_range()?;
        self.published = StatusBlock::default();
        self.machine = DeviceStateMachine::new();
        self.completed = None;

        match self.handler.initialize() {
            Ok(()) => {
                self.initialized = true;
                self.transition(DeviceEvent::InitOk);
                info!(module = %self.layout.name, range = %self.layout.range(), "module ready");
            }
            Err(e) => {
                self.initialized = false;
                self.published.error_count = self.published.error_count.wrapping_add(1);
                self.transition(DeviceEvent::InitFailed);
                error!(module = %self.layout.name, error = %e, "initialization failed");
            }
        }
        self.publish()
    }

    /// One iteration: read the control block and react.
    pub fn poll_once(&mut self) -> HandshakeResult<()> {
        if self.machine.state() == DeviceState::Starting {
            return self.start();
        }
        let control = self.layout.control_block();
        let command =
            Command::from_registers(&self.access.read_registers(control.start, control.len)?);

        match self.machine.state() {
            DeviceState::Idle if !command.is_nop() => self.run_command(command),
            DeviceState::AwaitingAck => self.check_ack(command),
            DeviceState::Alarm if !command.is_nop() => self.alarm_command(command),
            _ => Ok(()),
        }
    }

    /// Poll until cancelled. Bus errors are logged and polling continues.
    pub fn run(&mut self, cancel: &CancelToken) {
        if let Err(e) = self.check_access() {
            error!(module = %self.layout.name, error = %e, "device loop not started");
            return;
        }
        info!(module = %self.layout.name, "device loop started");
        if let Err(e) = self.start() {
            warn!(module = %self.layout.name, error = %e, "start failed, retrying on next poll");
        }
        let period = self.config.poll_interval();
        while !cancel.is_cancelled() {
            if let Err(e) = self.poll_once() {
                warn!(module = %self.layout.name, error = %e, "poll failed");
            }
            if cancel.sleep(period) {
                break;
            }
        }
        info!(module = %self.layout.name, "device loop stopped");
    }

    fn run_command(&mut self, command: Command) -> HandshakeResult<()> {
        self.transition(DeviceEvent::CommandSeen);
        self.publish()?;
        debug!(module = %self.layout.name, %command, "executing");

        let duplicate = self.config.duplicate_policy == DuplicatePolicy::Reject
            && command.has_id()
            && command.command_id == self.published.last_command_id;

        let code = if duplicate {
            warn!(module = %self.layout.name, %command, "duplicate command id, not executed");
            ResultCode::Duplicate
        } else {
            let mut results = ResultBlock::new(self.layout.result_width());
            let outcome = self.handler.handle(&command, &mut results);
            self.write_results(&results)?;
            match outcome {
                Ok(()) => ResultCode::Ok,
                Err(HandlerError::Rejected(reason)) => {
                    warn!(module = %self.layout.name, %command, %reason, "command rejected");
                    ResultCode::Rejected
                }
                Err(HandlerError::Failed(reason)) => {
                    error!(module = %self.layout.name, %command, %reason, "command failed");
                    ResultCode::Failed
                }
            }
        };
        self.complete(command, code)
    }

    fn alarm_command(&mut self, command: Command) -> HandshakeResult<()> {
        if Some(command.opcode) != self.config.reset_opcode {
            if self.last_refused != Some(command) {
                warn!(module = %self.layout.name, %command, "command refused while in alarm");
                self.last_refused = Some(command);
            }
            return Ok(());
        }
        self.last_refused = None;
        self.transition(DeviceEvent::ResetSeen);
        self.publish()?;
        info!(module = %self.layout.name, "resetting alarm");

        let mut outcome = self.handler.reset();
        if outcome.is_ok() && !self.initialized {
            outcome = self.handler.initialize();
            self.initialized = outcome.is_ok();
        }
        let code = match outcome {
            Ok(()) => ResultCode::Ok,
            Err(e) => {
                error!(module = %self.layout.name, error = %e, "reset failed");
                ResultCode::Failed
            }
        };
        self.complete(command, code)
    }

    fn complete(&mut self, command: Command, code: ResultCode) -> HandshakeResult<()> {
        self.published.op_count = self.published.op_count.wrapping_add(1);
        self.published.result_code = code.to_register();
        self.published.last_command_id = command.command_id;

        if code == ResultCode::Failed {
            self.published.error_count = self.published.error_count.wrapping_add(1);
            self.transition(DeviceEvent::CommandFailed);
            self.completed = None;
            self.clear_command(&command)?;
        } else {
            self.transition(DeviceEvent::CommandDone);
            self.completed = Some(Completed {
                command,
                at: Instant::now(),
            });
        }
        self.publish()
    }

    fn check_ack(&mut self, current: Command) -> HandshakeResult<()> {
        let Some(done) = self.completed else {
            self.transition(DeviceEvent::AckSeen);
            return self.publish();
        };

        if current.is_nop() {
            self.completed = None;
            self.transition(DeviceEvent::AckSeen);
            return self.publish();
        }

        if self.config.ack_mode != AckMode::AutoClear {
            return Ok(());
        }

        if current != done.command {
            // A new command arrived during the settle window.
            self.completed = None;
            self.transition(DeviceEvent::AckSeen);
            self.publish()?;
            return self.run_command(current);
        }

        if done.at.elapsed() >= self.config.settle() {
            let cleared = self.clear_command(&done.command)?;
            if !cleared {
                debug!(module = %self.layout.name, "command register changed before auto-clear");
            } else if !done.command.has_id() {
                debug!(
                    module = %self.layout.name,
                    opcode = done.command.opcode,
                    "auto-cleared uncorrelated command; a repeat issued during settle is lost"
                );
            }
            self.completed = None;
            self.transition(DeviceEvent::AckSeen);
            return self.publish();
        }
        Ok(())
    }

    /// Write NOP only while the whole control block still holds `command`.
    fn clear_command(&self, command: &Command) -> HandshakeResult<bool> {
        Ok(self.access.compare_block_and_write(
            self.layout.command_addr(),
            &command.to_registers(),
            NOP,
        )?)
    }

    fn transition(&mut self, event: DeviceEvent) {
        if let TransitionResult::Rejected(reason) = self.machine.handle_event(event) {
            debug!(module = %self.layout.name, ?event, reason, "transition rejected");
        }
    }

    fn publish(&mut self) -> HandshakeResult<()> {
        let mut status = self.machine.status_bits(self.config.ack_mode);
        if self.initialized {
            status |= StatusWord::INITIALIZED;
        }
        self.published.status = status;
        self.access
            .write_registers(self.layout.status_addr(), &self.published.to_registers())?;
        Ok(())
    }

    fn write_results(&self, results: &ResultBlock) -> HandshakeResult<()> {
        self.write_chunked(self.layout.result_addr(0), results.as_slice())
    }

    fn clear_range(&self) -> HandshakeResult<()> {
        let range = self.layout.range();
        self.write_chunked(range.start, &vec![0; usize::from(range.len)])
    }

    fn write_chunked(&self, start: u16, values: &[u16]) -> HandshakeResult<()> {
        let mut address = start;
        for chunk in values.chunks(usize::from(MAX_WRITE_QUANTITY)) {
            self.access.write_registers(address, chunk)?;
            address = address.wrapping_add(chunk.len() as u16);
        }
        Ok(())
    }
}

impl<A, H> DeviceLoop<A, H>
where
    A: RegisterAccess + 'static,
    H: CommandHandler + 'static,
{
    /// Run on a dedicated thread until `cancel` fires.
    pub fn spawn(mut self, cancel: CancelToken) -> HandshakeResult<DeviceHandle<H>> {
        self.check_access()?;
        let name = format!("regbus-{}", self.layout.name);
        let token = cancel.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || {
                self.run(&token);
                self.into_handler()
            })
            .map_err(|e| {
                HandshakeError::new(ErrorKind::System, format!("spawn failed: {e}"))
            })?;
        Ok(DeviceHandle { cancel, join })
    }
}

/// Running device loop.
pub struct DeviceHandle<H> {
    cancel: CancelToken,
    join: JoinHandle<H>,
}

impl<H> DeviceHandle<H> {
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Stop the loop and return its handler.
    pub fn stop(self) -> thread::Result<H> {
        self.cancel.cancel();
        self.join.join()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
