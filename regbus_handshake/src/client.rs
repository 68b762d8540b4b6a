//! Client side of the handshake.
//!
//! A command goes through `issue` (readiness check and one batch write of the
//! control block) and `PendingCommand::wait` (status polling until the
//! module's `op_count` has advanced and Running is clear). A Ready bit left
//! over from before the command is never taken as completion.

use crate::block::StatusBlock;
use crate::command::{Command, next_command_id};
use crate::config::{AckMode, HandshakeConfig};
use crate::error::{ErrorKind, HandshakeError, HandshakeResult};
use regbus_bus::RegisterAccess;
use regbus_common::cancel::CancelToken;
use regbus_common::consts::NOP;
use regbus_common::layout::ModuleLayout;
use regbus_common::status::ResultCode;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Observed end of one handshake cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub command: Command,
    /// Status block as read when completion was observed.
    pub status: StatusBlock,
    pub elapsed: Duration,
}

impl Completion {
    pub fn result_code(&self) -> Option<ResultCode> {
        self.status.result()
    }

    /// Turn a non-Ok result code into the matching error.
    pub fn ok(self) -> HandshakeResult<Self> {
        let command = self.command;
        match self.result_code() {
            Some(ResultCode::Ok) => Ok(self),
            Some(ResultCode::Duplicate) => Err(HandshakeError::new(
                ErrorKind::Correlation,
                format!("command id {} already executed", command.command_id),
            )),
            Some(ResultCode::Rejected) => Err(HandshakeError::new(
                ErrorKind::Validation,
                format!("module rejected {command}"),
            )),
            Some(ResultCode::Failed) => {
                Err(HandshakeError::failed(format!("module failed {command}")))
            }
            Some(ResultCode::None) | None => Err(HandshakeError::new(
                ErrorKind::System,
                format!("unexpected result code {}", self.status.result_code),
            )),
        }
    }
}

/// Command written to the bus whose completion has not been observed yet.
#[derive(Debug)]
pub struct PendingCommand<'a, A> {
    client: &'a HandshakeClient<A>,
    command: Command,
    op_count_before: u16,
    issued_at: Instant,
    /// Issued while in Alarm; Alarm before completion is not a failure.
    recovering: bool,
}

impl<A: RegisterAccess> PendingCommand<'_, A> {
    /// Command as written, including an assigned id.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Poll until completion, Alarm, timeout or cancellation.
    ///
    /// The result code is not interpreted; see [`Completion::ok`].
    pub fn wait(&self, cancel: &CancelToken) -> HandshakeResult<Completion> {
        let client = self.client;
        let name = &client.layout.name;
        let deadline = self.issued_at + client.config.completion_timeout();
        loop {
            let block = StatusBlock::read(&client.access, &client.layout)?;
            let advanced = block.op_count != self.op_count_before;

            if block.status.is_alarm() && (advanced || !self.recovering) {
                warn!(module = %name, command = %self.command, "module raised alarm");
                return Err(HandshakeError::failed(format!(
                    "{name} alarm while executing {}",
                    self.command
                )));
            }

            if advanced && !block.status.is_running() {
                if self.command.has_id() && block.last_command_id != self.command.command_id {
                    return Err(HandshakeError::new(
                        ErrorKind::Correlation,
                        format!(
                            "{name} completed id {}, expected {}",
                            block.last_command_id, self.command.command_id
                        ),
                    ));
                }
                let elapsed = self.issued_at.elapsed();
                debug!(module = %name, ?elapsed, %block, "command completed");
                return Ok(Completion {
                    command: self.command,
                    status: block,
                    elapsed,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(HandshakeError::timeout(format!(
                    "{name} did not complete {} within {:?}",
                    self.command,
                    client.config.completion_timeout()
                )));
            }
            let pause = client.config.poll_interval().min(deadline - now);
            if cancel.sleep(pause) {
                return Err(HandshakeError::cancelled());
            }
        }
    }
}

/// Handshake client for one module, over any register endpoint.
#[derive(Debug)]
pub struct HandshakeClient<A> {
    access: A,
    layout: ModuleLayout,
    config: HandshakeConfig,
}

impl<A: RegisterAccess> HandshakeClient<A> {
    pub fn new(access: A, layout: ModuleLayout, config: HandshakeConfig) -> Self {
        Self {
            access,
            layout,
            config,
        }
    }

    pub fn layout(&self) -> &ModuleLayout {
        &self.layout
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    pub fn access(&self) -> &A {
        &self.access
    }

    pub fn status(&self) -> HandshakeResult<StatusBlock> {
        StatusBlock::read(&self.access, &self.layout)
    }

    /// Poll until the module is Ready without Alarm.
    ///
    /// Alarm fails immediately with NOT_READY.
    pub fn wait_for_ready(&self, cancel: &CancelToken) -> HandshakeResult<StatusBlock> {
        let deadline = Instant::now() + self.config.ready_timeout();
        loop {
            let block = self.status()?;
            if block.status.is_alarm() {
                return Err(HandshakeError::not_ready(format!(
                    "{} is in alarm",
                    self.layout.name
                )));
            }
            if block.status.is_idle() {
                return Ok(block);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(HandshakeError::not_ready(format!(
                    "{} not ready after {:?} ({block})",
                    self.layout.name,
                    self.config.ready_timeout()
                )));
            }
            if cancel.sleep(self.config.poll_interval().min(deadline - now)) {
                return Err(HandshakeError::cancelled());
            }
        }
    }

    /// Check readiness once and write the command.
    pub fn issue(&self, command: Command) -> HandshakeResult<PendingCommand<'_, A>> {
        if command.is_nop() {
            return Err(HandshakeError::new(
                ErrorKind::Validation,
                "NOP is not a command",
            ));
        }
        let before = self.status()?;
        if !before.status.is_idle() {
            return Err(HandshakeError::not_ready(format!(
                "{} cannot accept {command} ({before})",
                self.layout.name
            )));
        }
        self.write_command(command, before, false)
    }

    /// Issue `reset_opcode` without the readiness check and wait for it.
    pub fn reset(&self, reset_opcode: u16, cancel: &CancelToken) -> HandshakeResult<Completion> {
        let before = self.status()?;
        info!(module = %self.layout.name, opcode = reset_opcode, "resetting module");
        let pending = self.write_command(Command::new(reset_opcode), before, true)?;
        self.finish(&pending, cancel)
    }

    /// Write NOP to the command register if the control block still holds
    /// `command`.
    pub fn acknowledge(&self, command: &Command) -> HandshakeResult<()> {
        let cleared = self.access.compare_block_and_write(
            self.layout.command_addr(),
            &command.to_registers(),
            NOP,
        )?;
        if !cleared {
            debug!(module = %self.layout.name, %command, "command register already changed");
        }
        Ok(())
    }

    /// Full round trip: wait for Ready, issue, wait for completion,
    /// acknowledge, check the result code.
    pub fn execute(&self, command: Command, cancel: &CancelToken) -> HandshakeResult<Completion> {
        self.wait_for_ready(cancel)?;
        let pending = self.issue(command)?;
        self.finish(&pending, cancel)
    }

    /// Read `count` result registers starting at `offset` in one request.
    pub fn read_results(&self, offset: u16, count: u16) -> HandshakeResult<Vec<u16>> {
        let width = self.layout.result_width();
        if u32::from(offset) + u32::from(count) > u32::from(width) {
            return Err(HandshakeError::new(
                ErrorKind::Validation,
                format!(
                    "result registers {offset}..{} outside {} result block of {width}",
                    u32::from(offset) + u32::from(count),
                    self.layout.name
                ),
            ));
        }
        Ok(self
            .access
            .read_registers(self.layout.result_addr(offset), count)?)
    }

    fn write_command(
        &self,
        mut command: Command,
        before: StatusBlock,
        recovering: bool,
    ) -> HandshakeResult<PendingCommand<'_, A>> {
        if !command.has_id() && self.config.assign_command_ids {
            command.command_id = next_command_id(before.last_command_id);
        }
        self.access
            .write_registers(self.layout.command_addr(), &command.to_registers())?;
        debug!(module = %self.layout.name, %command, ops = before.op_count, "command issued");
        Ok(PendingCommand {
            client: self,
            command,
            op_count_before: before.op_count,
            issued_at: Instant::now(),
            recovering,
        })
    }

    fn finish(
        &self,
        pending: &PendingCommand<'_, A>,
        cancel: &CancelToken,
    ) -> HandshakeResult<Completion> {
        let completion = pending.wait(cancel)?;
        if self.config.ack_mode == AckMode::Explicit {
            self.acknowledge(&completion.command)?;
        }
        completion.ok()
    }
}
