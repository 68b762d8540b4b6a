//! Command written to a module's control block.

use regbus_common::consts::{NO_COMMAND_ID, NOP};
use std::fmt;

/// `{opcode, param1, param2, command_id}`, written as one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Command {
    pub opcode: u16,
    pub param1: u16,
    pub param2: u16,
    /// `NO_COMMAND_ID` when the command is not correlated.
    pub command_id: u16,
}

impl Command {
    pub const fn new(opcode: u16) -> Self {
        Self {
            opcode,
            param1: 0,
            param2: 0,
            command_id: NO_COMMAND_ID,
        }
    }

    pub const fn with_params(mut self, param1: u16, param2: u16) -> Self {
        self.param1 = param1;
        self.param2 = param2;
        self
    }

    pub const fn with_id(mut self, command_id: u16) -> Self {
        self.command_id = command_id;
        self
    }

    pub const fn is_nop(&self) -> bool {
        self.opcode == NOP
    }

    pub const fn has_id(&self) -> bool {
        self.command_id != NO_COMMAND_ID
    }

    /// Control block registers in layout order.
    pub const fn to_registers(&self) -> [u16; 4] {
        [self.opcode, self.param1, self.param2, self.command_id]
    }

    /// Decode a control block; missing trailing registers read as zero.
    pub fn from_registers(values: &[u16]) -> Self {
        let at = |i: usize| values.get(i).copied().unwrap_or(0);
        Self {
            opcode: at(0),
            param1: at(1),
            param2: at(2),
            command_id: at(3),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "opcode {} ({}, {}) id {}",
            self.opcode, self.param1, self.param2, self.command_id
        )
    }
}

/// Next id after `last`, skipping `NO_COMMAND_ID`.
pub const fn next_command_id(last: u16) -> u16 {
    match last.wrapping_add(1) {
        NO_COMMAND_ID => 1,
        id => id,
    }
}
