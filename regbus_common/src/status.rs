//! Handshake status word and result codes.
//!
//! The status word bit layout is fixed across every module on the bus:
//!
//! | Bit | Flag        |
//! |-----|-------------|
//! | 0   | Ready       |
//! | 1   | Running     |
//! | 2   | Alarm       |
//! | 3   | Initialized |
//!
//! Ready and Running are mutually exclusive; Alarm may coexist with either.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-module status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusWord: u16 {
        /// Module accepts a new command.
        const READY       = 0x0001;
        /// Module is executing a command.
        const RUNNING     = 0x0002;
        /// Module reported a fault. Terminal until reset.
        const ALARM       = 0x0004;
        /// Module finished its startup initialization.
        const INITIALIZED = 0x0008;
    }
}

impl StatusWord {
    /// Decode a raw register value, ignoring undefined bits.
    pub const fn from_register(raw: u16) -> Self {
        Self::from_bits_truncate(raw)
    }

    /// Raw register value.
    pub const fn to_register(self) -> u16 {
        self.bits()
    }

    /// Ready, not running and no alarm.
    pub const fn is_idle(self) -> bool {
        self.contains(Self::READY) && !self.intersects(Self::RUNNING.union(Self::ALARM))
    }

    pub const fn is_running(self) -> bool {
        self.contains(Self::RUNNING)
    }

    pub const fn is_alarm(self) -> bool {
        self.contains(Self::ALARM)
    }

    /// Ready and Running are never set together.
    pub const fn is_consistent(self) -> bool {
        !self.contains(Self::READY.union(Self::RUNNING))
    }
}

/// Outcome of the last command cycle, published in the status block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u16)]
pub enum ResultCode {
    /// No command has completed since startup or reset.
    #[default]
    None = 0,
    Ok = 1,
    Failed = 2,
    /// Command id matched the previous command and was not executed.
    Duplicate = 3,
    /// Command was refused (unknown opcode or invalid parameters).
    Rejected = 4,
}

impl ResultCode {
    pub const fn from_register(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Ok),
            2 => Some(Self::Failed),
            3 => Some(Self::Duplicate),
            4 => Some(Self::Rejected),
            _ => None,
        }
    }

    pub const fn to_register(self) -> u16 {
        self as u16
    }
}
