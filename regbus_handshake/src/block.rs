//! Typed views of a module's status and result blocks.

use crate::error::{HandshakeError, HandshakeResult};
use regbus_bus::RegisterAccess;
use regbus_common::layout::ModuleLayout;
use regbus_common::status::{ResultCode, StatusWord};
use regbus_common::words::{encode_fixed, split_i32};
use std::fmt;

/// Status block `{status, error_count, op_count, result_code, last_command_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusBlock {
    pub status: StatusWord,
    pub error_count: u16,
    /// Completed cycles, wrapping.
    pub op_count: u16,
    /// Raw result code; see [`StatusBlock::result`].
    pub result_code: u16,
    pub last_command_id: u16,
}

impl StatusBlock {
    pub fn from_registers(values: &[u16]) -> Self {
        let at = |i: usize| values.get(i).copied().unwrap_or(0);
        Self {
            status: StatusWord::from_register(at(0)),
            error_count: at(1),
            op_count: at(2),
            result_code: at(3),
            last_command_id: at(4),
        }
    }

    pub fn to_registers(&self) -> [u16; 5] {
        [
            self.status.to_register(),
            self.error_count,
            self.op_count,
            self.result_code,
            self.last_command_id,
        ]
    }

    /// Decoded result code, `None` for values outside the defined set.
    pub fn result(&self) -> Option<ResultCode> {
        ResultCode::from_register(self.result_code)
    }

    /// Read the status block of `layout` in one request.
    pub fn read<A: RegisterAccess + ?Sized>(
        access: &A,
        layout: &ModuleLayout,
    ) -> HandshakeResult<Self> {
        let block = layout.status_block();
        let values = access.read_registers(block.start, block.len)?;
        Ok(Self::from_registers(&values))
    }
}

impl fmt::Display for StatusBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status={:#06b} errors={} ops={} result={} last_id={}",
            self.status.bits(),
            self.error_count,
            self.op_count,
            self.result_code,
            self.last_command_id
        )
    }
}

/// Result registers a handler fills during one command.
///
/// Starts zeroed; offsets are relative to the module's result block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultBlock {
    values: Vec<u16>,
}

impl ResultBlock {
    pub fn new(width: u16) -> Self {
        Self {
            values: vec![0; usize::from(width)],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, offset: u16) -> Option<u16> {
        self.values.get(usize::from(offset)).copied()
    }

    pub fn set(&mut self, offset: u16, value: u16) -> HandshakeResult<()> {
        self.set_slice(offset, &[value])
    }

    pub fn set_slice(&mut self, offset: u16, values: &[u16]) -> HandshakeResult<()> {
        let start = usize::from(offset);
        let end = start + values.len();
        let len = self.values.len();
        let target = self.values.get_mut(start..end).ok_or_else(|| {
            HandshakeError::new(
                crate::error::ErrorKind::System,
                format!("result offset {start}..{end} outside block of {len}"),
            )
        })?;
        target.copy_from_slice(values);
        Ok(())
    }

    /// Signed 32-bit value as `[high, low]`.
    pub fn set_i32(&mut self, offset: u16, value: i32) -> HandshakeResult<()> {
        self.set_slice(offset, &split_i32(value))
    }

    /// Real value as fixed point `[high, low]`.
    pub fn set_fixed(&mut self, offset: u16, value: f64) -> HandshakeResult<()> {
        self.set_slice(offset, &encode_fixed(value))
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.values
    }
}
