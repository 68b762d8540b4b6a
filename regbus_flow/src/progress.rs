//! Flow progress registers.
//!
//! | Offset | Content             |
//! |--------|---------------------|
//! | +0     | percent, 0..=100    |
//! | +1     | current step        |
//! | +2     | total steps         |
//!
//! All three are written in one batch so a reader never sees a percentage
//! from one step next to the counter of another.

use regbus_bus::{BusError, BusResult, RegisterAccess};
use regbus_common::layout::AddressRange;
use regbus_common::words::percent;
use tracing::trace;

pub const PROGRESS_WIDTH: u16 = 3;

/// Writes progress to a dedicated register range.
#[derive(Debug)]
pub struct ProgressWriter<A> {
    access: A,
    range: AddressRange,
}

impl<A: RegisterAccess> ProgressWriter<A> {
    pub fn new(access: A, range: AddressRange) -> BusResult<Self> {
        if range.len < PROGRESS_WIDTH {
            return Err(BusError::protocol(format!(
                "progress range {range} shorter than {PROGRESS_WIDTH} registers"
            )));
        }
        Ok(Self { access, range })
    }

    pub fn range(&self) -> AddressRange {
        self.range
    }

    pub fn write(&self, current: u16, total: u16) -> BusResult<()> {
        let values = progress_registers(current, total);
        trace!(start = self.range.start, ?values, "progress");
        self.access.write_registers(self.range.start, &values)
    }

    /// Read back `(percent, current, total)`.
    pub fn read(&self) -> BusResult<(u16, u16, u16)> {
        match self.access.read_registers(self.range.start, PROGRESS_WIDTH)?[..] {
            [percent, current, total] => Ok((percent, current, total)),
            _ => Err(BusError::protocol("short progress read")),
        }
    }
}

/// `[percent, current, total]`; an empty flow reports 100 %.
pub fn progress_registers(current: u16, total: u16) -> [u16; 3] {
    [
        percent(usize::from(current), usize::from(total)),
        current,
        total,
    ]
}
