//! Uniform register access for in-process and networked callers
//!
//! Handshake clients, device loops and the flow orchestrator are written
//! against [`RegisterAccess`], so the same code runs against the local
//! [`RegisterBus`] or a remote server through
//! [`ModbusTcpClient`](crate::client::ModbusTcpClient).

use crate::bus::RegisterBus;
use crate::error::BusResult;
use std::sync::Arc;

/// Register-level operations shared by every bus endpoint
pub trait RegisterAccess: Send + Sync {
    /// Read `count` consecutive registers as one snapshot
    fn read_registers(&self, address: u16, count: u16) -> BusResult<Vec<u16>>;

    /// Write one register
    fn write_register(&self, address: u16, value: u16) -> BusResult<()>;

    /// Write consecutive registers as one atomic batch
    fn write_registers(&self, address: u16, values: &[u16]) -> BusResult<()>;

    /// Read one register
    fn read_register(&self, address: u16) -> BusResult<u16> {
        let values = self.read_registers(address, 1)?;
        Ok(values.first().copied().unwrap_or_default())
    }

    /// Write `value` only if the register holds `expected`
    ///
    /// The default implementation is a read followed by a write and is not
    /// atomic; endpoints with local access override it.
    fn compare_and_write(&self, address: u16, expected: u16, value: u16) -> BusResult<bool> {
        if self.read_register(address)? != expected {
            return Ok(false);
        }
        self.write_register(address, value)?;
        Ok(true)
    }

    /// Write `value` at `address` only if the block starting there equals
    /// `expected`
    ///
    /// Not atomic by default, see [`atomic_compare`](Self::atomic_compare).
    fn compare_block_and_write(
        &self,
        address: u16,
        expected: &[u16],
        value: u16,
    ) -> BusResult<bool> {
        let count = u16::try_from(expected.len()).unwrap_or(u16::MAX);
        if self.read_registers(address, count)? != expected {
            return Ok(false);
        }
        self.write_register(address, value)?;
        Ok(true)
    }

    /// True when the compare operations run without interleaving writes
    /// from other endpoints
    fn atomic_compare(&self) -> bool {
        false
    }
}

impl RegisterAccess for RegisterBus {
    fn read_registers(&self, address: u16, count: u16) -> BusResult<Vec<u16>> {
        self.read_many(address, usize::from(count))
    }

    fn write_register(&self, address: u16, value: u16) -> BusResult<()> {
        self.write(address, value)
    }

    fn write_registers(&self, address: u16, values: &[u16]) -> BusResult<()> {
        self.write_batch(address, values)
    }

    fn read_register(&self, address: u16) -> BusResult<u16> {
        self.read(address)
    }

    fn compare_and_write(&self, address: u16, expected: u16, value: u16) -> BusResult<bool> {
        RegisterBus::compare_and_write(self, address, expected, value)
    }

    fn compare_block_and_write(
        &self,
        address: u16,
        expected: &[u16],
        value: u16,
    ) -> BusResult<bool> {
        RegisterBus::compare_block_and_write(self, address, expected, value)
    }

    fn atomic_compare(&self) -> bool {
        true
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Arc<T> {
    fn read_registers(&self, address: u16, count: u16) -> BusResult<Vec<u16>> {
        (**self).read_registers(address, count)
    }

    fn write_register(&self, address: u16, value: u16) -> BusResult<()> {
        (**self).write_register(address, value)
    }

    fn write_registers(&self, address: u16, values: &[u16]) -> BusResult<()> {
        (**self).write_registers(address, values)
    }

    fn read_register(&self, address: u16) -> BusResult<u16> {
        (**self).read_register(address)
    }

    fn compare_and_write(&self, address: u16, expected: u16, value: u16) -> BusResult<bool> {
        (**self).compare_and_write(address, expected, value)
    }

    fn compare_block_and_write(
        &self,
        address: u16,
        expected: &[u16],
        value: u16,
    ) -> BusResult<bool> {
        (**self).compare_block_and_write(address, expected, value)
    }

    fn atomic_compare(&self) -> bool {
        (**self).atomic_compare()
    }
}
