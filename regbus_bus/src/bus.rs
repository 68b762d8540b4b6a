//! The shared register array
//!
//! [`RegisterBus`] owns a fixed-size array of 16-bit registers behind a single
//! re-entrant lock. Nothing outside this module touches the array directly:
//! every access goes through a synchronized read, write or batch operation,
//! and the address acts as the index into the array.
//!
//! ## Consistency
//!
//! - A single read, write or batch call is atomic with respect to every other
//!   bus operation.
//! - Two separate calls are not atomic as a group. Callers that need several
//!   fields delivered together use [`RegisterBus::write_batch`], or group calls
//!   inside [`RegisterBus::transaction`].
//! - Holding and input register reads share one path and always agree.

use crate::annotations::AnnotationStore;
use crate::error::{BusError, BusResult};
use crate::monitoring::{BusStats, StatsSnapshot};
use parking_lot::ReentrantMutex;
use regbus::config::SeedValue;
use regbus::layout::AddressRange;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ops::Range;
use tracing::{debug, warn};

/// One register with its live value and optional label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterEntry {
    /// Register address
    pub address: u16,
    /// Current value
    pub value: u16,
    /// Annotation, if any
    pub label: Option<String>,
}

/// Process-wide shared register array
pub struct RegisterBus {
    cells: ReentrantMutex<RefCell<Vec<u16>>>,
    size: usize,
    stats: BusStats,
}

impl RegisterBus {
    /// Create a bus with `register_count` zeroed registers
    pub fn new(register_count: usize) -> Self {
        debug!(register_count, "register bus created");
        Self {
            cells: ReentrantMutex::new(RefCell::new(vec![0; register_count])),
            size: register_count,
            stats: BusStats::default(),
        }
    }

    /// Number of registers
    pub fn len(&self) -> usize {
        self.size
    }

    /// True for a bus without registers
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn span(&self, address: u16, count: usize) -> BusResult<Range<usize>> {
        if count == 0 {
            return Err(BusError::InvalidQuantity {
                count,
                max: self.size,
            });
        }
        let start = usize::from(address);
        let end = start + count;
        if end > self.size {
            return Err(BusError::OutOfRange {
                address: start,
                count,
                size: self.size,
            });
        }
        Ok(start..end)
    }

    fn reject(&self, err: BusError) -> BusError {
        self.stats.record_rejected();
        warn!(error = %err, "register write rejected");
        err
    }

    // ─── Reads ──────────────────────────────────────────────────────

    /// Read one holding register
    pub fn read(&self, address: u16) -> BusResult<u16> {
        let idx = self.span(address, 1)?.start;
        let guard = self.cells.lock();
        let value = guard.borrow()[idx];
        self.stats.record_read();
        Ok(value)
    }

    /// Read one input register. Same storage as [`RegisterBus::read`].
    pub fn read_input(&self, address: u16) -> BusResult<u16> {
        self.read(address)
    }

    /// Read a contiguous range as one consistent snapshot
    pub fn read_many(&self, address: u16, count: usize) -> BusResult<Vec<u16>> {
        let span = self.span(address, count)?;
        let guard = self.cells.lock();
        let values = guard.borrow()[span].to_vec();
        self.stats.record_read();
        Ok(values)
    }

    // ─── Writes ─────────────────────────────────────────────────────

    /// Write one register
    pub fn write(&self, address: u16, value: u16) -> BusResult<()> {
        let idx = match self.span(address, 1) {
            Ok(span) => span.start,
            Err(err) => return Err(self.reject(err)),
        };
        let guard = self.cells.lock();
        guard.borrow_mut()[idx] = value;
        self.stats.record_write();
        Ok(())
    }

    /// Write an untyped value, rejecting anything outside `0..=65535`
    ///
    /// The previous register value is left untouched on rejection.
    pub fn write_value(&self, address: u16, value: i64) -> BusResult<()> {
        match u16::try_from(value) {
            Ok(value) => self.write(address, value),
            Err(_) => Err(self.reject(BusError::InvalidValue { address, value })),
        }
    }

    /// Write a contiguous range in a single critical section
    pub fn write_batch(&self, address: u16, values: &[u16]) -> BusResult<()> {
        let span = match self.span(address, values.len()) {
            Ok(span) => span,
            Err(err) => return Err(self.reject(err)),
        };
        let guard = self.cells.lock();
        guard.borrow_mut()[span].copy_from_slice(values);
        self.stats.record_write();
        Ok(())
    }

    /// Write `value` only if the register currently holds `expected`
    ///
    /// Returns whether the write happened.
    pub fn compare_and_write(&self, address: u16, expected: u16, value: u16) -> BusResult<bool> {
        let idx = match self.span(address, 1) {
            Ok(span) => span.start,
            Err(err) => return Err(self.reject(err)),
        };
        let guard = self.cells.lock();
        let mut cells = guard.borrow_mut();
        if cells[idx] != expected {
            return Ok(false);
        }
        cells[idx] = value;
        self.stats.record_write();
        Ok(true)
    }

    /// Write `value` at `address` only if the block starting there still
    /// equals `expected`
    ///
    /// Compare and write happen under one lock, so a batch written by
    /// another endpoint is either fully seen or fully missed.
    pub fn compare_block_and_write(
        &self,
        address: u16,
        expected: &[u16],
        value: u16,
    ) -> BusResult<bool> {
        let span = match self.span(address, expected.len()) {
            Ok(span) => span,
            Err(err) => return Err(self.reject(err)),
        };
        let idx = span.start;
        let guard = self.cells.lock();
        let mut cells = guard.borrow_mut();
        if cells[span] != *expected {
            return Ok(false);
        }
        cells[idx] = value;
        self.stats.record_write();
        Ok(true)
    }

    /// Run `f` while holding the bus lock
    ///
    /// The lock is re-entrant, so `f` may call any bus operation; no other
    /// thread observes the bus until `f` returns.
    pub fn transaction<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _guard = self.cells.lock();
        f(self)
    }

    /// Zero a module range
    pub fn reset_range(&self, range: AddressRange) -> BusResult<()> {
        self.write_batch(range.start, &vec![0; usize::from(range.len)])
    }

    /// Apply startup values, returning how many were accepted
    ///
    /// Rejected entries are logged and skipped.
    pub fn seed(&self, values: &[SeedValue]) -> usize {
        values
            .iter()
            .filter(|seed| self.write_value(seed.address, seed.value).is_ok())
            .count()
    }

    // ─── Inspection ─────────────────────────────────────────────────

    /// Live values of a range joined with their annotations
    pub fn snapshot_range(
        &self,
        start: u16,
        count: usize,
        labels: &AnnotationStore,
    ) -> BusResult<Vec<RegisterEntry>> {
        let values = self.read_many(start, count)?;
        Ok(values
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                // span() already bounded start + i to the array
                let address = start + i as u16;
                RegisterEntry {
                    address,
                    value,
                    label: labels.get(address).map(str::to_string),
                }
            })
            .collect())
    }

    /// First `limit` registers holding a non-zero value
    pub fn non_zero(&self, limit: usize) -> Vec<(u16, u16)> {
        let guard = self.cells.lock();
        let cells = guard.borrow();
        cells
            .iter()
            .enumerate()
            .filter(|(_, value)| **value != 0)
            .take(limit)
            .map(|(address, value)| (address as u16, *value))
            .collect()
    }

    /// Access counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.size)
    }
}

impl std::fmt::Debug for RegisterBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterBus")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
