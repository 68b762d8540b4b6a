//! Access counters for the register bus

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Live counters updated by every bus operation
#[derive(Debug)]
pub struct BusStats {
    started: Instant,
    reads: AtomicU64,
    writes: AtomicU64,
    rejected_writes: AtomicU64,
}

impl Default for BusStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            rejected_writes: AtomicU64::new(0),
        }
    }
}

impl BusStats {
    /// Count one successful read request
    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one successful write request
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one write rejected by validation
    pub fn record_rejected(&self) {
        self.rejected_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self, register_count: usize) -> StatsSnapshot {
        StatsSnapshot {
            register_count,
            total_reads: self.reads.load(Ordering::Relaxed),
            total_writes: self.writes.load(Ordering::Relaxed),
            rejected_writes: self.rejected_writes.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

/// Serializable bus statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Size of the register array
    pub register_count: usize,
    /// Read requests served
    pub total_reads: u64,
    /// Write requests applied
    pub total_writes: u64,
    /// Write requests rejected by validation
    pub rejected_writes: u64,
    /// Seconds since the bus was created
    pub uptime_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = BusStats::default();
        stats.record_read();
        stats.record_read();
        stats.record_write();
        stats.record_rejected();

        let snap = stats.snapshot(3000);
        assert_eq!(snap.register_count, 3000);
        assert_eq!(snap.total_reads, 2);
        assert_eq!(snap.total_writes, 1);
        assert_eq!(snap.rejected_writes, 1);
        assert!(snap.uptime_secs >= 0.0);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let snap = BusStats::default().snapshot(10);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["register_count"], 10);
        assert_eq!(json["total_writes"], 0);
    }
}
