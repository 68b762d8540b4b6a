//! FIFO of detection results, replenished by running a detection cycle when
//! a consumer finds it empty.
//!
//! The queue mutex is never held while a cycle runs, so producers and
//! `peek_status` callers are not blocked by a slow camera.

use crate::error::HandshakeResult;
use parking_lot::Mutex;
use regbus_common::cancel::CancelToken;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Number of entries shown by [`ResultQueue::peek_status`].
pub const DEFAULT_PREVIEW: usize = 3;

/// Something that can run one cycle and return its results in order.
pub trait CycleSource<T>: Send + Sync {
    fn run_cycle(&self, cancel: &CancelToken) -> HandshakeResult<Vec<T>>;
}

impl<T, F> CycleSource<T> for F
where
    F: Fn(&CancelToken) -> HandshakeResult<Vec<T>> + Send + Sync,
{
    fn run_cycle(&self, cancel: &CancelToken) -> HandshakeResult<Vec<T>> {
        self(cancel)
    }
}

/// Snapshot returned by [`ResultQueue::peek_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus<T> {
    pub length: usize,
    /// Oldest entries first.
    pub preview: Vec<T>,
    /// Results produced by the last triggered cycle.
    pub last_cycle_count: usize,
    pub cycles_triggered: u64,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    last_cycle_count: usize,
    cycles_triggered: u64,
}

/// Result queue over a cycle source.
pub struct ResultQueue<T, S> {
    inner: Mutex<Inner<T>>,
    source: S,
    cancel: CancelToken,
}

impl<T: Clone, S: CycleSource<T>> ResultQueue<T, S> {
    pub fn new(source: S, cancel: CancelToken) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                last_cycle_count: 0,
                cycles_triggered: 0,
            }),
            source,
            cancel,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Append one cycle's results, preserving their order.
    pub fn enqueue_many(&self, results: impl IntoIterator<Item = T>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.items.len();
        inner.items.extend(results);
        let added = inner.items.len() - before;
        debug!(added, length = inner.items.len(), "results enqueued");
        added
    }

    /// Run one cycle and queue everything it produced, in order.
    ///
    /// Returns how many results the cycle added. A failed cycle still counts
    /// as triggered.
    pub fn run_cycle(&self, cancel: &CancelToken) -> HandshakeResult<usize> {
        let produced = self.source.run_cycle(cancel);
        let mut inner = self.inner.lock();
        inner.cycles_triggered += 1;
        let produced = produced?;
        inner.last_cycle_count = produced.len();
        drop(inner);
        Ok(self.enqueue_many(produced))
    }

    /// Pop the oldest result; on an empty queue run one cycle and retry once.
    ///
    /// A failed cycle is logged and yields `None`.
    pub fn dequeue_next(&self) -> Option<T> {
        if let Some(item) = self.inner.lock().items.pop_front() {
            return Some(item);
        }

        info!("queue empty, triggering detection cycle");
        if let Err(e) = self.run_cycle(&self.cancel) {
            warn!(error = %e, "triggered cycle failed");
            return None;
        }
        self.inner.lock().items.pop_front()
    }

    pub fn peek_status(&self) -> QueueStatus<T> {
        self.peek_status_with(DEFAULT_PREVIEW)
    }

    pub fn peek_status_with(&self, preview: usize) -> QueueStatus<T> {
        let inner = self.inner.lock();
        QueueStatus {
            length: inner.items.len(),
            preview: inner.items.iter().take(preview).cloned().collect(),
            last_cycle_count: inner.last_cycle_count,
            cycles_triggered: inner.cycles_triggered,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued result. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.items.len();
        inner.items.clear();
        info!(dropped, "result queue cleared");
        dropped
    }
}
