//! Live counters of a processor run.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::ErrorRecord;

/// Point-in-time view of a processor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessingStats {
    /// Items waiting in the input queue.
    pub queue_size: usize,
    /// Results waiting in the output queue.
    pub output_size: usize,
    /// Workers that have not yet finished.
    pub active_workers: usize,
    /// Failures recorded so far.
    pub error_count: usize,
    /// Items transformed successfully so far.
    pub processed: u64,
}

/// Shared counters and the error log, updated by every task of a run.
#[derive(Debug)]
pub(super) struct RunTracker {
    active_workers: AtomicUsize,
    processed: AtomicU64,
    errors: Mutex<Vec<ErrorRecord>>,
    error_total: AtomicUsize,
    cancelled: AtomicBool,
}

impl RunTracker {
    pub(super) fn new(workers: usize) -> Self {
        Self {
            active_workers: AtomicUsize::new(workers),
            processed: AtomicU64::new(0),
            errors: Mutex::new(Vec::new()),
            error_total: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    pub(super) fn record_error(&self, record: ErrorRecord) {
        self.error_total.fetch_add(1, Ordering::SeqCst);
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Records shutdown once, however many tasks observe it.
    pub(super) fn record_cancelled(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.record_error(ErrorRecord::cancelled("process"));
        }
    }

    pub(super) fn increment_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks one worker finished. Returns `true` for the last one.
    pub(super) fn worker_finished(&self) -> bool {
        self.active_workers.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub(super) fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Failures recorded over the whole run, including already taken ones.
    pub(super) fn error_count(&self) -> usize {
        self.error_total.load(Ordering::SeqCst)
    }

    pub(super) fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub(super) fn take_errors(&self) -> Vec<ErrorRecord> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
