//! Progress reporting context passed through a retiling run.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

/// Callback receiving human-readable progress lines.
pub type ProgressCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Progress sink shared by the orchestrator and its workers.
///
/// Every message goes to `tracing` at info level and, when set, to the
/// callback. Unit outcomes are tallied in atomic counters.
#[derive(Default)]
pub struct Progress {
    callback: Option<ProgressCallback>,
    completed: AtomicUsize,
    skipped: AtomicUsize,
    empty: AtomicUsize,
    failed: AtomicUsize,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounts {
    /// Units that produced an optimized output.
    pub completed: usize,
    /// Units skipped because their output already existed.
    pub skipped: usize,
    /// Units without overlapping quads.
    pub empty: usize,
    /// Units that failed.
    pub failed: usize,
}

impl ProgressCounts {
    /// Units accounted for.
    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.empty + self.failed
    }
}

impl Progress {
    /// Progress reported only through `tracing`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress that also forwards each message to `callback`.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            ..Self::default()
        }
    }

    /// Report a message.
    pub fn report(&self, message: &str) {
        info!("{message}");
        if let Some(callback) = &self.callback {
            callback(message);
        }
    }

    pub(crate) fn unit_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unit_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unit_empty(&self) {
        self.empty.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unit_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters.
    pub fn counts(&self) -> ProgressCounts {
        ProgressCounts {
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("callback", &self.callback.is_some())
            .field("counts", &self.counts())
            .finish()
    }
}
