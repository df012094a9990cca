//! Progress ledger: cursor, accumulated output, timing and ETA.
//!
//! The ledger is the only owner of committed progress. The controller
//! mutates it after a batch completes cleanly ([`ProgressLedger::commit`])
//! or after an all-blank range ([`ProgressLedger::advance`]); nothing else
//! writes to it. Both keep the cursor and the accumulated output in step:
//! the output always represents exactly the work up to the cursor.
//!
//! Two views of the output are kept. `accumulated` is unbounded and used for
//! export and snapshots; `preview` holds only the most recent results so a
//! live display of a very large document stays small.

use crate::config::ModeFlags;
use std::collections::VecDeque;
use std::time::Duration;

/// Committed progress of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    /// Total positions (bytes or pages); for a page range, its clipped end.
    pub total: u64,
    /// Positions completed. Never decreases within a session.
    pub cursor: u64,
    /// Completed batch results, in input order. Append-only.
    pub accumulated: Vec<String>,
    /// Active processing time across runs.
    pub elapsed: Duration,
    /// Estimated time remaining after the last commit.
    pub eta: Option<Duration>,
}

impl ProgressState {
    /// Processed positions, `floor(cursor / total × total)` computed exactly.
    pub fn processed(&self) -> u64 {
        self.cursor.min(self.total)
    }

    /// Overall completion in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.processed() as f64 / self.total as f64
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.total
    }
}

/// A lightweight view of progress for displays and callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    pub total: u64,
    pub cursor: u64,
    pub processed: u64,
    pub fraction: f64,
    pub segments: usize,
    pub elapsed: Duration,
    pub eta: Option<Duration>,
}

/// One cleanly completed batch.
#[derive(Debug, Clone)]
pub struct BatchCommit {
    /// Cursor after the batch.
    pub end: u64,
    /// Completion of the current run in `[0, 1]`, used for the ETA.
    pub fraction: f64,
    /// Active time spent in the current run.
    pub elapsed: Duration,
    /// Cleaned batch output.
    pub output: String,
}

/// Owner of [`ProgressState`] plus the display-only preview ring.
#[derive(Debug)]
pub struct ProgressLedger {
    state: ProgressState,
    flags: ModeFlags,
    initialized: bool,
    preview: VecDeque<String>,
    preview_capacity: usize,
    carried: Duration,
}

impl ProgressLedger {
    pub fn new(preview_capacity: usize, flags: ModeFlags) -> Self {
        Self {
            state: ProgressState::default(),
            flags,
            initialized: false,
            preview: VecDeque::with_capacity(preview_capacity),
            preview_capacity: preview_capacity.max(1),
            carried: Duration::ZERO,
        }
    }

    /// `(cursor, total)` once the session has been sized.
    pub fn position(&self) -> Option<(u64, u64)> {
        self.initialized
            .then_some((self.state.cursor, self.state.total))
    }

    /// Size a fresh session.
    pub fn begin(&mut self, total: u64, cursor: u64) {
        self.state = ProgressState {
            total,
            cursor: cursor.min(total),
            ..ProgressState::default()
        };
        self.preview.clear();
        self.carried = Duration::ZERO;
        self.initialized = true;
    }

    /// Replace all progress with a restored session.
    pub fn restore(&mut self, total: u64, cursor: u64, accumulated: Vec<String>, flags: ModeFlags) {
        self.preview = accumulated
            .iter()
            .rev()
            .take(self.preview_capacity)
            .rev()
            .cloned()
            .collect();
        self.state = ProgressState {
            total,
            cursor: cursor.min(total),
            accumulated,
            elapsed: Duration::ZERO,
            eta: None,
        };
        self.flags = flags;
        self.carried = Duration::ZERO;
        self.initialized = true;
    }

    /// Mark the start of a run: time from earlier runs is carried over.
    pub fn begin_run(&mut self) {
        self.carried = self.state.elapsed;
    }

    /// Append a completed batch and move the cursor to its end.
    pub fn commit(&mut self, commit: BatchCommit) -> ProgressReport {
        self.state.cursor = self.state.cursor.max(commit.end.min(self.state.total));
        self.state.elapsed = self.carried + commit.elapsed;
        self.state.eta = estimate_remaining(commit.fraction, commit.elapsed);

        if self.preview.len() == self.preview_capacity {
            self.preview.pop_front();
        }
        self.preview.push_back(commit.output.clone());
        self.state.accumulated.push(commit.output);
        self.report()
    }

    /// Move the cursor past a range that produced no output.
    pub fn advance(&mut self, end: u64) -> ProgressReport {
        self.state.cursor = self.state.cursor.max(end.min(self.state.total));
        self.report()
    }

    /// Discard all progress (destructive stop).
    pub fn reset(&mut self, flags: ModeFlags) {
        self.state = ProgressState::default();
        self.flags = flags;
        self.initialized = false;
        self.preview.clear();
        self.carried = Duration::ZERO;
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Mode flags the committed progress was made under.
    pub fn flags(&self) -> ModeFlags {
        self.flags
    }

    /// Most recent batch results, oldest first.
    pub fn preview(&self) -> impl Iterator<Item = &str> {
        self.preview.iter().map(String::as_str)
    }

    pub fn report(&self) -> ProgressReport {
        ProgressReport {
            total: self.state.total,
            cursor: self.state.cursor,
            processed: self.state.processed(),
            fraction: self.state.fraction(),
            segments: self.state.accumulated.len(),
            elapsed: self.state.elapsed,
            eta: self.state.eta,
        }
    }
}

/// `elapsed / fraction − elapsed`, or `None` before any progress.
pub fn estimate_remaining(fraction: f64, elapsed: Duration) -> Option<Duration> {
    if fraction <= 0.0 || !fraction.is_finite() {
        return None;
    }
    let total = elapsed.as_secs_f64() / fraction.min(1.0);
    Some(Duration::from_secs_f64((total - elapsed.as_secs_f64()).max(0.0)))
}
