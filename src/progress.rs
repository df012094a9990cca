//! Progress-callback trait for run and batch events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to drive a
//! progress bar or a live view of the streaming text.
//!
//! # Example
//!
//! ```rust
//! use edgequake_urdu2roman::{PipelineConfig, PipelineProgressCallback, ProgressReport};
//! use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
//!
//! struct CursorTracker {
//!     cursor: AtomicU64,
//! }
//!
//! impl PipelineProgressCallback for CursorTracker {
//!     fn on_batch_committed(&self, report: &ProgressReport) {
//!         self.cursor.store(report.cursor, Ordering::SeqCst);
//!     }
//! }
//!
//! let tracker = Arc::new(CursorTracker { cursor: AtomicU64::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(tracker as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::controller::RunState;
use crate::error::TranslitError;
use crate::ledger::ProgressReport;
use crate::pipeline::batch::BatchRange;
use std::sync::Arc;

/// Called by the controller as a run progresses.
///
/// All methods have default no-op implementations. Calls come from the task
/// driving the run, one at a time and in order.
pub trait PipelineProgressCallback: Send + Sync {
    /// A run is starting at `cursor` of `total` positions.
    fn on_run_start(&self, total: u64, cursor: u64) {
        let _ = (total, cursor);
    }

    /// A batch is about to be dispatched.
    ///
    /// # Arguments
    /// * `range`:    the positions the batch covers
    /// * `previews`: short display form of each non-blank unit
    fn on_batch_start(&self, range: &BatchRange, previews: &[String]) {
        let _ = (range, previews);
    }

    /// A fragment arrived. `live` is the batch's text so far; it is
    /// discarded if the batch does not complete.
    fn on_fragment(&self, fragment: &str, live: &str) {
        let _ = (fragment, live);
    }

    /// A unit was blank and will not be sent.
    fn on_unit_skipped(&self, index: u64) {
        let _ = index;
    }

    /// A batch (or an all-blank range) was committed.
    fn on_batch_committed(&self, report: &ProgressReport) {
        let _ = report;
    }

    /// The run ended in `state`.
    fn on_run_finished(&self, state: RunState, error: Option<&TranslitError>) {
        let _ = (state, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl PipelineProgressCallback for Recorder {
        fn on_fragment(&self, fragment: &str, _live: &str) {
            self.events.lock().unwrap().push(format!("frag:{fragment}"));
        }

        fn on_run_finished(&self, state: RunState, _error: Option<&TranslitError>) {
            self.events.lock().unwrap().push(format!("end:{state:?}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(10, 0);
        cb.on_batch_start(&BatchRange { start: 0, end: 1, stride: 1 }, &[]);
        cb.on_fragment("a", "a");
        cb.on_unit_skipped(3);
        cb.on_batch_committed(&ProgressReport {
            total: 10,
            cursor: 1,
            processed: 1,
            fraction: 0.1,
            segments: 1,
            elapsed: Duration::from_secs(1),
            eta: None,
        });
        cb.on_run_finished(RunState::Completed, None);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let rec = Arc::new(Recorder::default());
        let cb: ProgressCallback = rec.clone();
        cb.on_fragment("Aap", "Aap");
        cb.on_unit_skipped(1);
        cb.on_run_finished(RunState::Paused, None);
        assert_eq!(*rec.events.lock().unwrap(), vec!["frag:Aap", "end:Paused"]);
    }
}
