//! Session handle: runs a [`Pipeline`] in the background for host
//! applications.
//!
//! A UI typically owns one `Session` per loaded document. `start` spawns a
//! run on the current tokio runtime and returns immediately; `pause` and
//! `stop` signal that run from any task. Only one run is active at a time:
//! `start` while processing is a no-op.

use crate::controller::{Pipeline, ProgressHandle, RunState};
use crate::error::TranslitError;
use crate::ledger::ProgressReport;
use crate::signal::RunSignal;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A pipeline plus the bookkeeping to drive it from a UI.
pub struct Session {
    pipeline: Arc<tokio::sync::Mutex<Pipeline>>,
    progress: ProgressHandle,
    running: Arc<AtomicBool>,
    signal: Mutex<Option<RunSignal>>,
    task: Mutex<Option<JoinHandle<RunState>>>,
}

impl Session {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            progress: pipeline.progress_handle(),
            pipeline: Arc::new(tokio::sync::Mutex::new(pipeline)),
            running: Arc::new(AtomicBool::new(false)),
            signal: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Start (or resume, or retry) a run. Returns false if one is already
    /// processing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Start ignored: already processing");
            return false;
        }

        let signal = RunSignal::new();
        *self.signal.lock().unwrap_or_else(PoisonError::into_inner) = Some(signal.clone());

        let pipeline = Arc::clone(&self.pipeline);
        let running = RunningFlag(Arc::clone(&self.running));
        let handle = tokio::spawn(async move {
            let _running = running;
            let mut pipeline = pipeline.lock().await;
            let outcome = AssertUnwindSafe(pipeline.run(&signal)).catch_unwind().await;
            match outcome {
                Ok(state) => state,
                Err(_) => {
                    error!("Run panicked; session left in error");
                    pipeline.fail(TranslitError::Internal("run panicked".into()));
                    RunState::Error
                }
            }
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request a pause. Committed progress is kept.
    pub fn pause(&self) {
        if let Some(signal) = self.current_signal() {
            signal.pause();
        }
    }

    /// Abort any run and reset the session to `idle`.
    pub async fn stop(&self) {
        if let Some(signal) = self.current_signal() {
            signal.abort();
        }
        self.wait().await;
        self.pipeline.lock().await.stop();
    }

    /// Wait for the current run, if any, and return its final state.
    pub async fn wait(&self) -> Option<RunState> {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle.await.ok(),
            None => None,
        }
    }

    pub async fn state(&self) -> RunState {
        if self.is_running() {
            return RunState::Processing;
        }
        self.pipeline.lock().await.state()
    }

    /// Message of the error that ended the last run.
    pub async fn last_error(&self) -> Option<String> {
        if self.is_running() {
            return None;
        }
        self.pipeline
            .lock()
            .await
            .last_error()
            .map(|e| e.to_string())
    }

    pub fn progress(&self) -> ProgressReport {
        self.progress.report()
    }

    /// Snapshot of committed progress; allowed while processing.
    pub fn export_snapshot(&self) -> Result<String, TranslitError> {
        self.progress.export_snapshot()
    }

    /// Committed output so far.
    pub fn output(&self) -> String {
        self.progress.output()
    }

    /// Restore a recovery snapshot. Refused while processing.
    pub async fn import_snapshot(&self, text: &str) -> Result<(), TranslitError> {
        if self.is_running() {
            return Err(TranslitError::Busy("cannot import while processing".into()));
        }
        self.pipeline.lock().await.import_snapshot(text).await
    }

    fn current_signal(&self) -> Option<RunSignal> {
        self.signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Clears the running flag when the run task ends, however it ends.
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
