//! Pipeline controller: the run loop and its state machine.
//!
//! ```text
//!            start                 pause
//!   idle ───────────▶ processing ───────▶ paused ──(start)──▶ processing
//!    ▲                 │      │
//!    │ stop            │      └──────────▶ completed
//!    │                 ▼
//!    └──────────────  error ──(start: retry at same cursor)──▶ processing
//! ```
//!
//! One run of [`Pipeline::run`] repeats: compute the next range, extract its
//! units (skipping blanks), dispatch them, stream fragments into a live
//! buffer, and commit the cleaned result to the ledger. The live buffer is
//! private to the batch, so a pause, stop or failure mid-batch only ever
//! discards uncommitted text; the cursor stays at the last committed batch
//! and the next run redispatches exactly the same range.
//!
//! Pause and stop are requested through a [`RunSignal`], checked before each
//! batch, before each unit, and at every fragment boundary. Stop is
//! destructive: it resets the session to `idle`.

use crate::config::{ModeFlags, PipelineConfig};
use crate::error::TranslitError;
use crate::export::assemble_output;
use crate::ledger::{BatchCommit, ProgressLedger, ProgressReport, ProgressState};
use crate::pipeline::batch::{next_range, BatchRange};
use crate::pipeline::dispatch::{Dispatcher, StreamStep};
use crate::pipeline::extract::{UnitExtractor, UnitPayload, WorkUnit};
use crate::pipeline::postprocess::clean_segment;
use crate::pipeline::provider::resolve_backend;
use crate::progress::ProgressCallback;
use crate::signal::{Interruption, RunSignal};
use crate::snapshot::{self, RecoverySnapshot};
use crate::source::{DocumentKind, SourceDocument, SourceIdentity};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Characters of each unit shown in batch previews.
const UNIT_PREVIEW_CHARS: usize = 80;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Processing,
    Paused,
    Completed,
    Error,
}

/// How the run loop ended, short of an error.
enum RunEnd {
    Completed,
    Interrupted(Interruption),
}

/// Result of a stage that may be cut short by the run signal.
enum Flow<T> {
    Done(T),
    Stopped(Interruption),
}

/// Shared read access to a pipeline's committed progress.
///
/// Cloned out of a [`Pipeline`] so progress can be read, and a snapshot
/// exported, while a run holds the pipeline.
#[derive(Clone)]
pub struct ProgressHandle {
    ledger: Arc<Mutex<ProgressLedger>>,
    identity: SourceIdentity,
}

impl ProgressHandle {
    pub fn report(&self) -> ProgressReport {
        lock(&self.ledger).report()
    }

    /// Snapshot text of the committed progress.
    pub fn export_snapshot(&self) -> Result<String, TranslitError> {
        let ledger = lock(&self.ledger);
        snapshot::serialize(ledger.state(), &self.identity, ledger.flags())
    }

    /// Committed output joined for export.
    pub fn output(&self) -> String {
        assemble_output(&lock(&self.ledger).state().accumulated)
    }
}

/// The transliteration pipeline over one loaded source.
pub struct Pipeline {
    source: SourceDocument,
    config: PipelineConfig,
    extractor: UnitExtractor,
    dispatcher: Dispatcher,
    ledger: Arc<Mutex<ProgressLedger>>,
    callback: Option<ProgressCallback>,
    state: RunState,
    last_error: Option<TranslitError>,
}

impl Pipeline {
    /// Create a pipeline, resolving the transliteration backend from `config`.
    pub fn new(source: SourceDocument, config: PipelineConfig) -> Result<Self, TranslitError> {
        let backend = resolve_backend(&config)?;
        info!(
            "Pipeline for '{}' using backend '{}'",
            source.identity().name,
            backend.name()
        );
        let dispatcher = Dispatcher::new(backend, &config);
        let ledger = ProgressLedger::new(config.preview_capacity, config.mode_flags());
        Ok(Self {
            extractor: UnitExtractor::new(config.chunk_size, config.use_ocr),
            callback: config.progress_callback.clone(),
            source,
            config,
            dispatcher,
            ledger: Arc::new(Mutex::new(ledger)),
            state: RunState::Idle,
            last_error: None,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The error that ended the last run, if it ended in `error`.
    pub fn last_error(&self) -> Option<&TranslitError> {
        self.last_error.as_ref()
    }

    pub fn take_last_error(&mut self) -> Option<TranslitError> {
        self.last_error.take()
    }

    pub fn source(&self) -> &SourceDocument {
        &self.source
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn progress_handle(&self) -> ProgressHandle {
        ProgressHandle {
            ledger: Arc::clone(&self.ledger),
            identity: self.source.identity().clone(),
        }
    }

    pub fn progress(&self) -> ProgressReport {
        self.ledger().report()
    }

    /// A copy of the committed progress.
    pub fn progress_state(&self) -> ProgressState {
        self.ledger().state().clone()
    }

    /// Most recent batch results, oldest first.
    pub fn preview(&self) -> Vec<String> {
        self.ledger().preview().map(str::to_string).collect()
    }

    /// Committed output joined for export.
    pub fn output(&self) -> String {
        assemble_output(&self.ledger().state().accumulated)
    }

    /// Snapshot text of the committed progress.
    pub fn export_snapshot(&self) -> Result<String, TranslitError> {
        self.progress_handle().export_snapshot()
    }

    /// Replace progress with a recovery snapshot.
    ///
    /// The snapshot is fully validated against the loaded source before
    /// anything changes; on error the pipeline is untouched. On success the
    /// snapshot's mode flags replace the configured ones and the pipeline is
    /// `paused` (or `completed` if nothing is left).
    pub async fn import_snapshot(&mut self, text: &str) -> Result<(), TranslitError> {
        if self.state == RunState::Processing {
            return Err(TranslitError::Busy("cannot import while processing".into()));
        }
        let snap = snapshot::deserialize(text)?;
        snap.check_identity(self.source.identity())?;
        let flags = snap.mode_flags();
        let expected_total = self.total_for(flags).await?;
        if snap.total_items != expected_total {
            return Err(TranslitError::SnapshotInvalid {
                detail: format!(
                    "totalItems ({}) does not match the loaded source ({})",
                    snap.total_items, expected_total
                ),
            });
        }

        self.apply_snapshot(snap, flags);
        Ok(())
    }

    fn apply_snapshot(&mut self, snap: RecoverySnapshot, flags: ModeFlags) {
        self.config.use_ocr = flags.use_ocr;
        self.config.page_range = flags.page_range;
        self.extractor = UnitExtractor::new(self.config.chunk_size, flags.use_ocr);

        let (total, cursor) = (snap.total_items, snap.last_processed_index);
        info!(
            "Restored snapshot: {}/{} positions, {} segments",
            cursor,
            total,
            snap.accumulated_content.len()
        );
        self.ledger()
            .restore(total, cursor, snap.accumulated_content, flags);
        self.last_error = None;
        self.state = if cursor >= total {
            RunState::Completed
        } else {
            RunState::Paused
        };
    }

    /// End in `error` from outside the run loop (a run that panicked).
    /// Committed progress is kept.
    pub(crate) fn fail(&mut self, error: TranslitError) {
        self.state = RunState::Error;
        self.last_error = Some(error);
    }

    /// Destructive stop: discard all progress and return to `idle`.
    pub fn stop(&mut self) {
        self.ledger().reset(self.config.mode_flags());
        self.state = RunState::Idle;
        self.last_error = None;
        info!("Session reset");
    }

    /// Run until completion, interruption or error; returns the new state.
    ///
    /// Starts from the committed cursor, so calling this after `paused` or
    /// `error` resumes exactly where the last commit left off.
    pub async fn run(&mut self, signal: &RunSignal) -> RunState {
        self.state = RunState::Processing;
        self.last_error = None;

        let outcome = self.run_loop(signal).await;

        self.state = match outcome {
            Ok(RunEnd::Completed) => {
                info!("Run completed");
                RunState::Completed
            }
            Ok(RunEnd::Interrupted(Interruption::Paused)) => {
                info!("Run paused at {}", self.ledger().state().cursor);
                RunState::Paused
            }
            Ok(RunEnd::Interrupted(Interruption::Aborted)) => {
                self.stop();
                RunState::Idle
            }
            Err(e) => {
                error!("Run failed: {}", e);
                self.last_error = Some(e);
                RunState::Error
            }
        };

        if let Some(cb) = &self.callback {
            cb.on_run_finished(self.state, self.last_error.as_ref());
        }
        self.state
    }

    async fn run_loop(&mut self, signal: &RunSignal) -> Result<RunEnd, TranslitError> {
        let (run_origin, total) = self.ensure_sized().await?;
        let stride = self.extractor.stride(&self.source);
        let started = Instant::now();
        self.ledger().begin_run();

        debug!(
            "Run from {} of {} (stride {}, batch size {})",
            run_origin, total, stride, self.config.batch_size
        );
        if let Some(cb) = &self.callback {
            cb.on_run_start(total, run_origin);
        }

        loop {
            if let Some(i) = signal.interruption() {
                return Ok(RunEnd::Interrupted(i));
            }

            let cursor = self.ledger().state().cursor;
            let Some(range) = next_range(cursor, total, self.config.batch_size, stride) else {
                return Ok(RunEnd::Completed);
            };

            let units = match self.extract_range(&range, signal).await? {
                Flow::Done(units) => units,
                Flow::Stopped(i) => return Ok(RunEnd::Interrupted(i)),
            };

            if units.is_empty() {
                let report = {
                    let mut ledger = self.ledger();
                    if signal.is_aborted() {
                        return Ok(RunEnd::Interrupted(Interruption::Aborted));
                    }
                    ledger.advance(range.end)
                };
                debug!("Range {}..{} is blank, skipped", range.start, range.end);
                if let Some(cb) = &self.callback {
                    cb.on_batch_committed(&report);
                }
                continue;
            }

            if let Some(cb) = &self.callback {
                let previews: Vec<String> =
                    units.iter().map(|u| u.preview(UNIT_PREVIEW_CHARS)).collect();
                cb.on_batch_start(&range, &previews);
            }

            let source_text = batch_source_text(&units);
            let live = match self.stream_batch(range, units, signal).await? {
                Flow::Done(live) => live,
                Flow::Stopped(i) => return Ok(RunEnd::Interrupted(i)),
            };

            let output = finish_segment(&live, source_text.as_deref()).ok_or(
                TranslitError::EmptyResponse {
                    start: range.start,
                    end: range.end,
                },
            )?;

            let fraction = run_fraction(range.end, run_origin, total);
            let report = {
                let mut ledger = self.ledger();
                if signal.is_aborted() {
                    return Ok(RunEnd::Interrupted(Interruption::Aborted));
                }
                ledger.commit(BatchCommit {
                    end: range.end,
                    fraction,
                    elapsed: started.elapsed(),
                    output,
                })
            };
            let (first, last) = range.display_bounds();
            info!(
                "Committed {}..={} ({}/{}, {} segments)",
                first, last, report.processed, report.total, report.segments
            );
            if let Some(cb) = &self.callback {
                cb.on_batch_committed(&report);
            }
        }
    }

    /// Materialise the non-blank units of `range`, checking the signal
    /// before each one.
    async fn extract_range(
        &self,
        range: &BatchRange,
        signal: &RunSignal,
    ) -> Result<Flow<Vec<WorkUnit>>, TranslitError> {
        let mut units = Vec::with_capacity(range.len() as usize);
        for index in range.units() {
            if let Some(i) = signal.interruption() {
                return Ok(Flow::Stopped(i));
            }
            match self.extractor.materialize(&self.source, index).await? {
                Some(unit) => units.push(unit),
                None => {
                    if let Some(cb) = &self.callback {
                        cb.on_unit_skipped(index);
                    }
                }
            }
        }
        Ok(Flow::Done(units))
    }

    /// Dispatch one batch and drain its fragments into a fresh live buffer.
    async fn stream_batch(
        &self,
        range: BatchRange,
        units: Vec<WorkUnit>,
        signal: &RunSignal,
    ) -> Result<Flow<String>, TranslitError> {
        debug!(
            "Dispatching {}..{} ({} units) to {}",
            range.start,
            range.end,
            units.len(),
            self.dispatcher.backend_name()
        );
        let mut live = String::new();
        let mut stream = self.dispatcher.dispatch(range, units);
        loop {
            match stream.next_step(signal).await? {
                StreamStep::Fragment(fragment) => {
                    live.push_str(&fragment);
                    if let Some(cb) = &self.callback {
                        cb.on_fragment(&fragment, &live);
                    }
                }
                StreamStep::Finished => return Ok(Flow::Done(live)),
                StreamStep::Interrupted(i) => {
                    if !live.is_empty() {
                        warn!(
                            "Discarding {} bytes of partial output for {}..{}",
                            live.len(),
                            range.start,
                            range.end
                        );
                    }
                    return Ok(Flow::Stopped(i));
                }
            }
        }
    }

    /// Size the session on first use: `(cursor, total)`.
    async fn ensure_sized(&mut self) -> Result<(u64, u64), TranslitError> {
        if let Some((cursor, total)) = self.ledger().position() {
            return Ok((cursor, total));
        }
        let (cursor, total) = self.bounds_for(self.config.mode_flags()).await?;
        self.ledger().begin(total, cursor);
        info!(
            "Sized '{}': {} positions, starting at {}",
            self.source.identity().name,
            total,
            cursor
        );
        Ok((cursor, total))
    }

    /// Initial cursor and total for `flags`. A page range only applies to
    /// paged sources.
    async fn bounds_for(&self, flags: ModeFlags) -> Result<(u64, u64), TranslitError> {
        let count = self.source.unit_count().await?;
        Ok(match (self.source.kind(), flags.page_range) {
            (DocumentKind::Paged, Some(range)) => range.bounds(count),
            _ => (0, count),
        })
    }

    async fn total_for(&self, flags: ModeFlags) -> Result<u64, TranslitError> {
        Ok(self.bounds_for(flags).await?.1)
    }

    fn ledger(&self) -> MutexGuard<'_, ProgressLedger> {
        lock(&self.ledger)
    }
}

fn lock(ledger: &Mutex<ProgressLedger>) -> MutexGuard<'_, ProgressLedger> {
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The batch's input text, when every unit is text.
fn batch_source_text(units: &[WorkUnit]) -> Option<String> {
    units
        .iter()
        .map(|u| match &u.payload {
            UnitPayload::Text(text) => Some(text.as_str()),
            UnitPayload::Image { .. } => None,
        })
        .collect::<Option<Vec<_>>>()
        .map(|texts| texts.join("\n"))
}

/// Clean a batch response for commit. Cleanup never empties a response
/// that has content: if it would, the markers are kept. `None` only when
/// the response itself is blank.
fn finish_segment(live: &str, source_text: Option<&str>) -> Option<String> {
    let cleaned = clean_segment(live, source_text);
    if !cleaned.is_empty() {
        return Some(cleaned);
    }
    let kept = clean_segment(live, None);
    if kept.is_empty() {
        return None;
    }
    warn!("Cleanup removed every line of a response; keeping its marker lines");
    Some(kept)
}

/// Completion of the current run, measured from where it started.
fn run_fraction(end: u64, origin: u64, total: u64) -> f64 {
    if total <= origin {
        return 1.0;
    }
    (end.saturating_sub(origin)) as f64 / (total - origin) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_only_response_is_committed() {
        assert_eq!(
            finish_segment("Safha 12\n", Some("pehla")).as_deref(),
            Some("Safha 12")
        );
        assert_eq!(finish_segment("```text\n\n```", Some("pehla")), None);
        assert_eq!(finish_segment(" \n", None), None);
    }

    #[test]
    fn source_text_only_for_all_text_batches() {
        let text = |i: u64, t: &str| WorkUnit {
            index: i,
            payload: UnitPayload::Text(t.into()),
        };
        assert_eq!(
            batch_source_text(&[text(0, "ek"), text(1, "do")]).as_deref(),
            Some("ek\ndo")
        );
        let image = WorkUnit {
            index: 2,
            payload: UnitPayload::Image {
                data: Arc::from(vec![1u8, 2]),
                media_type: "image/png".into(),
            },
        };
        assert_eq!(batch_source_text(&[text(0, "ek"), image]), None);
    }

    #[test]
    fn run_fraction_is_relative_to_origin() {
        assert_eq!(run_fraction(6, 2, 10), 0.5);
        assert_eq!(run_fraction(10, 10, 10), 1.0);
        assert_eq!(run_fraction(1, 0, 4), 0.25);
    }
}
