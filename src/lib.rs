//! # edgequake-urdu2roman
//!
//! Transliterate large Urdu documents into Roman Urdu with a remote
//! language model, batch by batch, with pause, resume and recovery.
//!
//! ## Why this crate?
//!
//! A long book does not fit in one request, and a request that fails after
//! an hour of work should not cost that hour. This crate cuts the input into
//! work units (32 KiB text spans, PDF pages, or a whole image), sends them in
//! small ordered batches, and commits each batch's streamed result only once
//! it completes cleanly. Progress can be exported as a human-editable JSON
//! snapshot at any time and imported later to continue where it stopped.
//!
//! ## Pipeline Overview
//!
//! ```text
//! text / PDF / image
//!  │
//!  ├─ 1. Input     resolve local file or download from URL, detect kind
//!  ├─ 2. Batch     next range of units after the committed cursor
//!  ├─ 3. Extract   text span | rendered page (pdfium) | page text | image
//!  ├─ 4. Dispatch  stream the batch to Gemini / OpenAI / Anthropic / …
//!  ├─ 5. Polish    strip fences, page markers, invisible characters
//!  └─ 6. Commit    append to the ledger, advance the cursor, update the ETA
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_urdu2roman::{open_source, Pipeline, PipelineConfig, RunSignal, RunState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = open_source("kitaab.pdf", 120).await?;
//!     let config = PipelineConfig::builder().batch_size(2).build()?;
//!     let mut pipeline = Pipeline::new(source.document().clone(), config)?;
//!
//!     let signal = RunSignal::new();
//!     if pipeline.run(&signal).await == RunState::Error {
//!         // Committed batches are kept; save them and retry later.
//!         std::fs::write("kitaab.progress.json", pipeline.export_snapshot()?)?;
//!     }
//!     println!("{}", pipeline.output());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `urdu2roman` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-urdu2roman = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod controller;
pub mod error;
pub mod export;
pub mod ledger;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;
pub mod signal;
pub mod snapshot;
pub mod source;
pub mod transliterate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ModeFlags, PageRange, PipelineConfig, PipelineConfigBuilder, TEXT_CHUNK_BYTES};
pub use controller::{Pipeline, ProgressHandle, RunState};
pub use error::{ErrorKind, TranslitError};
pub use export::{assemble_output, write_output};
pub use ledger::{ProgressReport, ProgressState};
pub use pipeline::dispatch::{FragmentStream, TransliterationRequest, Transliterator};
pub use pipeline::extract::UnitPayload;
pub use pipeline::input::{open_source, LoadedSource};
pub use progress::{NoopProgressCallback, PipelineProgressCallback};
pub use session::Session;
pub use signal::{Interruption, RunSignal};
pub use snapshot::RecoverySnapshot;
pub use source::{DocumentKind, PageSource, SourceDocument, SourceIdentity};
pub use transliterate::{
    inspect, transliterate, transliterate_sync, transliterate_text, transliterate_to_file,
    SourceSummary, TransliterationOutput,
};
