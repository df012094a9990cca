//! One-shot entry points: load, run to completion, return the text.
//!
//! These wrap [`Pipeline`] for callers that do not need pause, resume or
//! snapshots. Use [`crate::session::Session`] or drive a [`Pipeline`]
//! directly for interactive control.

use crate::config::PipelineConfig;
use crate::controller::{Pipeline, RunState};
use crate::error::TranslitError;
use crate::export::write_output;
use crate::ledger::ProgressReport;
use crate::pipeline::input;
use crate::signal::RunSignal;
use crate::source::{DocumentKind, SourceDocument, SourceIdentity};
use std::path::Path;
use tracing::info;

/// Result of a completed transliteration.
#[derive(Debug, Clone)]
pub struct TransliterationOutput {
    /// Committed segments joined by blank lines.
    pub text: String,
    pub source: SourceIdentity,
    pub kind: DocumentKind,
    pub stats: ProgressReport,
}

/// What a source looks like before processing.
#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub identity: SourceIdentity,
    pub kind: DocumentKind,
    /// Positions: bytes for text, pages for PDFs, 1 for an image.
    pub units: u64,
}

/// Transliterate a local file or HTTP/HTTPS URL.
///
/// # Example
/// ```rust,no_run
/// use edgequake_urdu2roman::{transliterate, PipelineConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     // Backend auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
///     let config = PipelineConfig::default();
///     let output = transliterate("ghazal.txt", &config).await?;
///     println!("{}", output.text);
///     Ok(())
/// }
/// ```
pub async fn transliterate(
    input_str: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<TransliterationOutput, TranslitError> {
    let input_str = input_str.as_ref();
    info!("Starting transliteration: {}", input_str);
    let loaded = input::open_source(input_str, config.download_timeout_secs).await?;
    run_document(loaded.document().clone(), config).await
}

/// Transliterate Urdu text already in memory.
pub async fn transliterate_text(
    name: &str,
    text: &str,
    config: &PipelineConfig,
) -> Result<TransliterationOutput, TranslitError> {
    run_document(SourceDocument::from_text(name, text), config).await
}

/// Transliterate and write the result to `output_path` atomically.
pub async fn transliterate_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<ProgressReport, TranslitError> {
    let output = transliterate(input_str, config).await?;
    write_output(output_path.as_ref(), &output.text).await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`transliterate`].
///
/// Creates a temporary tokio runtime internally.
pub fn transliterate_sync(
    input_str: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<TransliterationOutput, TranslitError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TranslitError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(transliterate(input_str, config))
}

/// Load a source and report its kind and size without transliterating.
///
/// Does not require an API key.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<SourceSummary, TranslitError> {
    let loaded = input::open_source(input_str.as_ref(), 120).await?;
    let document = loaded.document();
    Ok(SourceSummary {
        identity: document.identity().clone(),
        kind: document.kind(),
        units: document.unit_count().await?,
    })
}

async fn run_document(
    document: SourceDocument,
    config: &PipelineConfig,
) -> Result<TransliterationOutput, TranslitError> {
    let source = document.identity().clone();
    let kind = document.kind();
    let mut pipeline = Pipeline::new(document, config.clone())?;

    match pipeline.run(&RunSignal::new()).await {
        RunState::Completed => Ok(TransliterationOutput {
            text: pipeline.output(),
            source,
            kind,
            stats: pipeline.progress(),
        }),
        RunState::Error => Err(pipeline
            .take_last_error()
            .unwrap_or_else(|| TranslitError::Internal("run failed without an error".into()))),
        other => Err(TranslitError::Internal(format!(
            "run ended in unexpected state {other:?}"
        ))),
    }
}
