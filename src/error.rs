//! Error types for the edgequake-urdu2roman library.
//!
//! Every failure the pipeline can report is a [`TranslitError`]. Errors are
//! grouped into a small taxonomy ([`ErrorKind`]) that decides how the
//! controller reacts:
//!
//! * [`ErrorKind::UnsupportedInput`]: the file cannot be processed at all.
//!   Raised while loading the source, before any run starts.
//! * [`ErrorKind::Extraction`]: one work unit could not be materialised
//!   (render or decode failure). The run ends in `error`; the cursor stays at
//!   the last committed batch.
//! * [`ErrorKind::Dispatch`]: the remote transliteration service failed
//!   (network, quota, malformed or truncated stream). Same handling as
//!   extraction: the whole batch is discarded and redispatched on retry.
//! * [`ErrorKind::BadMetadata`]: a recovery snapshot could not be imported.
//!   Live state is never touched.
//!
//! Nothing here is fatal to the process: every run-level error leaves the
//! pipeline in a state that permits a retry or a full stop-and-reset.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`TranslitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// File kind not recognised, missing, or unreadable.
    UnsupportedInput,
    /// A work unit could not be materialised.
    Extraction,
    /// The remote transliteration service failed.
    Dispatch,
    /// A recovery snapshot is malformed or does not match the source.
    BadMetadata,
    /// Invalid configuration or session misuse.
    Config,
    /// Local I/O while writing results.
    Io,
    /// Unexpected internal failure (task panic, runtime creation).
    Internal,
}

/// All errors returned by the edgequake-urdu2roman library.
#[derive(Debug, Error)]
pub enum TranslitError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file was read but is neither text, a PDF, nor a supported image.
    #[error("Unsupported input '{name}': {reason}\nSupported: plain text (UTF-8), PDF, PNG, JPEG, GIF, WEBP.")]
    UnsupportedInput { name: String, reason: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// A unit index lies outside the document.
    #[error("Unit {index} is out of range (document has {total} units)")]
    UnitOutOfRange { index: u64, total: u64 },

    /// Rasterising a page for optical recognition failed.
    #[error("Rendering failed for page {page}: {detail}")]
    RenderFailed { page: u64, detail: String },

    /// Reading the text layer of a page failed.
    #[error("Text extraction failed for page {page}: {detail}")]
    TextExtractionFailed { page: u64, detail: String },

    /// Reading a byte span of a plain-text source failed.
    #[error("Failed to read text at byte offset {offset}: {detail}")]
    TextReadFailed { offset: u64, detail: String },

    // ── Dispatch errors ───────────────────────────────────────────────────
    /// No transliteration backend could be configured.
    #[error("Transliteration provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The remote service rejected or failed the request.
    #[error("Transliteration API error: {message}")]
    ApiError { message: String },

    /// The response stream closed before the service signalled completion.
    #[error("Response stream ended early: {detail}")]
    StreamTruncated { detail: String },

    /// The service completed but produced no text for a non-empty batch.
    #[error("Empty response for units {start}..{end}")]
    EmptyResponse { start: u64, end: u64 },

    /// No fragment arrived within the configured fragment timeout.
    #[error("No response fragment within {secs}s for units {start}..{end}")]
    FragmentTimeout { start: u64, end: u64, secs: u64 },

    // ── Snapshot errors ───────────────────────────────────────────────────
    /// Recovery snapshot is not valid structured text.
    #[error("Bad metadata: snapshot could not be parsed: {detail}")]
    SnapshotParse { detail: String },

    /// Recovery snapshot parsed but its fields are inconsistent.
    #[error("Bad metadata: {detail}")]
    SnapshotInvalid { detail: String },

    /// Recovery snapshot belongs to a different source document.
    #[error("Bad metadata: snapshot is for '{snapshot_name}' ({snapshot_size} bytes) but the loaded file is '{source_name}' ({source_size} bytes)")]
    SnapshotMismatch {
        snapshot_name: String,
        snapshot_size: u64,
        source_name: String,
        source_size: u64,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The operation is not allowed while a run is in progress.
    #[error("Pipeline is busy: {0}")]
    Busy(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TranslitError {
    /// Classify this error into the pipeline's taxonomy.
    pub fn kind(&self) -> ErrorKind {
        use TranslitError::*;
        match self {
            FileNotFound { .. }
            | PermissionDenied { .. }
            | InvalidInput { .. }
            | DownloadFailed { .. }
            | DownloadTimeout { .. }
            | UnsupportedInput { .. } => ErrorKind::UnsupportedInput,
            CorruptPdf { .. }
            | PdfiumBindingFailed(_)
            | UnitOutOfRange { .. }
            | RenderFailed { .. }
            | TextExtractionFailed { .. }
            | TextReadFailed { .. } => ErrorKind::Extraction,
            ProviderNotConfigured { .. }
            | ApiError { .. }
            | StreamTruncated { .. }
            | EmptyResponse { .. }
            | FragmentTimeout { .. } => ErrorKind::Dispatch,
            SnapshotParse { .. } | SnapshotInvalid { .. } | SnapshotMismatch { .. } => {
                ErrorKind::BadMetadata
            }
            OutputWriteFailed { .. } => ErrorKind::Io,
            InvalidConfig(_) | Busy(_) => ErrorKind::Config,
            Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TranslitError>;
