//! Configuration types for the transliteration pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The core only consumes four knobs (batch
//! size, OCR mode, page range, text chunk size); everything else configures
//! the transliteration backend and the network edge.

use crate::error::TranslitError;
use crate::pipeline::dispatch::Transliterator;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Size of one plain-text work unit in bytes.
///
/// Large enough to amortise per-request overhead, small enough to bound
/// memory and the cost of redoing a unit after a failed batch.
pub const TEXT_CHUNK_BYTES: u64 = 32 * 1024;

/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 10;

/// Number of recent batch results kept for live preview.
pub const DEFAULT_PREVIEW_CAPACITY: usize = 3;

/// Default model for the streaming Gemini backend.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Configuration for a transliteration run.
///
/// # Example
/// ```rust
/// use edgequake_urdu2roman::{PageRange, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .batch_size(2)
///     .use_ocr(true)
///     .page_range(PageRange::new(3, 7))
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 2);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Work units per dispatched batch. Range: 1–10. Default: 1.
    ///
    /// A batch is sent as one request and its response is committed as one
    /// opaque segment, so larger batches trade per-unit attribution (and the
    /// cost of a failed batch) for fewer round trips.
    pub batch_size: usize,

    /// Rasterise PDF pages and let the model read them. Default: true.
    ///
    /// When false, the PDF text layer is extracted instead. Scanned PDFs have
    /// no text layer, so every page would be skipped as blank.
    pub use_ocr: bool,

    /// Restrict a paged document to an inclusive, 1-based page range.
    /// Ignored for plain text and single images.
    pub page_range: Option<PageRange>,

    /// Plain-text unit size in bytes. Default: [`TEXT_CHUNK_BYTES`].
    pub chunk_size: u64,

    /// How many recent batch results the ledger keeps for display. Default: 3.
    pub preview_capacity: usize,

    /// Pre-constructed backend. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn Transliterator>>,

    /// Backend name (`gemini`, `openai`, `anthropic`, `ollama`, …).
    /// `gemini` uses the native streaming endpoint; the rest go through
    /// `edgequake-llm`.
    pub provider_name: Option<String>,

    /// Model identifier. If None, the backend default is used.
    pub model: Option<String>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum output tokens per batch. Default: 8192.
    ///
    /// A ten-page batch of dense Urdu can exceed 4 000 output tokens; a
    /// response cut at the limit is reported as a truncated stream.
    pub max_tokens: usize,

    /// Custom system instruction. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Retries when opening a batch stream fails. Default: 0.
    ///
    /// Only the request itself is retried. Once a fragment has been yielded a
    /// failure ends the run and the batch is redispatched on the next run.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Upper bound on the wait for each response fragment. Default: None.
    pub fragment_timeout_secs: Option<u64>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Run and batch events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            use_ocr: true,
            page_range: None,
            chunk_size: TEXT_CHUNK_BYTES,
            preview_capacity: DEFAULT_PREVIEW_CAPACITY,
            provider: None,
            provider_name: None,
            model: None,
            temperature: 0.1,
            max_tokens: 8192,
            system_prompt: None,
            max_retries: 0,
            retry_backoff_ms: 500,
            fragment_timeout_secs: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("batch_size", &self.batch_size)
            .field("use_ocr", &self.use_ocr)
            .field("page_range", &self.page_range)
            .field("chunk_size", &self.chunk_size)
            .field("preview_capacity", &self.preview_capacity)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn Transliterator>"))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("fragment_timeout_secs", &self.fragment_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The mode flags persisted in a recovery snapshot.
    pub fn mode_flags(&self) -> ModeFlags {
        ModeFlags {
            use_ocr: self.use_ocr,
            page_range: self.page_range,
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn use_ocr(mut self, v: bool) -> Self {
        self.config.use_ocr = v;
        self
    }

    pub fn page_range(mut self, range: PageRange) -> Self {
        self.config.page_range = Some(range);
        self
    }

    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.config.chunk_size = bytes;
        self
    }

    pub fn preview_capacity(mut self, n: usize) -> Self {
        self.config.preview_capacity = n.max(1);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Transliterator>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn fragment_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fragment_timeout_secs = Some(secs);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, TranslitError> {
        let c = &self.config;
        if c.batch_size == 0 || c.batch_size > MAX_BATCH_SIZE {
            return Err(TranslitError::InvalidConfig(format!(
                "Batch size must be 1–{MAX_BATCH_SIZE}, got {}",
                c.batch_size
            )));
        }
        if c.chunk_size == 0 {
            return Err(TranslitError::InvalidConfig(
                "Text chunk size must be ≥ 1 byte".into(),
            ));
        }
        if let Some(range) = c.page_range {
            range.validate()?;
        }
        Ok(self.config)
    }
}

// ── Mode flags ───────────────────────────────────────────────────────────

/// Inclusive, 1-based page bounds for a paged document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u64,
    pub end: u64,
}

impl PageRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn validate(&self) -> Result<(), TranslitError> {
        if self.start < 1 {
            return Err(TranslitError::InvalidConfig(format!(
                "Pages are 1-indexed, minimum is 1 (got {})",
                self.start
            )));
        }
        if self.start > self.end {
            return Err(TranslitError::InvalidConfig(format!(
                "Invalid page range '{}-{}': start must be <= end",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Resolve against the real page count: `(initial cursor, total items)`.
    ///
    /// The cursor is the last page *before* the range and the total is the
    /// range end, both clipped to the document.
    pub fn bounds(&self, page_count: u64) -> (u64, u64) {
        let end = self.end.min(page_count);
        let cursor = (self.start - 1).min(end);
        (cursor, end)
    }
}

/// Mode flags that travel with a recovery snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeFlags {
    pub use_ocr: bool,
    pub page_range: Option<PageRange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.batch_size, 1);
        assert!(c.use_ocr);
        assert_eq!(c.chunk_size, 32768);
        assert!(c.fragment_timeout_secs.is_none());
    }

    #[test]
    fn batch_size_is_clamped() {
        let c = PipelineConfig::builder().batch_size(25).build().unwrap();
        assert_eq!(c.batch_size, MAX_BATCH_SIZE);
        let c = PipelineConfig::builder().batch_size(0).build().unwrap();
        assert_eq!(c.batch_size, 1);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = PipelineConfig::builder()
            .page_range(PageRange::new(7, 3))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("start must be <= end"));
    }

    #[test]
    fn range_bounds_clip_to_document() {
        assert_eq!(PageRange::new(3, 7).bounds(10), (2, 7));
        assert_eq!(PageRange::new(3, 70).bounds(10), (2, 10));
        assert_eq!(PageRange::new(12, 20).bounds(10), (10, 10));
    }
}
