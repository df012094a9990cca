//! Source documents: identity, kind, and the paged-document capability.
//!
//! A [`SourceDocument`] is immutable once loaded. It knows what kind of input
//! it is and how to count its work units; materialising individual units is
//! the job of [`crate::pipeline::extract`].
//!
//! Paged documents are accessed through the [`PageSource`] trait so the
//! pipeline never depends on a particular renderer. The pdfium-backed
//! implementation lives in [`crate::pipeline::render`].

use crate::error::TranslitError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// What kind of document a source is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    /// UTF-8 text, addressed by byte offset.
    PlainText,
    /// Paged document (PDF), addressed by page.
    Paged,
    /// A single image; the whole file is one unit.
    Image,
}

/// Identity of a source document, as recorded in recovery snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIdentity {
    /// File name (without directories).
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the content, when the bytes were available at load time.
    pub digest: Option<String>,
}

impl SourceIdentity {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            digest: None,
        }
    }

    /// Attach a content digest computed from `bytes`.
    pub fn with_digest_of(mut self, bytes: &[u8]) -> Self {
        self.digest = Some(hex::encode(Sha256::digest(bytes)));
        self
    }
}

/// Paged-document capability: page count, rasterisation and text layer.
///
/// Page indices are 0-based.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Number of pages. Implementations may discover this lazily.
    async fn page_count(&self) -> Result<u64, TranslitError>;

    /// Rasterise one page. Returns encoded image bytes and their media type.
    async fn render_page_to_image(&self, page_index: u64)
        -> Result<(Vec<u8>, String), TranslitError>;

    /// Extract the text layer of one page.
    async fn extract_page_text(&self, page_index: u64) -> Result<String, TranslitError>;
}

/// Where the bytes of a plain-text source live.
#[derive(Clone)]
pub enum TextStore {
    /// Read spans on demand from a file, keeping memory bounded.
    File(PathBuf),
    /// Already in memory.
    Memory(Arc<[u8]>),
}

/// Kind-specific content handle.
#[derive(Clone)]
pub enum SourceContent {
    PlainText(TextStore),
    Paged(Arc<dyn PageSource>),
    Image { bytes: Arc<[u8]>, media_type: String },
}

/// A loaded input document.
#[derive(Clone)]
pub struct SourceDocument {
    identity: SourceIdentity,
    content: SourceContent,
}

impl fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDocument")
            .field("identity", &self.identity)
            .field("kind", &self.kind())
            .finish()
    }
}

impl SourceDocument {
    /// Plain text held in memory.
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text: String = text.into();
        let bytes: Arc<[u8]> = Arc::from(text.into_bytes());
        let identity = SourceIdentity::new(name, bytes.len() as u64).with_digest_of(&bytes);
        Self {
            identity,
            content: SourceContent::PlainText(TextStore::Memory(bytes)),
        }
    }

    /// Plain text read span-by-span from a file on disk.
    pub fn from_text_file(identity: SourceIdentity, path: PathBuf) -> Self {
        Self {
            identity,
            content: SourceContent::PlainText(TextStore::File(path)),
        }
    }

    /// A single image file.
    pub fn from_image(
        name: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
        media_type: impl Into<String>,
    ) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        let identity = SourceIdentity::new(name, bytes.len() as u64).with_digest_of(&bytes);
        Self {
            identity,
            content: SourceContent::Image {
                bytes,
                media_type: media_type.into(),
            },
        }
    }

    /// A paged document backed by any [`PageSource`].
    pub fn from_pages(identity: SourceIdentity, pages: Arc<dyn PageSource>) -> Self {
        Self {
            identity,
            content: SourceContent::Paged(pages),
        }
    }

    pub fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    pub fn content(&self) -> &SourceContent {
        &self.content
    }

    pub fn kind(&self) -> DocumentKind {
        match self.content {
            SourceContent::PlainText(_) => DocumentKind::PlainText,
            SourceContent::Paged(_) => DocumentKind::Paged,
            SourceContent::Image { .. } => DocumentKind::Image,
        }
    }

    /// Total addressable positions: bytes for text, pages for paged
    /// documents, 1 for an image. For paged documents this asks the
    /// [`PageSource`], which may open the file on first access.
    pub async fn unit_count(&self) -> Result<u64, TranslitError> {
        match &self.content {
            SourceContent::PlainText(_) => Ok(self.identity.size),
            SourceContent::Paged(pages) => pages.page_count().await,
            SourceContent::Image { .. } => Ok(1),
        }
    }
}

// ── Kind detection ───────────────────────────────────────────────────────

/// Detect the document kind from leading bytes and the file name.
///
/// Returns the kind and, for images, the media type. Binary content that is
/// neither a PDF nor a known image is rejected.
pub fn detect_kind(
    name: &str,
    head: &[u8],
) -> Result<(DocumentKind, Option<&'static str>), TranslitError> {
    if head.starts_with(b"%PDF") {
        return Ok((DocumentKind::Paged, None));
    }
    if let Some(media_type) = image_media_type(head) {
        return Ok((DocumentKind::Image, Some(media_type)));
    }

    let lower = name.to_ascii_lowercase();
    let text_ext = [".txt", ".text", ".md", ".markdown"]
        .iter()
        .any(|ext| lower.ends_with(ext));
    let looks_textual = !head.contains(&0) && std::str::from_utf8(trim_partial_char(head)).is_ok();

    if looks_textual || (text_ext && !head.contains(&0)) {
        return Ok((DocumentKind::PlainText, None));
    }

    Err(TranslitError::UnsupportedInput {
        name: name.to_string(),
        reason: "content is neither UTF-8 text, a PDF, nor a supported image".into(),
    })
}

fn image_media_type(head: &[u8]) -> Option<&'static str> {
    if head.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Drop an incomplete trailing UTF-8 sequence so a sniffed prefix that
/// ends mid-character still validates.
fn trim_partial_char(head: &[u8]) -> &[u8] {
    match std::str::from_utf8(head) {
        Ok(_) => head,
        Err(e) if e.error_len().is_none() => &head[..e.valid_up_to()],
        Err(_) => head,
    }
}
