//! Unit extraction: materialise one addressable work unit from a source.
//!
//! | Source     | Unit index            | Payload                           |
//! |------------|-----------------------|-----------------------------------|
//! | plain text | byte offset           | text span of `chunk_size` bytes   |
//! | paged, OCR | 0-based page index    | rendered page image               |
//! | paged, text| 0-based page index    | page text layer                   |
//! | image      | 0 (only unit)         | the file's bytes                  |
//!
//! Blank text yields `Ok(None)`: the controller advances past it without
//! dispatching. Failures are errors of kind
//! [`crate::error::ErrorKind::Extraction`] and end the run.

use crate::error::TranslitError;
use crate::source::{SourceContent, SourceDocument, TextStore};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Longest UTF-8 encoding of a character, in bytes.
const MAX_UTF8_LEN: u64 = 4;

/// Payload of a work unit. Every backend matches on this exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitPayload {
    Text(String),
    Image { data: Arc<[u8]>, media_type: String },
}

/// One materialised work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Byte offset (text), 0-based page index (paged) or 0 (image).
    pub index: u64,
    pub payload: UnitPayload,
}

impl WorkUnit {
    /// Short human-readable form of the unit for live display.
    ///
    /// Display only: the full payload is what gets dispatched.
    pub fn preview(&self, max_chars: usize) -> String {
        match &self.payload {
            UnitPayload::Text(text) => {
                let mut preview: String = text.chars().take(max_chars).collect();
                if text.chars().nth(max_chars).is_some() {
                    preview.push('…');
                }
                preview
            }
            UnitPayload::Image { data, media_type } => {
                format!("[{} image, {} bytes]", media_type, data.len())
            }
        }
    }
}

/// Materialises work units for one source under fixed mode settings.
#[derive(Debug, Clone, Copy)]
pub struct UnitExtractor {
    chunk_size: u64,
    use_ocr: bool,
}

impl UnitExtractor {
    pub fn new(chunk_size: u64, use_ocr: bool) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            use_ocr,
        }
    }

    /// Distance between consecutive unit indices for this source.
    pub fn stride(&self, source: &SourceDocument) -> u64 {
        match source.content() {
            SourceContent::PlainText(_) => self.chunk_size,
            SourceContent::Paged(_) | SourceContent::Image { .. } => 1,
        }
    }

    /// Produce the unit at `index`, or `None` when it is blank.
    pub async fn materialize(
        &self,
        source: &SourceDocument,
        index: u64,
    ) -> Result<Option<WorkUnit>, TranslitError> {
        let payload = match source.content() {
            SourceContent::PlainText(store) => {
                let total = source.identity().size;
                if index >= total {
                    return Err(TranslitError::UnitOutOfRange { index, total });
                }
                let text = read_text_span(store, index, self.chunk_size, total).await?;
                non_blank(text)
            }
            SourceContent::Paged(pages) if self.use_ocr => {
                let (data, media_type) = pages.render_page_to_image(index).await?;
                Some(UnitPayload::Image {
                    data: data.into(),
                    media_type,
                })
            }
            SourceContent::Paged(pages) => non_blank(pages.extract_page_text(index).await?),
            SourceContent::Image { bytes, media_type } => {
                if index != 0 {
                    return Err(TranslitError::UnitOutOfRange { index, total: 1 });
                }
                Some(UnitPayload::Image {
                    data: Arc::clone(bytes),
                    media_type: media_type.clone(),
                })
            }
        };

        if payload.is_none() {
            debug!("Unit {} is blank", index);
        }
        Ok(payload.map(|payload| WorkUnit { index, payload }))
    }
}

fn non_blank(text: String) -> Option<UnitPayload> {
    if text.trim().is_empty() {
        None
    } else {
        Some(UnitPayload::Text(text))
    }
}

// ── Text spans ───────────────────────────────────────────────────────────

/// Read the text unit `[offset, offset + len)` of a UTF-8 source.
///
/// Units are addressed by raw byte offsets, so a boundary can fall inside a
/// multi-byte character. A character belongs to the unit containing its
/// first byte: leading continuation bytes are skipped and a character that
/// starts before the nominal end is completed. Every character is therefore
/// emitted by exactly one unit.
async fn read_text_span(
    store: &TextStore,
    offset: u64,
    len: u64,
    total: u64,
) -> Result<String, TranslitError> {
    let nominal_end = offset.saturating_add(len).min(total);
    let window_end = nominal_end.saturating_add(MAX_UTF8_LEN - 1).min(total);

    let window: Vec<u8> = match store {
        TextStore::Memory(bytes) => bytes[offset as usize..window_end as usize].to_vec(),
        TextStore::File(path) => {
            let path = path.clone();
            tokio::task::spawn_blocking(move || read_window(&path, offset, window_end - offset))
                .await
                .map_err(|e| TranslitError::Internal(format!("Read task panicked: {e}")))?
                .map_err(|e| TranslitError::TextReadFailed {
                    offset,
                    detail: e.to_string(),
                })?
        }
    };

    let nominal_len = (nominal_end - offset) as usize;
    Ok(decode_span(&window, nominal_len))
}

fn read_window(path: &Path, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len as usize);
    file.take(len).read_to_end(&mut buf)?;
    Ok(buf)
}

fn is_continuation(b: u8) -> bool {
    b & 0xC0 == 0x80
}

/// Decode `window[..nominal_len]` adjusted to character boundaries.
fn decode_span(window: &[u8], nominal_len: usize) -> String {
    let nominal_len = nominal_len.min(window.len());

    let mut start = 0;
    while start < nominal_len && start < 3 && is_continuation(window[start]) {
        start += 1;
    }

    let mut end = nominal_len;
    while end < window.len() && is_continuation(window[end]) {
        end += 1;
    }

    if start >= end {
        return String::new();
    }
    String::from_utf8_lossy(&window[start..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{PageSource, SourceIdentity};
    use async_trait::async_trait;
    use std::io::Write;

    struct TwoPages;

    #[async_trait]
    impl PageSource for TwoPages {
        async fn page_count(&self) -> Result<u64, TranslitError> {
            Ok(2)
        }

        async fn render_page_to_image(
            &self,
            page_index: u64,
        ) -> Result<(Vec<u8>, String), TranslitError> {
            if page_index == 1 {
                return Err(TranslitError::RenderFailed {
                    page: 2,
                    detail: "broken content stream".into(),
                });
            }
            Ok((vec![1, 2, 3], "image/png".into()))
        }

        async fn extract_page_text(&self, page_index: u64) -> Result<String, TranslitError> {
            Ok(if page_index == 0 { "سلام".into() } else { "  \n ".into() })
        }
    }

    fn paged() -> SourceDocument {
        SourceDocument::from_pages(SourceIdentity::new("book.pdf", 1234), Arc::new(TwoPages))
    }

    #[test]
    fn span_boundaries_never_split_characters() {
        // "ab" + 'ا' (2 bytes) + "c"
        let text = "abاc";
        let bytes = text.as_bytes();
        // unit [0, 3) ends inside 'ا' and completes it
        assert_eq!(decode_span(&bytes[0..], 3), "abا");
        // unit [3, 5) starts on its continuation byte and skips it
        assert_eq!(decode_span(&bytes[3..], 2), "c");
    }

    #[test]
    fn chunks_reassemble_exactly() {
        let text = "یہ ایک طویل جملہ ہے جو کئی حصوں میں تقسیم ہوگا";
        let doc = SourceDocument::from_text("t.txt", text);
        let extractor = UnitExtractor::new(5, true);
        let total = doc.identity().size;
        let mut rebuilt = String::new();
        let mut offset = 0;
        while offset < total {
            if let Some(unit) = tokio_test::block_on(extractor.materialize(&doc, offset)).unwrap() {
                match unit.payload {
                    UnitPayload::Text(t) => rebuilt.push_str(&t),
                    UnitPayload::Image { .. } => panic!("text source yielded an image"),
                }
            }
            offset += 5;
        }
        // blank units (a lone space) are dropped, everything else survives in order
        assert_eq!(rebuilt.replace(' ', ""), text.replace(' ', ""));
    }

    #[test]
    fn blank_text_is_empty_unit() {
        let doc = SourceDocument::from_text("t.txt", "   \n\t  ");
        let unit = tokio_test::block_on(UnitExtractor::new(32, true).materialize(&doc, 0)).unwrap();
        assert!(unit.is_none());
    }

    #[test]
    fn offset_past_end_is_out_of_range() {
        let doc = SourceDocument::from_text("t.txt", "abc");
        let err = tokio_test::block_on(UnitExtractor::new(32, true).materialize(&doc, 3)).unwrap_err();
        assert!(matches!(err, TranslitError::UnitOutOfRange { index: 3, total: 3 }));
    }

    #[tokio::test]
    async fn reads_spans_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let doc = SourceDocument::from_text_file(
            SourceIdentity::new("digits.txt", 10),
            tmp.path().to_path_buf(),
        );
        let extractor = UnitExtractor::new(4, true);
        let unit = extractor.materialize(&doc, 8).await.unwrap().unwrap();
        assert_eq!(unit.payload, UnitPayload::Text("89".into()));
        assert_eq!(extractor.stride(&doc), 4);
    }

    #[tokio::test]
    async fn paged_modes() {
        let doc = paged();
        let ocr = UnitExtractor::new(32, true);
        let unit = ocr.materialize(&doc, 0).await.unwrap().unwrap();
        assert!(matches!(unit.payload, UnitPayload::Image { ref media_type, .. } if media_type == "image/png"));

        let err = ocr.materialize(&doc, 1).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Extraction);

        let text = UnitExtractor::new(32, false);
        assert_eq!(
            text.materialize(&doc, 0).await.unwrap().unwrap().payload,
            UnitPayload::Text("سلام".into())
        );
        assert!(text.materialize(&doc, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn image_is_single_unit() {
        let doc = SourceDocument::from_image("scan.jpg", vec![0xFF, 0xD8, 0xFF], "image/jpeg");
        let extractor = UnitExtractor::new(32, false);
        assert!(extractor.materialize(&doc, 0).await.unwrap().is_some());
        assert!(extractor.materialize(&doc, 1).await.is_err());
        assert_eq!(extractor.stride(&doc), 1);
    }

    #[test]
    fn preview_truncates_text_only_for_display() {
        let unit = WorkUnit {
            index: 0,
            payload: UnitPayload::Text("abcdef".into()),
        };
        assert_eq!(unit.preview(3), "abc…");
        assert_eq!(unit.preview(10), "abcdef");
    }
}
