//! pdfium-backed [`PageSource`]: page count, rasterisation and text layer.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and not
//! async-aware. Every call runs on the blocking pool so the controller loop
//! keeps observing pause/stop while a slow page renders.
//!
//! The document is reopened for each call. pdfium handles borrow the
//! library binding and cannot be parked across `await` points, and a page
//! render dwarfs the cost of parsing the xref table again.

use crate::error::TranslitError;
use crate::pipeline::encode;
use crate::source::PageSource;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::debug;

/// Longest edge of a rendered page in pixels.
pub const DEFAULT_MAX_RENDERED_PIXELS: u32 = 2000;

/// A PDF on disk, rendered through pdfium.
pub struct PdfiumPageSource {
    path: PathBuf,
    name: String,
    max_pixels: u32,
    page_count: OnceCell<u64>,
}

impl PdfiumPageSource {
    pub fn new(path: PathBuf, name: impl Into<String>) -> Self {
        Self {
            path,
            name: name.into(),
            max_pixels: DEFAULT_MAX_RENDERED_PIXELS,
            page_count: OnceCell::new(),
        }
    }

    /// Cap the longest edge of rendered pages.
    pub fn with_max_pixels(mut self, px: u32) -> Self {
        self.max_pixels = px.max(100);
        self
    }

    async fn blocking<T, F>(&self, what: &'static str, f: F) -> Result<T, TranslitError>
    where
        T: Send + 'static,
        F: FnOnce(&Path, &str) -> Result<T, TranslitError> + Send + 'static,
    {
        let path = self.path.clone();
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || f(&path, &name))
            .await
            .map_err(|e| TranslitError::Internal(format!("{what} task panicked: {e}")))?
    }
}

#[async_trait]
impl PageSource for PdfiumPageSource {
    async fn page_count(&self) -> Result<u64, TranslitError> {
        self.page_count
            .get_or_try_init(|| {
                self.blocking("Page count", |path, name| {
                    let pdfium = bind_pdfium()?;
                    let document = open_document(&pdfium, path, name)?;
                    Ok(document.pages().len() as u64)
                })
            })
            .await
            .copied()
    }

    async fn render_page_to_image(
        &self,
        page_index: u64,
    ) -> Result<(Vec<u8>, String), TranslitError> {
        let max_pixels = self.max_pixels;
        self.blocking("Render", move |path, name| {
            render_page_blocking(path, name, page_index, max_pixels)
        })
        .await
    }

    async fn extract_page_text(&self, page_index: u64) -> Result<String, TranslitError> {
        self.blocking("Text extraction", move |path, name| {
            let pdfium = bind_pdfium()?;
            let document = open_document(&pdfium, path, name)?;
            let page = get_page(&document, page_index).map_err(|detail| {
                TranslitError::TextExtractionFailed {
                    page: page_index + 1,
                    detail,
                }
            })?;
            let text = page
                .text()
                .map_err(|e| TranslitError::TextExtractionFailed {
                    page: page_index + 1,
                    detail: format!("{:?}", e),
                })?
                .all();
            debug!("Page {}: {} chars of text layer", page_index + 1, text.chars().count());
            Ok(text)
        })
        .await
    }
}

fn render_page_blocking(
    path: &Path,
    name: &str,
    page_index: u64,
    max_pixels: u32,
) -> Result<(Vec<u8>, String), TranslitError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, path, name)?;
    let page = get_page(&document, page_index).map_err(|detail| TranslitError::RenderFailed {
        page: page_index + 1,
        detail,
    })?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| TranslitError::RenderFailed {
            page: page_index + 1,
            detail: format!("{:?}", e),
        })?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page_index + 1,
        image.width(),
        image.height()
    );

    let png = encode::encode_png(&image).map_err(|e| TranslitError::RenderFailed {
        page: page_index + 1,
        detail: format!("PNG encoding failed: {e}"),
    })?;
    Ok((png, encode::PNG_MEDIA_TYPE.to_string()))
}

fn get_page<'a>(document: &'a PdfDocument<'_>, page_index: u64) -> Result<PdfPage<'a>, String> {
    let total = document.pages().len() as u64;
    if page_index >= total {
        return Err(format!("page index {page_index} out of range (document has {total} pages)"));
    }
    document
        .pages()
        .get(page_index as u16)
        .map_err(|e| format!("{:?}", e))
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    name: &str,
) -> Result<PdfDocument<'a>, TranslitError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| TranslitError::CorruptPdf {
            name: name.to_string(),
            detail: format!("{:?}", e),
        })
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the working directory,
/// then the system library search path.
pub fn bind_pdfium() -> Result<Pdfium, TranslitError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.is_empty() => {
            let path = PathBuf::from(&p);
            if path.is_dir() {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&path))
            } else {
                Pdfium::bind_to_library(path)
            }
        }
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| TranslitError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreadable_pdf_is_an_error() {
        let source = PdfiumPageSource::new(PathBuf::from("/nonexistent/kitaab.pdf"), "kitaab.pdf");
        for result in [
            source.extract_page_text(0).await.map(|_| ()),
            source.render_page_to_image(0).await.map(|_| ()),
        ] {
            let err = result.unwrap_err();
            assert!(
                matches!(
                    err,
                    TranslitError::PdfiumBindingFailed(_) | TranslitError::CorruptPdf { .. }
                ),
                "unexpected {err:?}"
            );
        }
    }
}
