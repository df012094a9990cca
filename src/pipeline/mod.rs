//! Pipeline stages for Urdu-to-Roman transliteration.
//!
//! Each submodule implements one step. The controller in
//! [`crate::controller`] drives them batch by batch.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ batch ──▶ extract ──▶ dispatch ──▶ postprocess
//! (path/URL) (range)  (units)     (stream)     (cleanup)
//!                       │            │
//!                    render       gemini / provider
//!                    encode
//! ```
//!
//! 1. [`input`]    resolve a path or URL and detect the document kind
//! 2. [`batch`]    compute the next range of units after the cursor
//! 3. [`extract`]  materialise each unit: a text span, a page image, or a
//!    page's text layer
//! 4. [`render`] / [`encode`]  rasterise PDF pages with pdfium in
//!    `spawn_blocking` and PNG-encode them
//! 5. [`dispatch`] send the batch and pull fragments, honouring pause/stop
//! 6. [`gemini`] / [`provider`]  the backends behind dispatch
//! 7. [`postprocess`] deterministic cleanup of each committed segment

pub mod batch;
pub mod dispatch;
pub mod encode;
pub mod extract;
pub mod gemini;
pub mod input;
pub mod postprocess;
pub mod provider;
pub mod render;
