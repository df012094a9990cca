//! Recovery snapshots: resumable progress as human-editable JSON.
//!
//! ```json
//! {
//!   "fileName": "kitaab.pdf",
//!   "fileSize": 5242880,
//!   "lastProcessedIndex": 4,
//!   "accumulatedContent": ["...", "..."],
//!   "useOCR": true,
//!   "totalItems": 7,
//!   "rangeStart": 3,
//!   "rangeEnd": 7
//! }
//! ```
//!
//! `rangeStart`, `rangeEnd` and `sourceDigest` are optional. Parsing never
//! touches live state; applying a parsed snapshot to a pipeline is done by
//! [`crate::controller::Pipeline::import_snapshot`].

use crate::config::{ModeFlags, PageRange};
use crate::error::TranslitError;
use crate::ledger::ProgressState;
use crate::source::SourceIdentity;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Serialised recovery point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySnapshot {
    pub file_name: String,
    pub file_size: u64,
    /// The cursor: positions completed.
    pub last_processed_index: u64,
    pub accumulated_content: Vec<String>,
    #[serde(rename = "useOCR", default = "default_use_ocr")]
    pub use_ocr: bool,
    pub total_items: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<u64>,
    /// Hex SHA-256 of the source, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
}

fn default_use_ocr() -> bool {
    true
}

impl RecoverySnapshot {
    pub fn capture(state: &ProgressState, identity: &SourceIdentity, flags: ModeFlags) -> Self {
        Self {
            file_name: identity.name.clone(),
            file_size: identity.size,
            last_processed_index: state.cursor,
            accumulated_content: state.accumulated.clone(),
            use_ocr: flags.use_ocr,
            total_items: state.total,
            range_start: flags.page_range.map(|r| r.start),
            range_end: flags.page_range.map(|r| r.end),
            source_digest: identity.digest.clone(),
        }
    }

    /// Mode flags recorded in the snapshot. A lone range bound is completed
    /// with page 1 or `totalItems`.
    pub fn mode_flags(&self) -> ModeFlags {
        let page_range = match (self.range_start, self.range_end) {
            (None, None) => None,
            (start, end) => Some(PageRange::new(
                start.unwrap_or(1),
                end.unwrap_or(self.total_items),
            )),
        };
        ModeFlags {
            use_ocr: self.use_ocr,
            page_range,
        }
    }

    /// Internal consistency checks that do not need the source.
    pub fn validate(&self) -> Result<(), TranslitError> {
        if self.last_processed_index > self.total_items {
            return Err(TranslitError::SnapshotInvalid {
                detail: format!(
                    "lastProcessedIndex ({}) exceeds totalItems ({})",
                    self.last_processed_index, self.total_items
                ),
            });
        }
        if let Some(range) = self.mode_flags().page_range {
            range.validate().map_err(|e| TranslitError::SnapshotInvalid {
                detail: e.to_string(),
            })?;
            if self.last_processed_index < range.start.saturating_sub(1) {
                return Err(TranslitError::SnapshotInvalid {
                    detail: format!(
                        "lastProcessedIndex ({}) lies before rangeStart ({})",
                        self.last_processed_index, range.start
                    ),
                });
            }
        }
        Ok(())
    }

    /// Check that the snapshot was taken from `identity`.
    ///
    /// Size and digest must match; a different file name only warns, since
    /// renaming a file does not change its content.
    pub fn check_identity(&self, identity: &SourceIdentity) -> Result<(), TranslitError> {
        let digest_differs = matches!(
            (&self.source_digest, &identity.digest),
            (Some(a), Some(b)) if !a.eq_ignore_ascii_case(b)
        );
        if self.file_size != identity.size || digest_differs {
            return Err(TranslitError::SnapshotMismatch {
                snapshot_name: self.file_name.clone(),
                snapshot_size: self.file_size,
                source_name: identity.name.clone(),
                source_size: identity.size,
            });
        }
        if self.file_name != identity.name {
            warn!(
                "Snapshot was taken from '{}', applying it to '{}'",
                self.file_name, identity.name
            );
        }
        Ok(())
    }
}

/// Serialise committed progress to snapshot text.
pub fn serialize(
    state: &ProgressState,
    identity: &SourceIdentity,
    flags: ModeFlags,
) -> Result<String, TranslitError> {
    serde_json::to_string_pretty(&RecoverySnapshot::capture(state, identity, flags))
        .map_err(|e| TranslitError::Internal(format!("Snapshot encoding failed: {e}")))
}

/// Parse and validate snapshot text.
pub fn deserialize(text: &str) -> Result<RecoverySnapshot, TranslitError> {
    let snapshot: RecoverySnapshot =
        serde_json::from_str(text).map_err(|e| TranslitError::SnapshotParse {
            detail: e.to_string(),
        })?;
    snapshot.validate()?;
    Ok(snapshot)
}
