//! Final output artifact: committed segments as plain text.

use crate::error::TranslitError;
use std::path::Path;

/// Separator between committed batch results.
pub const SEGMENT_SEPARATOR: &str = "\n\n";

/// Join committed segments in order, dropping empty ones.
pub fn assemble_output(segments: &[String]) -> String {
    segments
        .iter()
        .map(|s| s.trim_end())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(SEGMENT_SEPARATOR)
}

/// Write `text` to `path` atomically (temp file + rename), creating parent
/// directories as needed.
pub async fn write_output(path: &Path, text: &str) -> Result<(), TranslitError> {
    let failed = |source| TranslitError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, text).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_joined_by_blank_line() {
        let segments = vec!["Pehla hissa\n".to_string(), String::new(), "Doosra hissa".to_string()];
        assert_eq!(assemble_output(&segments), "Pehla hissa\n\nDoosra hissa");
        assert_eq!(assemble_output(&[]), "");
    }

    #[tokio::test]
    async fn writes_atomically_into_new_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/kitaab.txt");
        write_output(&path, "Roman Urdu").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Roman Urdu");
        assert!(!path.with_file_name("kitaab.txt.tmp").exists());
    }
}
