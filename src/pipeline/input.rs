//! Input resolution: turn a user-supplied path or URL into a [`SourceDocument`].
//!
//! URLs are downloaded into a `TempDir` that lives inside the returned
//! [`LoadedSource`]; paged and text sources read from that path lazily, so
//! the directory must outlive every run over the document.

use crate::error::TranslitError;
use crate::pipeline::render::PdfiumPageSource;
use crate::source::{detect_kind, DocumentKind, SourceDocument, SourceIdentity};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

/// Bytes sniffed from the start of a file for kind detection.
const SNIFF_LEN: usize = 512;

/// The resolved input: either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the file was downloaded to a temp directory.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// A source document together with whatever keeps its backing file alive.
pub struct LoadedSource {
    document: SourceDocument,
    _input: ResolvedInput,
}

impl LoadedSource {
    pub fn document(&self) -> &SourceDocument {
        &self.document
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve and load an input into a [`LoadedSource`].
///
/// Unsupported inputs are rejected here, before any run starts.
pub async fn open_source(input: &str, timeout_secs: u64) -> Result<LoadedSource, TranslitError> {
    let resolved = resolve_input(input, timeout_secs).await?;
    let document = load_document(resolved.path()).await?;
    info!(
        "Loaded {:?} source '{}' ({} bytes)",
        document.kind(),
        document.identity().name,
        document.identity().size
    );
    Ok(LoadedSource {
        document,
        _input: resolved,
    })
}

/// Resolve the input string to a local file path.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, TranslitError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if input.trim().is_empty() {
        Err(TranslitError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        resolve_local(input)
    }
}

/// Build a [`SourceDocument`] for a local file, detecting its kind.
pub async fn load_document(path: &Path) -> Result<SourceDocument, TranslitError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || load_document_blocking(&owned))
        .await
        .map_err(|e| TranslitError::Internal(format!("Load task panicked: {}", e)))?
}

fn load_document_blocking(path: &Path) -> Result<SourceDocument, TranslitError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let mut file = open_readable(path)?;
    let size = file
        .metadata()
        .map_err(|e| read_failed(path, e))?
        .len();

    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut file)
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .map_err(|e| read_failed(path, e))?;

    if head.is_empty() {
        return Err(TranslitError::UnsupportedInput {
            name,
            reason: "file is empty".into(),
        });
    }

    let (kind, media_type) = detect_kind(&name, &head)?;
    debug!("Detected {:?} for {}", kind, path.display());

    match kind {
        DocumentKind::PlainText => {
            let digest = digest_file(path)?;
            let identity = SourceIdentity {
                name,
                size,
                digest: Some(digest),
            };
            Ok(SourceDocument::from_text_file(identity, path.to_path_buf()))
        }
        DocumentKind::Paged => {
            let digest = digest_file(path)?;
            let identity = SourceIdentity {
                name: name.clone(),
                size,
                digest: Some(digest),
            };
            let pages = PdfiumPageSource::new(path.to_path_buf(), name);
            Ok(SourceDocument::from_pages(identity, Arc::new(pages)))
        }
        DocumentKind::Image => {
            let bytes = std::fs::read(path).map_err(|e| read_failed(path, e))?;
            let media_type = media_type.unwrap_or("application/octet-stream");
            Ok(SourceDocument::from_image(name, bytes, media_type))
        }
    }
}

/// Stream a file through SHA-256 without holding it in memory.
fn digest_file(path: &Path) -> Result<String, TranslitError> {
    let mut file = open_readable(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| read_failed(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn open_readable(path: &Path) -> Result<std::fs::File, TranslitError> {
    std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => TranslitError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => TranslitError::FileNotFound {
            path: path.to_path_buf(),
        },
    })
}

fn read_failed(path: &Path, e: std::io::Error) -> TranslitError {
    TranslitError::UnsupportedInput {
        name: path.display().to_string(),
        reason: format!("read failed: {e}"),
    }
}

/// Resolve a local file path, validating existence.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, TranslitError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(TranslitError::FileNotFound { path });
    }
    if !path.is_file() {
        return Err(TranslitError::UnsupportedInput {
            name: path_str.to_string(),
            reason: "not a regular file".into(),
        });
    }

    debug!("Resolved local input: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, TranslitError> {
    info!("Downloading input from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| TranslitError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            TranslitError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            TranslitError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(TranslitError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = extract_filename(url);
    let temp_dir = TempDir::new().map_err(|e| TranslitError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| TranslitError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| TranslitError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Take the last path segment of the URL as the file name.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/kitaab.pdf"));
        assert!(is_url("http://example.com/kitaab.txt"));
        assert!(!is_url("/tmp/kitaab.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn test_extract_filename() {
        assert_eq!(extract_filename("https://example.com/a/b/ghazal.txt"), "ghazal.txt");
        assert_eq!(extract_filename("https://example.com/"), "downloaded");
    }

    #[tokio::test]
    async fn loads_text_file_with_identity() {
        let mut tmp = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        tmp.write_all("یہ ایک جملہ ہے".as_bytes()).unwrap();
        let doc = load_document(tmp.path()).await.unwrap();
        assert_eq!(doc.kind(), DocumentKind::PlainText);
        assert_eq!(doc.identity().size, "یہ ایک جملہ ہے".len() as u64);
        assert!(doc.identity().digest.is_some());
    }

    #[tokio::test]
    async fn empty_file_is_unsupported() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let err = load_document(tmp.path()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedInput);
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/definitely/not/here.txt", 5).await.err().unwrap();
        assert!(matches!(err, TranslitError::FileNotFound { .. }));
    }
}
