//! Input resolution: normalise a user-supplied path or byte buffer to a
//! local PDF file.
//!
//! ## Why spool bytes to a temp file?
//!
//! pdfium requires a file-system path — it cannot stream from a byte
//! buffer. Spooling to a `NamedTempFile` gives us a path pdfium can open
//! while ensuring cleanup happens automatically when the guard is dropped,
//! even if the process panics. We validate the PDF magic bytes (`%PDF`)
//! before handing anything to pdfium so callers get a meaningful error
//! rather than a pdfium crash.

use crate::error::PdfOcrError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// A byte buffer spooled to disk for pdfium.
///
/// The temp file lives exactly as long as this guard; keep it alive until
/// processing completes.
#[derive(Debug)]
pub struct SpooledPdf {
    path: PathBuf,
    _file: NamedTempFile,
}

impl SpooledPdf {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Validate that `path` exists, is readable, and starts with `%PDF`.
pub fn resolve_local(path: impl AsRef<Path>) -> Result<PathBuf, PdfOcrError> {
    let path = path.as_ref().to_path_buf();

    if !path.exists() {
        return Err(PdfOcrError::FileNotFound { path });
    }

    // Check read permission by attempting to open
    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            match f.read_exact(&mut magic) {
                Ok(()) if &magic == b"%PDF" => {}
                Ok(()) => return Err(PdfOcrError::NotAPdf { path, magic }),
                // Shorter than four bytes cannot be a PDF either.
                Err(_) => {
                    return Err(PdfOcrError::NotAPdf {
                        path,
                        magic: [0u8; 4],
                    })
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PdfOcrError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(PdfOcrError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

/// Spool an in-memory PDF to a temp file pdfium can open.
pub fn spool_bytes(bytes: &[u8]) -> Result<SpooledPdf, PdfOcrError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(PdfOcrError::NotAPdf {
            path: PathBuf::from("<bytes>"),
            magic,
        });
    }

    let mut file = NamedTempFile::with_suffix(".pdf")
        .map_err(|e| PdfOcrError::Internal(format!("Failed to create temp file: {e}")))?;
    file.write_all(bytes)
        .map_err(|e| PdfOcrError::Internal(format!("Failed to write temp file: {e}")))?;
    file.flush()
        .map_err(|e| PdfOcrError::Internal(format!("Failed to flush temp file: {e}")))?;

    let path = file.path().to_path_buf();
    debug!("Spooled {} bytes to {}", bytes.len(), path.display());
    Ok(SpooledPdf { path, _file: file })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let err = resolve_local("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, PdfOcrError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"Hello, world").unwrap();
        let err = resolve_local(&path).unwrap_err();
        match err {
            PdfOcrError::NotAPdf { magic, .. } => assert_eq!(&magic, b"Hell"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }

    #[test]
    fn tiny_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.pdf");
        std::fs::write(&path, b"%P").unwrap();
        assert!(matches!(
            resolve_local(&path).unwrap_err(),
            PdfOcrError::NotAPdf { .. }
        ));
    }

    #[test]
    fn pdf_magic_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.pdf");
        std::fs::write(&path, b"%PDF-1.7\n%fake body").unwrap();
        let resolved = resolve_local(&path).unwrap();
        assert_eq!(resolved, path);
    }

    #[test]
    fn spooled_bytes_live_until_guard_drops() {
        let spooled = spool_bytes(b"%PDF-1.4\nminimal").unwrap();
        let path = spooled.path().to_path_buf();
        assert!(path.exists());
        drop(spooled);
        assert!(!path.exists());
    }

    #[test]
    fn spooling_non_pdf_bytes_fails() {
        let err = spool_bytes(b"GIF89a").unwrap_err();
        assert!(matches!(err, PdfOcrError::NotAPdf { .. }));
    }
}
