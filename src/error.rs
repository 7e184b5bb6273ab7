//! Error types for the pdfocr library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PdfOcrError`] — **Fatal**: the run cannot proceed at all (missing
//!   file, corrupt or encrypted PDF, bad configuration). Returned as
//!   `Err(PdfOcrError)` from the top-level `process*` functions.
//!
//! * [`StageError`] — **Degraded**: a single page lost one pipeline stage
//!   (render glitch, enhancement failure, detector hiccup) but the page
//!   still appears in the output, possibly with empty regions. Stored
//!   inside [`crate::output::PageResult`] so callers can inspect partial
//!   success rather than losing the whole document to one bad page.
//!
//! The separation keeps the continue-on-failure policy visible in
//! signatures: only validation and whole-document open failures abort;
//! everything downstream degrades and is recorded.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdfocr library.
///
/// Page-level degradations use [`StageError`] and are stored in
/// [`crate::output::PageResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PdfOcrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Batch discovery was pointed at a path that is not a directory.
    #[error("Not a directory: '{path}'\nPass a folder containing PDF files.")]
    NotADirectory { path: PathBuf },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The document opened cleanly but contains no pages.
    #[error("PDF '{path}' has zero pages; nothing to process")]
    EmptyDocument { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create the working directory for rendered page images.
    #[error("Failed to create image directory '{path}': {source}")]
    ImageDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Rasterisation needs the pdfium shared library at runtime.\n\
  • Install libpdfium for your platform (package or prebuilt release), or\n\
  • Place libpdfium on the loader search path (e.g. LD_LIBRARY_PATH).\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A degraded (non-fatal) outcome for one stage of one page.
///
/// Stored in [`crate::output::PageResult::degradations`] when a stage of
/// that page falls back to a placeholder or pass-through. The run
/// continues; the page participates with whatever quality survived.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    /// Page rasterisation failed; a blank placeholder image was substituted.
    #[error("Page {page}: rasterisation failed: {detail}")]
    Rasterize { page: usize, detail: String },

    /// One enhancement stage failed; the image passed through unmodified.
    #[error("Page {page}: enhancement stage '{stage}' failed: {detail}")]
    Enhance {
        page: usize,
        stage: String,
        detail: String,
    },

    /// The detector failed on this page; the region list is empty.
    #[error("Page {page}: text detection failed: {detail}")]
    Detect { page: usize, detail: String },
}

impl StageError {
    /// Page number the degradation belongs to (1-based).
    pub fn page(&self) -> usize {
        match self {
            StageError::Rasterize { page, .. }
            | StageError::Enhance { page, .. }
            | StageError::Detect { page, .. } => *page,
        }
    }
}

/// Error raised by a [`crate::detector::TextDetector`] implementation.
///
/// Detectors are opaque; a single message string is all the pipeline needs
/// to log the failure and degrade the page to an empty region list.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DetectorError(pub String);

impl DetectorError {
    pub fn new(message: impl Into<String>) -> Self {
        DetectorError(message.into())
    }
}

impl From<std::io::Error> for DetectorError {
    fn from(e: std::io::Error) -> Self {
        DetectorError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_a_pdf_display_shows_magic() {
        let e = PdfOcrError::NotAPdf {
            path: PathBuf::from("notes.txt"),
            magic: *b"Hell",
        };
        let msg = e.to_string();
        assert!(msg.contains("notes.txt"), "got: {msg}");
        assert!(msg.contains("72"), "magic bytes missing: {msg}");
    }

    #[test]
    fn empty_document_display() {
        let e = PdfOcrError::EmptyDocument {
            path: PathBuf::from("blank.pdf"),
        };
        assert!(e.to_string().contains("zero pages"));
    }

    #[test]
    fn stage_error_reports_its_page() {
        let e = StageError::Enhance {
            page: 4,
            stage: "deskew".into(),
            detail: "no foreground pixels".into(),
        };
        assert_eq!(e.page(), 4);
        assert!(e.to_string().contains("deskew"));
    }

    #[test]
    fn stage_error_round_trips_through_json() {
        let e = StageError::Rasterize {
            page: 2,
            detail: "bitmap allocation failed".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: StageError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.page(), 2);
    }

    #[test]
    fn detector_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: DetectorError = io.into();
        assert!(e.to_string().contains("gone"));
    }
}
