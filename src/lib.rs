//! # pdfocr
//!
//! Turn scanned PDFs into structured, searchable text with a pluggable OCR
//! engine.
//!
//! ## Why this crate?
//!
//! Text-layer extractors (pdftotext, pdf-extract) return nothing useful for
//! scanned documents — the "text" is pixels. This crate rasterises each
//! page via pdfium, cleans the image up the way a scanning pipeline would
//! (contrast, denoise, binarise, deskew), hands it to *any* OCR engine
//! behind one trait, and normalises whatever that engine returns into a
//! single canonical region shape with confidences, bounding boxes, entity
//! extraction, and per-document summaries.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Validate  existence, magic bytes, encryption, page count
//!  ├─ 2. Render    rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Enhance   grayscale → CLAHE → denoise → binarise → open → deskew
//!  ├─ 4. Detect    one TextDetector call per page, sequential per document
//!  ├─ 5. Normalise every detector output shape → Vec<TextRegion>
//!  ├─ 6. Postprocess  clean, fix look-alikes, entities, structure, language
//!  └─ 7. Output    DocumentResult: pages + summaries + options echo
//! ```
//!
//! A page that fails any stage degrades (placeholder image, empty region
//! list, recorded [`StageError`]) instead of failing the document; the
//! document only errors when it cannot be opened at all.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfocr::{process, CommandDetector, ProcessingConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Any OCR executable works; `{}` expands to the page image path.
//!     let detector = Arc::new(CommandDetector::new("tesseract").arg("{}").arg("stdout"));
//!     let config = ProcessingConfig::default();
//!
//!     let result = process("scan.pdf", detector, &config).await?;
//!     for page in &result.pages {
//!         println!("── page {} ──\n{}", page.page_number, page.combined_text);
//!     }
//!     eprintln!(
//!         "{}/{} pages OK in {}ms",
//!         result.processing_summary.successful_pages,
//!         result.processing_summary.total_pages,
//!         result.processing_summary.duration_ms
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfocr` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdfocr = { version = "0.4", default-features = false }
//! ```
//!
//! ## Plugging in an engine
//!
//! | Engine | Wiring |
//! |--------|--------|
//! | Tesseract | `CommandDetector::new("tesseract").arg("{}").arg("stdout")` |
//! | Any CLI that prints JSON | `CommandDetector::new("my-ocr").arg("--image").arg("{}")` |
//! | In-process engine | `impl TextDetector for YourEngine` |
//!
//! Engines may return paired description/geometry lists, span triples,
//! keyed records, line arrays, or a bare string — see [`DetectorOutput`].
//! The normaliser treats them all identically.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod detector;
pub mod error;
pub mod jobs;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{dry_run, find_documents, run_batch, BatchSummary, DocumentOutcome};
pub use config::{
    ContrastMethod, DenoiseMethod, EnhancementConfig, ProcessingConfig, ProcessingConfigBuilder,
    ThresholdMethod,
};
pub use detector::{CommandDetector, DetectorOutput, Geometry, TextDetector};
pub use error::{DetectorError, PdfOcrError, StageError};
pub use jobs::{Job, JobStatus, JobTracker};
pub use output::{
    DocumentResult, DocumentSummary, EntityKind, EntityMap, LineTag, PageResult, PdfInfo,
    ProcessedPage, ProcessingOptions, ProcessingSummary, TextRegion, TextStats,
};
pub use pipeline::extract::TextExtractor;
pub use pipeline::render::{extract_info, validate, PageImage, ValidationReport};
pub use process::{process, process_from_bytes, ProcessingStage};
pub use progress::{NoopProgressCallback, ProcessingProgressCallback, ProgressCallback};
