//! Pipeline stages for PDF text extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. switch the rendering backend or the OCR
//! engine) without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ enhance ──▶ extract ──▶ postprocess
//! (path)    (pdfium)   (image ops)  (detector)   (text rules)
//! ```
//!
//! 1. [`input`]   — canonicalise the user-supplied path or byte buffer to a
//!    local PDF file, checking the `%PDF` magic
//! 2. [`render`]  — validate, read metadata, and rasterise every page to a
//!    PNG; runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`enhance`] — grayscale/contrast/denoise/binarise/deskew each page
//!    image; every stage degrades to pass-through on failure
//! 4. [`extract`] — drive the opaque detector per image and normalise its
//!    output shapes into canonical text regions; never raises
//! 5. [`postprocess`] — deterministic text-cleanup rules, entity and
//!    structure analysis, document summary

pub mod enhance;
pub mod extract;
pub mod input;
pub mod postprocess;
pub mod render;
