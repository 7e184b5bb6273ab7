//! Result types produced by the pipeline.
//!
//! The shapes here are the library's public contract: everything is
//! `serde`-serializable so callers (the CLI, a web layer, an exporter) can
//! persist results however they like. The library itself never writes JSON
//! except in the feature-gated binary.
//!
//! Hierarchy:
//!
//! ```text
//! DocumentResult
//! ├── PdfInfo                  document metadata + byte size
//! ├── Vec<PageResult>          one per page, ascending page_number
//! │   ├── Vec<TextRegion>      canonical OCR regions, detector order
//! │   ├── Vec<StageError>      degradations recorded for the page
//! │   └── Option<ProcessedPage>  cleaned text, entities, structure
//! ├── ProcessingSummary        success rate, totals, timings
//! ├── Option<DocumentSummary>  aggregates across processed pages
//! └── ProcessingOptions        echo of the options the run used
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EnhancementConfig;
use crate::error::{PdfOcrError, StageError};

// ── Regions ───────────────────────────────────────────────────────────────

/// One canonical text region recognised on a page image.
///
/// `id` is the region's order within its page (restarting at zero per
/// image), not a global identifier. `bbox` is `[min_x, min_y, max_x,
/// max_y]`; `[0.0; 4]` means the detector carried no geometry. Regions are
/// immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRegion {
    pub id: usize,
    pub text: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
    pub source_image: PathBuf,
    pub extracted_at: DateTime<Utc>,
}

impl TextRegion {
    pub fn new(
        id: usize,
        text: impl Into<String>,
        confidence: f32,
        bbox: [f32; 4],
        source_image: impl Into<PathBuf>,
    ) -> Self {
        TextRegion {
            id,
            text: text.into(),
            confidence,
            bbox,
            source_image: source_image.into(),
            extracted_at: Utc::now(),
        }
    }
}

// ── Pages ─────────────────────────────────────────────────────────────────

/// OCR outcome for a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-based page number; results are always sorted ascending by this.
    pub page_number: usize,
    /// Regions in detector emission order.
    pub text_regions: Vec<TextRegion>,
    /// Region texts joined by line breaks, blank entries skipped.
    pub combined_text: String,
    /// Number of regions on the page.
    pub text_count: usize,
    /// True iff the page produced at least one non-empty region.
    pub extraction_success: bool,
    /// Per-stage degradations recorded while producing this page.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<StageError>,
    /// Postprocessing results; `None` when postprocessing is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<ProcessedPage>,
}

impl PageResult {
    /// Assemble a page result from normalised regions, deriving the
    /// combined text and the success flag.
    pub fn from_regions(
        page_number: usize,
        text_regions: Vec<TextRegion>,
        degradations: Vec<StageError>,
    ) -> Self {
        let combined_text = text_regions
            .iter()
            .map(|r| r.text.as_str())
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let text_count = text_regions.len();
        let extraction_success = !combined_text.is_empty();
        PageResult {
            page_number,
            text_regions,
            combined_text,
            text_count,
            extraction_success,
            degradations,
            processed: None,
        }
    }

    /// An empty page (placeholder raster, failed detection, blank page).
    pub fn empty(page_number: usize, degradations: Vec<StageError>) -> Self {
        PageResult::from_regions(page_number, Vec::new(), degradations)
    }
}

// ── Postprocessing ────────────────────────────────────────────────────────

/// Entity categories recognised by the postprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Email,
    Phone,
    Date,
    Url,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Email => "email",
            EntityKind::Phone => "phone",
            EntityKind::Date => "date",
            EntityKind::Url => "url",
        };
        f.write_str(s)
    }
}

/// Deduplicated entities, keyed by kind. `BTreeMap`/`BTreeSet` keep the
/// serialised form deterministic.
pub type EntityMap = BTreeMap<EntityKind, BTreeSet<String>>;

/// Structural classification of one text line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineTag {
    Heading,
    Paragraph,
    ListItem,
    TableRow,
}

impl std::fmt::Display for LineTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LineTag::Heading => "heading",
            LineTag::Paragraph => "paragraph",
            LineTag::ListItem => "list-item",
            LineTag::TableRow => "table-row",
        };
        f.write_str(s)
    }
}

/// Simple size metrics for a page's corrected text.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TextStats {
    pub characters: usize,
    pub words: usize,
    pub lines: usize,
}

/// A page's text after cleaning, correction, and analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedPage {
    pub page_number: usize,
    pub cleaned_text: String,
    pub corrected_text: String,
    pub entities: EntityMap,
    /// One tag per non-empty line of the corrected text, in order.
    pub structure: Vec<LineTag>,
    /// Lowercase language label, `"mixed"` or `"unknown"` when unclear.
    pub language: String,
    pub stats: TextStats,
}

/// Aggregates across all processed pages of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub total_characters: usize,
    pub total_words: usize,
    pub average_characters_per_page: f64,
    pub average_words_per_page: f64,
    /// Language label → number of pages classified under it.
    pub language_distribution: BTreeMap<String, usize>,
    /// Entity sets merged across pages, still deduplicated per kind.
    pub entities: EntityMap,
}

// ── Document metadata ─────────────────────────────────────────────────────

/// Document-level facts established before rasterisation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PdfInfo {
    pub path: PathBuf,
    pub page_count: usize,
    pub file_size: u64,
    pub encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<String>,
}

// ── Run summaries ─────────────────────────────────────────────────────────

/// Outcome accounting for one document run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub total_pages: usize,
    /// Pages with `extraction_success == true`.
    pub successful_pages: usize,
    /// `successful / total * 100`, rounded to two decimals; 0 for an
    /// empty document (which validation rejects anyway).
    pub success_rate: f64,
    pub total_characters: usize,
    pub duration_ms: u64,
    pub rasterize_ms: u64,
    pub extract_ms: u64,
}

impl ProcessingSummary {
    pub fn from_pages(
        pages: &[PageResult],
        duration_ms: u64,
        rasterize_ms: u64,
        extract_ms: u64,
    ) -> Self {
        let total_pages = pages.len();
        let successful_pages = pages.iter().filter(|p| p.extraction_success).count();
        let success_rate = if total_pages == 0 {
            0.0
        } else {
            round2(successful_pages as f64 / total_pages as f64 * 100.0)
        };
        let total_characters = pages.iter().map(|p| p.combined_text.chars().count()).sum();
        ProcessingSummary {
            total_pages,
            successful_pages,
            success_rate,
            total_characters,
            duration_ms,
            rasterize_ms,
            extract_ms,
        }
    }
}

/// Echo of the options a run actually used, for reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOptions {
    pub dpi: u32,
    pub preprocess: bool,
    pub postprocess: bool,
    pub confidence_threshold: f32,
    pub worker_count: usize,
    pub keep_images: bool,
    pub enhancement: EnhancementConfig,
}

/// Everything the pipeline knows about one document after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    pub pdf_info: PdfInfo,
    pub pages: Vec<PageResult>,
    pub processing_summary: ProcessingSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_summary: Option<DocumentSummary>,
    pub processing_options: ProcessingOptions,
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Serialise `value` as pretty JSON to `path`, atomically.
///
/// The bytes land in a temp file beside the target and are renamed into
/// place, so a concurrent reader never observes a half-written result.
pub fn write_json<T: Serialize>(value: &T, path: &std::path::Path) -> Result<(), PdfOcrError> {
    use std::io::Write;

    let wrap = |source: std::io::Error| PdfOcrError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => tempfile::NamedTempFile::new_in(dir),
        None => tempfile::NamedTempFile::new(),
    }
    .map_err(wrap)?;

    serde_json::to_writer_pretty(&mut tmp, value).map_err(|e| wrap(e.into()))?;
    tmp.write_all(b"\n").map_err(wrap)?;
    tmp.persist(path).map_err(|e| wrap(e.error))?;
    Ok(())
}
