//! Eager (full-document) OCR entry points.
//!
//! [`process`] drives one PDF through the whole pipeline and returns a
//! [`DocumentResult`] once every page has been attempted:
//!
//! ```text
//! validate ─► metadata ─► rasterise ─► enhance ─► extract ─► postprocess
//!    5%         10%        20→50%      50→70%     70→90%        90%
//! ```
//!
//! ## Why do pages run sequentially?
//!
//! The detector is a single shared resource and engines are not assumed to
//! tolerate concurrent invocation, so pages of one document always run in
//! order on the blocking pool. Parallelism pays across documents instead —
//! see [`crate::batch`].
//!
//! ## Fatal vs. degraded
//!
//! Only the head of the pipeline can fail the run: a missing or corrupt
//! file, a wrong password, an unopenable document, a zero-page document.
//! Once rasterisation has produced the page sequence, every later failure
//! degrades to a placeholder, pass-through, or empty page recorded in
//! [`PageResult::degradations`], and the run completes. That is why
//! [`ProcessingStage::Errored`] is only ever observed from the validating
//! or rasterising stages.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::{EnhancementConfig, ProcessingConfig};
use crate::detector::TextDetector;
use crate::error::{PdfOcrError, StageError};
use crate::output::{DocumentResult, PageResult, ProcessedPage, ProcessingSummary, TextRegion};
use crate::pipeline::render::RenderProgress;
use crate::pipeline::{enhance, extract::TextExtractor, input, postprocess, render};
use crate::progress::{NoopProgressCallback, ProcessingProgressCallback, ProgressCallback};

// ── Stages ────────────────────────────────────────────────────────────────

/// Pipeline stages as reported through
/// [`ProcessingProgressCallback::on_stage_change`] and job snapshots.
///
/// `Errored` is terminal and only reachable while validating or
/// rasterising; every stage after a successful rasterisation degrades
/// instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStage {
    Validating,
    Rasterizing,
    Enhancing,
    Extracting,
    Postprocessing,
    Finalized,
    Errored,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessingStage::Validating => "validating",
            ProcessingStage::Rasterizing => "rasterizing",
            ProcessingStage::Enhancing => "enhancing",
            ProcessingStage::Extracting => "extracting",
            ProcessingStage::Postprocessing => "postprocessing",
            ProcessingStage::Finalized => "finalized",
            ProcessingStage::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Percent within a stage band: `base` plus the completed share of `span`.
pub(crate) fn band_progress(base: u8, span: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return base;
    }
    let add = (span as usize * done.min(total)) / total;
    base.saturating_add(add as u8).min(100)
}

/// Wraps the caller's callback and clamps reported percent to be
/// non-decreasing, so observers can treat it as a progress bar position.
struct MonotonicProgress {
    inner: ProgressCallback,
    percent: AtomicU8,
}

impl MonotonicProgress {
    fn new(inner: Option<ProgressCallback>) -> Self {
        MonotonicProgress {
            inner: inner.unwrap_or_else(|| Arc::new(NoopProgressCallback)),
            percent: AtomicU8::new(0),
        }
    }

    /// Report the terminal error stage at whatever percent the run reached.
    fn mark_errored(&self) {
        let pct = self.percent.load(Ordering::SeqCst);
        self.inner.on_stage_change(ProcessingStage::Errored, pct);
    }
}

impl ProcessingProgressCallback for MonotonicProgress {
    fn on_document_start(&self, total_pages: usize) {
        self.inner.on_document_start(total_pages);
    }

    fn on_stage_change(&self, stage: ProcessingStage, percent: u8) {
        let prev = self.percent.fetch_max(percent, Ordering::SeqCst);
        self.inner.on_stage_change(stage, prev.max(percent));
    }

    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        self.inner.on_page_start(page_num, total_pages);
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, region_count: usize) {
        self.inner.on_page_complete(page_num, total_pages, region_count);
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: String) {
        self.inner.on_page_error(page_num, total_pages, error);
    }

    fn on_document_complete(&self, total_pages: usize, success_count: usize) {
        self.inner.on_document_complete(total_pages, success_count);
    }
}

// ── Entry points ──────────────────────────────────────────────────────────

/// Run the full OCR pipeline over one PDF file.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(DocumentResult)` once every page has been attempted, even when some
/// pages degraded (check `processing_summary.success_rate` and each page's
/// `degradations`).
///
/// # Errors
/// Returns `Err(PdfOcrError)` only for fatal conditions: missing or
/// unreadable file, not a PDF, corrupt document, missing/wrong password,
/// zero pages, unusable image directory, or a missing pdfium library.
pub async fn process(
    pdf_path: impl AsRef<Path>,
    detector: Arc<dyn TextDetector>,
    config: &ProcessingConfig,
) -> Result<DocumentResult, PdfOcrError> {
    let observer = Arc::new(MonotonicProgress::new(config.progress_callback.clone()));
    let result = run_document(pdf_path.as_ref(), detector, config, observer.clone()).await;
    if result.is_err() {
        observer.mark_errored();
    }
    result
}

/// Run the full OCR pipeline over an in-memory PDF.
///
/// The bytes are spooled to a temporary file that lives for the duration
/// of the run; everything else behaves exactly like [`process`].
pub async fn process_from_bytes(
    bytes: &[u8],
    detector: Arc<dyn TextDetector>,
    config: &ProcessingConfig,
) -> Result<DocumentResult, PdfOcrError> {
    let spooled = input::spool_bytes(bytes)?;
    process(spooled.path(), detector, config).await
}

async fn run_document(
    pdf_path: &Path,
    detector: Arc<dyn TextDetector>,
    config: &ProcessingConfig,
    progress: Arc<MonotonicProgress>,
) -> Result<DocumentResult, PdfOcrError> {
    let total_start = Instant::now();
    info!("Starting OCR run: {}", pdf_path.display());

    // ── Step 1: Validate input ───────────────────────────────────────────
    progress.on_stage_change(ProcessingStage::Validating, 5);
    let pdf_path = input::resolve_local(pdf_path)?;

    // ── Step 2: Document facts ───────────────────────────────────────────
    let pdf_info = render::extract_info(&pdf_path, config.password.as_deref()).await?;
    if pdf_info.page_count == 0 {
        return Err(PdfOcrError::EmptyDocument { path: pdf_path });
    }
    info!("PDF has {} pages", pdf_info.page_count);
    progress.on_stage_change(ProcessingStage::Validating, 10);
    progress.on_document_start(pdf_info.page_count);

    // ── Step 3: Image directory ──────────────────────────────────────────
    let (image_dir, tmp_guard) = match &config.output_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| PdfOcrError::ImageDirFailed {
                path: dir.clone(),
                source: e,
            })?;
            (dir.clone(), None)
        }
        None => {
            let tmp = tempfile::tempdir().map_err(|e| PdfOcrError::ImageDirFailed {
                path: std::env::temp_dir(),
                source: e,
            })?;
            (tmp.path().to_path_buf(), Some(tmp))
        }
    };

    // ── Step 4: Rasterise ────────────────────────────────────────────────
    progress.on_stage_change(ProcessingStage::Rasterizing, 20);
    let render_start = Instant::now();
    let raster_progress: RenderProgress = {
        let p = progress.clone();
        Arc::new(move |done, total| {
            p.on_stage_change(ProcessingStage::Rasterizing, band_progress(20, 30, done, total));
        })
    };
    let rendered = render::rasterize(&pdf_path, &image_dir, config, Some(raster_progress)).await?;
    let rasterize_ms = render_start.elapsed().as_millis() as u64;
    info!("Rasterised {} pages in {}ms", rendered.len(), rasterize_ms);

    let total_pages = rendered.len();
    let mut degradations: Vec<Vec<StageError>> = rendered
        .iter()
        .map(|r| r.degradation.clone().into_iter().collect())
        .collect();
    let mut detect_paths: Vec<PathBuf> = rendered.iter().map(|r| r.image.path.clone()).collect();
    let mut written: Vec<PathBuf> = detect_paths.clone();

    // ── Step 5: Enhance ──────────────────────────────────────────────────
    if config.preprocess {
        progress.on_stage_change(ProcessingStage::Enhancing, 50);
        let inputs: Vec<(usize, PathBuf, bool)> = rendered
            .iter()
            .map(|r| (r.image.page_number, r.image.path.clone(), r.image.placeholder))
            .collect();
        let enhanced = enhance_pages(inputs, config.enhancement.clone(), progress.clone()).await?;
        for (i, (path, errors)) in enhanced.into_iter().enumerate() {
            if let Some(p) = path {
                detect_paths[i] = p.clone();
                written.push(p);
            }
            degradations[i].extend(errors);
        }
    }

    // ── Step 6: Extract ──────────────────────────────────────────────────
    progress.on_stage_change(ProcessingStage::Extracting, 70);
    let extract_start = Instant::now();
    let extractor =
        TextExtractor::new(detector).with_confidence_threshold(config.confidence_threshold);
    let page_regions = extract_pages(detect_paths, extractor, progress.clone()).await?;
    let extract_ms = extract_start.elapsed().as_millis() as u64;

    // ── Step 7: Assemble pages ───────────────────────────────────────────
    let mut pages: Vec<PageResult> = page_regions
        .into_iter()
        .map(|(page_number, regions, detect_error)| {
            let mut degs = std::mem::take(&mut degradations[page_number - 1]);
            if let Some(e) = detect_error {
                degs.push(e);
            }
            PageResult::from_regions(page_number, regions, degs)
        })
        .collect();
    pages.sort_by_key(|p| p.page_number);

    // ── Step 8: Postprocess ──────────────────────────────────────────────
    let document_summary = if config.postprocess {
        progress.on_stage_change(ProcessingStage::Postprocessing, 90);
        let (returned, summary) = tokio::task::spawn_blocking(move || {
            let processed: Vec<ProcessedPage> = pages
                .iter()
                .map(|page| postprocess::process_page(&page.combined_text, page.page_number))
                .collect();
            let summary = postprocess::summarize(&processed);
            for (page, proc) in pages.iter_mut().zip(processed) {
                page.processed = Some(proc);
            }
            (pages, summary)
        })
        .await
        .map_err(|e| PdfOcrError::Internal(format!("Postprocess task panicked: {e}")))?;
        pages = returned;
        Some(summary)
    } else {
        None
    };

    // ── Step 9: Image fate ───────────────────────────────────────────────
    finish_images(
        config.output_dir.as_deref(),
        config.keep_images,
        tmp_guard,
        &written,
    );

    // ── Step 10: Summary ─────────────────────────────────────────────────
    let duration_ms = total_start.elapsed().as_millis() as u64;
    let processing_summary =
        ProcessingSummary::from_pages(&pages, duration_ms, rasterize_ms, extract_ms);
    progress.on_document_complete(total_pages, processing_summary.successful_pages);
    progress.on_stage_change(ProcessingStage::Finalized, 100);
    info!(
        "Completed '{}': {}/{} pages OK ({}%) in {}ms",
        pdf_path.display(),
        processing_summary.successful_pages,
        processing_summary.total_pages,
        processing_summary.success_rate,
        duration_ms
    );

    Ok(DocumentResult {
        pdf_info,
        pages,
        processing_summary,
        document_summary,
        processing_options: config.options(),
    })
}

// ── Stage workers ─────────────────────────────────────────────────────────

/// Enhance every page image on the blocking pool.
///
/// Returns, per page and in order, the path of the enhanced file (`None`
/// to keep detecting on the raw render) and any degradations recorded.
async fn enhance_pages(
    inputs: Vec<(usize, PathBuf, bool)>,
    enhancement: EnhancementConfig,
    progress: Arc<MonotonicProgress>,
) -> Result<Vec<(Option<PathBuf>, Vec<StageError>)>, PdfOcrError> {
    tokio::task::spawn_blocking(move || {
        let total = inputs.len();
        inputs
            .into_iter()
            .map(|(page_number, path, placeholder)| {
                let out = enhance_one(page_number, &path, placeholder, &enhancement);
                progress.on_stage_change(
                    ProcessingStage::Enhancing,
                    band_progress(50, 20, page_number, total),
                );
                out
            })
            .collect()
    })
    .await
    .map_err(|e| PdfOcrError::Internal(format!("Enhancement task panicked: {e}")))
}

fn enhance_one(
    page_number: usize,
    path: &Path,
    placeholder: bool,
    enhancement: &EnhancementConfig,
) -> (Option<PathBuf>, Vec<StageError>) {
    // A blank substitute has nothing to recover; skip the cost.
    if placeholder {
        return (None, Vec::new());
    }

    let image = match image::open(path) {
        Ok(img) => img,
        Err(e) => {
            warn!("Could not reopen page {page_number} image for enhancement: {e}");
            return (
                None,
                vec![StageError::Enhance {
                    page: page_number,
                    stage: "load".into(),
                    detail: e.to_string(),
                }],
            );
        }
    };

    let outcome = enhance::enhance(&image, enhancement);
    let mut errors: Vec<StageError> = outcome
        .warnings
        .into_iter()
        .map(|w| StageError::Enhance {
            page: page_number,
            stage: w.stage.to_string(),
            detail: w.detail,
        })
        .collect();

    let out_path = enhanced_path(path);
    match outcome.image.save(&out_path) {
        Ok(()) => {
            debug!("Enhanced page {page_number} → {}", out_path.display());
            (Some(out_path), errors)
        }
        Err(e) => {
            warn!("Could not write enhanced page {page_number}: {e}");
            errors.push(StageError::Enhance {
                page: page_number,
                stage: "save".into(),
                detail: e.to_string(),
            });
            // Detection falls back to the raw render.
            (None, errors)
        }
    }
}

/// `scan_page_001.png` → `scan_page_001_enhanced.png`, same directory.
fn enhanced_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("page");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("png");
    path.with_file_name(format!("{stem}_enhanced.{ext}"))
}

/// Detect text on every page, in order, on the blocking pool.
///
/// Never fails per page: a detector error becomes an empty region list
/// plus a [`StageError::Detect`] for that page.
async fn extract_pages(
    paths: Vec<PathBuf>,
    extractor: TextExtractor,
    progress: Arc<MonotonicProgress>,
) -> Result<Vec<(usize, Vec<TextRegion>, Option<StageError>)>, PdfOcrError> {
    tokio::task::spawn_blocking(move || {
        let total = paths.len();
        paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| {
                let page_number = i + 1;
                progress.on_page_start(page_number, total);
                let entry = match extractor.try_extract(&path) {
                    Ok(regions) => {
                        debug!("Page {page_number}: {} regions", regions.len());
                        progress.on_page_complete(page_number, total, regions.len());
                        (page_number, regions, None)
                    }
                    Err(e) => {
                        warn!("Detection failed on page {page_number}: {e}");
                        progress.on_page_error(page_number, total, e.to_string());
                        (
                            page_number,
                            Vec::new(),
                            Some(StageError::Detect {
                                page: page_number,
                                detail: e.to_string(),
                            }),
                        )
                    }
                };
                progress.on_stage_change(
                    ProcessingStage::Extracting,
                    band_progress(70, 20, page_number, total),
                );
                entry
            })
            .collect()
    })
    .await
    .map_err(|e| PdfOcrError::Internal(format!("Extraction task panicked: {e}")))
}

/// Decide what happens to the run's rendered images.
///
/// A caller-supplied directory keeps its files under `keep_images` and is
/// swept otherwise (files only; the directory itself belongs to the
/// caller). A run-scoped temp directory is disarmed via [`TempDir::keep`]
/// under `keep_images`; without it the guard drops here and deletes the
/// directory. Returns the directory the images survive in, when they do.
fn finish_images(
    output_dir: Option<&Path>,
    keep_images: bool,
    tmp_guard: Option<TempDir>,
    written: &[PathBuf],
) -> Option<PathBuf> {
    match (output_dir, keep_images) {
        (Some(dir), true) => {
            info!("Keeping {} page images under {}", written.len(), dir.display());
            Some(dir.to_path_buf())
        }
        (Some(_), false) => {
            render::cleanup_images(written);
            None
        }
        (None, true) => tmp_guard.map(|tmp| {
            let dir = tmp.keep();
            info!("Keeping {} page images under {}", written.len(), dir.display());
            dir
        }),
        (None, false) => {
            // The guard goes here and takes the directory with it.
            drop(tmp_guard);
            debug!("Rendered into a run-scoped temp dir; nothing kept");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        events: Mutex<Vec<(ProcessingStage, u8)>>,
    }

    impl ProcessingProgressCallback for Recording {
        fn on_stage_change(&self, stage: ProcessingStage, percent: u8) {
            self.events.lock().unwrap().push((stage, percent));
        }
    }

    #[test]
    fn stage_names_are_lowercase() {
        assert_eq!(ProcessingStage::Rasterizing.to_string(), "rasterizing");
        assert_eq!(ProcessingStage::Errored.to_string(), "errored");
    }

    #[test]
    fn band_progress_spans_its_range() {
        assert_eq!(band_progress(20, 30, 0, 10), 20);
        assert_eq!(band_progress(20, 30, 5, 10), 35);
        assert_eq!(band_progress(20, 30, 10, 10), 50);
        // Degenerate totals stay at the band floor.
        assert_eq!(band_progress(50, 20, 3, 0), 50);
        // Overshoot clamps to the band ceiling.
        assert_eq!(band_progress(70, 20, 99, 10), 90);
    }

    #[test]
    fn monotonic_progress_never_goes_backwards() {
        let recording = Arc::new(Recording {
            events: Mutex::new(Vec::new()),
        });
        let mono = MonotonicProgress::new(Some(recording.clone() as ProgressCallback));

        mono.on_stage_change(ProcessingStage::Rasterizing, 30);
        mono.on_stage_change(ProcessingStage::Enhancing, 20);
        mono.on_stage_change(ProcessingStage::Extracting, 75);

        let events = recording.events.lock().unwrap();
        assert_eq!(events[0], (ProcessingStage::Rasterizing, 30));
        assert_eq!(events[1], (ProcessingStage::Enhancing, 30), "clamped up");
        assert_eq!(events[2], (ProcessingStage::Extracting, 75));
    }

    #[test]
    fn errored_is_reported_at_the_reached_percent() {
        let recording = Arc::new(Recording {
            events: Mutex::new(Vec::new()),
        });
        let mono = MonotonicProgress::new(Some(recording.clone() as ProgressCallback));

        mono.on_stage_change(ProcessingStage::Validating, 5);
        mono.mark_errored();

        let events = recording.events.lock().unwrap();
        assert_eq!(events[1], (ProcessingStage::Errored, 5));
    }

    #[test]
    fn enhanced_path_keeps_directory_and_extension() {
        let p = enhanced_path(Path::new("/tmp/run/scan_page_001.png"));
        assert_eq!(p, PathBuf::from("/tmp/run/scan_page_001_enhanced.png"));
    }

    #[test]
    fn keep_images_preserves_a_run_scoped_temp_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let page = tmp.path().join("scan_page_001.png");
        std::fs::write(&page, b"png").unwrap();

        let kept = finish_images(None, true, Some(tmp), &[page.clone()]);

        let dir = kept.expect("kept directory should be reported");
        assert!(page.exists(), "requested images must survive the run");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn run_scoped_temp_dir_drops_when_images_are_not_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        let page = dir.join("scan_page_001.png");
        std::fs::write(&page, b"png").unwrap();

        let kept = finish_images(None, false, Some(tmp), &[page]);

        assert!(kept.is_none());
        assert!(!dir.exists(), "temp directory goes with its guard");
    }

    #[test]
    fn caller_directory_is_swept_but_never_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let page = tmp.path().join("scan_page_001.png");
        let enhanced = tmp.path().join("scan_page_001_enhanced.png");
        std::fs::write(&page, b"png").unwrap();
        std::fs::write(&enhanced, b"png").unwrap();

        let kept = finish_images(
            Some(tmp.path()),
            false,
            None,
            &[page.clone(), enhanced.clone()],
        );

        assert!(kept.is_none());
        assert!(!page.exists() && !enhanced.exists(), "rendered files are swept");
        assert!(tmp.path().exists(), "the caller's directory itself stays");
    }

    #[test]
    fn caller_directory_keeps_its_files_on_request() {
        let tmp = tempfile::tempdir().unwrap();
        let page = tmp.path().join("scan_page_001.png");
        std::fs::write(&page, b"png").unwrap();

        let kept = finish_images(Some(tmp.path()), true, None, &[page.clone()]);

        assert_eq!(kept.as_deref(), Some(tmp.path()));
        assert!(page.exists());
    }
}
