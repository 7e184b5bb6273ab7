//! Batch processing: fan the pipeline out across many documents.
//!
//! ## Why documents, not pages?
//!
//! Pages inside one document are pinned to sequential processing (the
//! detector is a single shared, stateful resource), so the only
//! parallelism that pays is across documents. [`run_batch`] dispatches up
//! to `worker_count` documents at a time onto spawned tasks and collects
//! one [`DocumentOutcome`] per input, in input order.
//!
//! ## Nothing escapes
//!
//! A batch run never fails as a whole: a document whose pipeline errors —
//! or whose worker task panics — is recorded as a failed outcome and the
//! remaining documents keep going. The aggregate [`BatchSummary`] is
//! always produced.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::ProcessingConfig;
use crate::detector::TextDetector;
use crate::error::PdfOcrError;
use crate::output::{round2, DocumentResult};
use crate::pipeline::render::{self, ValidationReport};
use crate::process::process;

// ── Discovery ─────────────────────────────────────────────────────────────

/// Find every PDF under `dir`, recursively, extension matched
/// case-insensitively. The result is sorted so batch runs are
/// deterministic regardless of directory iteration order.
pub fn find_documents(dir: &Path) -> Result<Vec<PathBuf>, PdfOcrError> {
    if !dir.exists() {
        return Err(PdfOcrError::FileNotFound {
            path: dir.to_path_buf(),
        });
    }
    if !dir.is_dir() {
        return Err(PdfOcrError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry during discovery: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let is_pdf = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Pre-flight a set of documents without invoking the pipeline.
///
/// Each path gets a non-raising [`ValidationReport`]; the pairs come back
/// in input order. Useful for checking a batch before committing hours of
/// OCR time to it.
pub async fn dry_run(
    paths: &[PathBuf],
    password: Option<&str>,
) -> Vec<(PathBuf, ValidationReport)> {
    let mut reports = Vec::with_capacity(paths.len());
    for path in paths {
        let report = render::validate(path, password).await;
        reports.push((path.clone(), report));
    }
    reports
}

// ── Outcomes ──────────────────────────────────────────────────────────────

/// What happened to one document of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub path: PathBuf,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DocumentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentOutcome {
    pub fn success(path: impl Into<PathBuf>, result: DocumentResult) -> Self {
        DocumentOutcome {
            path: path.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(path: impl Into<PathBuf>, error: impl Into<String>) -> Self {
        DocumentOutcome {
            path: path.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate report for one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_documents: usize,
    pub successful: usize,
    pub failed: usize,
    /// `successful / total * 100`, rounded to two decimals; 0 for an empty
    /// batch.
    pub success_rate: f64,
    /// Pages across all successful documents.
    pub total_pages: usize,
    /// Characters across all successful documents.
    pub total_characters: usize,
    pub duration_ms: u64,
    /// One entry per input document, in input order.
    pub outcomes: Vec<DocumentOutcome>,
}

impl BatchSummary {
    fn from_outcomes(outcomes: Vec<DocumentOutcome>, duration_ms: u64) -> Self {
        let total_documents = outcomes.len();
        let successful = outcomes.iter().filter(|o| o.success).count();
        let failed = total_documents - successful;
        let success_rate = if total_documents == 0 {
            0.0
        } else {
            round2(successful as f64 / total_documents as f64 * 100.0)
        };
        let total_pages = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref())
            .map(|r| r.processing_summary.total_pages)
            .sum();
        let total_characters = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref())
            .map(|r| r.processing_summary.total_characters)
            .sum();
        BatchSummary {
            total_documents,
            successful,
            failed,
            success_rate,
            total_pages,
            total_characters,
            duration_ms,
            outcomes,
        }
    }
}

// ── Execution ─────────────────────────────────────────────────────────────

/// Process every document with bounded concurrency and aggregate the
/// outcomes. Never fails; see [`DocumentOutcome`] for per-document errors.
///
/// The detector is shared across all workers; implementations guard their
/// own state (the pipeline itself never calls one detector concurrently
/// for pages of the *same* document, but two documents' pages may overlap
/// in time).
pub async fn run_batch(
    paths: &[PathBuf],
    detector: Arc<dyn TextDetector>,
    config: &ProcessingConfig,
) -> BatchSummary {
    let start = Instant::now();
    let workers = config.worker_count.max(1);
    info!(
        "Batch starting: {} documents, {} workers",
        paths.len(),
        workers
    );

    let mut indexed: Vec<(usize, DocumentOutcome)> =
        stream::iter(paths.iter().cloned().enumerate())
            .map(|(idx, path)| {
                let detector = detector.clone();
                let config = config.clone();
                async move {
                    let doc_path = path.clone();
                    let handle =
                        tokio::spawn(async move { process(&path, detector, &config).await });
                    let outcome = match handle.await {
                        Ok(Ok(result)) => DocumentOutcome::success(&doc_path, result),
                        Ok(Err(e)) => {
                            warn!("Document '{}' failed: {e}", doc_path.display());
                            DocumentOutcome::failure(&doc_path, e.to_string())
                        }
                        Err(e) => {
                            warn!("Worker for '{}' panicked: {e}", doc_path.display());
                            DocumentOutcome::failure(&doc_path, format!("worker panicked: {e}"))
                        }
                    };
                    (idx, outcome)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

    indexed.sort_by_key(|(idx, _)| *idx);
    let outcomes: Vec<DocumentOutcome> = indexed.into_iter().map(|(_, o)| o).collect();

    let summary = BatchSummary::from_outcomes(outcomes, start.elapsed().as_millis() as u64);
    info!(
        "Batch finished: {}/{} documents OK ({}%) in {}ms",
        summary.successful, summary.total_documents, summary.success_rate, summary.duration_ms
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectorOutput, TextDetector};
    use crate::error::DetectorError;
    use std::fs;

    struct StaticDetector;

    impl TextDetector for StaticDetector {
        fn detect(&self, _image: &Path) -> Result<DetectorOutput, DetectorError> {
            Ok(DetectorOutput::Text("hello".into()))
        }
    }

    /// Minimal passing result carrying the given page and character totals.
    fn passing_result(pages: usize, characters: usize) -> DocumentResult {
        serde_json::from_value(serde_json::json!({
            "pdf_info": { "path": "a.pdf", "page_count": pages, "file_size": 10, "encrypted": false },
            "pages": [],
            "processing_summary": {
                "total_pages": pages, "successful_pages": pages, "success_rate": 100.0,
                "total_characters": characters, "duration_ms": 5,
                "rasterize_ms": 2, "extract_ms": 2
            },
            "processing_options": {
                "dpi": 300, "preprocess": true, "postprocess": true,
                "confidence_threshold": 0.0, "worker_count": 1, "keep_images": false,
                "enhancement": {
                    "grayscale": true, "contrast": "clahe", "clip_limit": 3.0,
                    "tile_size": 8, "denoise": "bilateral", "denoise_strength": 9,
                    "threshold": "adaptive", "block_size": 11, "threshold_c": 2.0,
                    "morph_open": true, "deskew": true, "max_skew_angle": 5.0
                }
            }
        }))
        .expect("fixture deserialises")
    }

    #[test]
    fn discovery_is_recursive_case_insensitive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.pdf"), b"%PDF-1.4").unwrap();
        fs::write(dir.path().join("a.PDF"), b"%PDF-1.4").unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a pdf").unwrap();
        fs::write(dir.path().join("nested/c.pdf"), b"%PDF-1.4").unwrap();

        let found = find_documents(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf", "nested/c.pdf"]);
    }

    #[test]
    fn discovery_rejects_files_and_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.pdf");
        fs::write(&file, b"%PDF-1.4").unwrap();

        let err = find_documents(&file).unwrap_err();
        assert!(matches!(err, PdfOcrError::NotADirectory { .. }), "got {err:?}");

        let err = find_documents(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, PdfOcrError::FileNotFound { .. }), "got {err:?}");
    }

    #[test]
    fn empty_directory_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_documents(dir.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_batch_yields_zero_rate_without_panicking() {
        let summary = run_batch(&[], Arc::new(StaticDetector), &ProcessingConfig::default()).await;
        assert_eq!(summary.total_documents, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert!(summary.outcomes.is_empty());
    }

    #[tokio::test]
    async fn failures_are_recorded_not_raised() {
        let paths = vec![
            PathBuf::from("/definitely/not/here/a.pdf"),
            PathBuf::from("/definitely/not/here/b.pdf"),
        ];
        let summary = run_batch(
            &paths,
            Arc::new(StaticDetector),
            &ProcessingConfig::default(),
        )
        .await;

        assert_eq!(summary.total_documents, 2);
        assert_eq!(summary.successful, 0);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.success_rate, 0.0);
        // Outcomes keep input order and carry the per-document error.
        assert_eq!(summary.outcomes[0].path, paths[0]);
        assert_eq!(summary.outcomes[1].path, paths[1]);
        assert!(summary.outcomes[0].error.as_deref().is_some_and(|e| !e.is_empty()));
    }

    #[test]
    fn mixed_outcomes_aggregate_counts_and_rate() {
        let outcomes = vec![
            DocumentOutcome::success("a.pdf", passing_result(2, 120)),
            DocumentOutcome::failure("b.pdf", "could not open"),
            DocumentOutcome::success("c.pdf", passing_result(3, 250)),
            DocumentOutcome::failure("d.pdf", "password required"),
            DocumentOutcome::success("e.pdf", passing_result(1, 30)),
        ];

        let summary = BatchSummary::from_outcomes(outcomes, 1234);

        assert_eq!(summary.total_documents, 5);
        assert_eq!(summary.successful, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.success_rate, 60.0);
        // Pages and characters count successful documents only.
        assert_eq!(summary.total_pages, 6);
        assert_eq!(summary.total_characters, 400);
        assert_eq!(summary.duration_ms, 1234);
        assert_eq!(summary.outcomes.len(), 5);
    }

    #[tokio::test]
    async fn dry_run_reports_without_processing() {
        let dir = tempfile::tempdir().unwrap();
        let good_magic = dir.path().join("magic.pdf");
        fs::write(&good_magic, b"%PDF-1.4 stub").unwrap();
        let missing = dir.path().join("missing.pdf");

        let reports = dry_run(&[good_magic.clone(), missing.clone()], None).await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].0, good_magic);
        assert!(reports[0].1.file_exists);
        assert!(reports[0].1.is_pdf);
        assert!(!reports[1].1.file_exists);
        assert!(!reports[1].1.is_valid());
    }
}
