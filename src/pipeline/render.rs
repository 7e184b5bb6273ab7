//! PDF validation, metadata, and rasterisation via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto a dedicated
//! thread pool thread designed for blocking operations, preventing the
//! Tokio worker threads from stalling during CPU-heavy rendering.
//!
//! ## Why placeholders instead of skipping bad pages?
//!
//! A page that fails to render is replaced by a blank, letter-proportioned
//! white image and recorded as a degradation. The page keeps its slot, so
//! `pages.len() == page_count` holds for every run and page N's text never
//! shifts into page N+1's position downstream.

use crate::config::ProcessingConfig;
use crate::error::{PdfOcrError, StageError};
use crate::output::PdfInfo;
use crate::pipeline::input;
use image::{DynamicImage, Rgb, RgbImage};
use pdfium_render::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-page progress hook for rasterisation, called with (done, total).
pub type RenderProgress = Arc<dyn Fn(usize, usize) + Send + Sync>;

// ── Types ─────────────────────────────────────────────────────────────────

/// One rendered page image on disk.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based page number.
    pub page_number: usize,
    /// Path of the PNG written for this page.
    pub path: PathBuf,
    /// The PDF the page came from (back-reference only).
    pub source: PathBuf,
    /// DPI the page was rendered at.
    pub dpi: u32,
    pub width: u32,
    pub height: u32,
    /// True when this is a blank substitute for an unrenderable page.
    pub placeholder: bool,
}

/// A page image plus the degradation that produced it, if any.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub image: PageImage,
    pub degradation: Option<StageError>,
}

/// Non-raising validation verdict for a candidate PDF.
///
/// Field order mirrors the checks: existence, magic bytes, openability,
/// encryption, page count. [`ValidationReport::is_valid`] folds them into
/// the single go/no-go answer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub file_exists: bool,
    pub is_pdf: bool,
    pub is_readable: bool,
    pub is_encrypted: bool,
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationReport {
    /// True when the document exists, parses as a PDF, opens (with the
    /// given password if encrypted), and has at least one page.
    pub fn is_valid(&self) -> bool {
        self.file_exists
            && self.is_pdf
            && self.is_readable
            && self.page_count.is_some_and(|n| n > 0)
    }
}

// ── Validation ────────────────────────────────────────────────────────────

/// Validate a candidate PDF without raising.
///
/// Every failure mode — missing file, wrong magic, corrupt xref, missing
/// password, zero pages, even a missing pdfium library — lands in the
/// report instead of an `Err`.
pub async fn validate(pdf_path: &Path, password: Option<&str>) -> ValidationReport {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());

    match tokio::task::spawn_blocking(move || validate_blocking(&path, pwd.as_deref())).await {
        Ok(report) => report,
        Err(e) => ValidationReport {
            error: Some(format!("Validation task panicked: {e}")),
            ..ValidationReport::default()
        },
    }
}

fn validate_blocking(pdf_path: &Path, password: Option<&str>) -> ValidationReport {
    let mut report = ValidationReport::default();

    match input::resolve_local(pdf_path) {
        Ok(_) => {
            report.file_exists = true;
            report.is_pdf = true;
        }
        Err(e) => {
            if !matches!(e, PdfOcrError::FileNotFound { .. }) {
                report.file_exists = true;
            }
            report.error = Some(e.to_string());
            return report;
        }
    }

    let pdfium = match bind_pdfium() {
        Ok(p) => p,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };

    match open_document(&pdfium, pdf_path, password) {
        Ok((document, encrypted)) => {
            report.is_readable = true;
            report.is_encrypted = encrypted;
            let pages = document.pages().len() as usize;
            report.page_count = Some(pages);
            if pages == 0 {
                report.error = Some("PDF has no pages".into());
            }
        }
        Err(e) => {
            report.is_encrypted = matches!(
                e,
                PdfOcrError::PasswordRequired { .. } | PdfOcrError::WrongPassword { .. }
            );
            report.error = Some(e.to_string());
        }
    }

    report
}

// ── Metadata ──────────────────────────────────────────────────────────────

/// Read document facts (page count, size, metadata tags) without rendering.
pub async fn extract_info(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<PdfInfo, PdfOcrError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || extract_info_blocking(&path, pwd.as_deref()))
        .await
        .map_err(|e| PdfOcrError::Internal(format!("Metadata task panicked: {e}")))?
}

fn extract_info_blocking(pdf_path: &Path, password: Option<&str>) -> Result<PdfInfo, PdfOcrError> {
    let pdfium = bind_pdfium()?;
    let (document, encrypted) = open_document(&pdfium, pdf_path, password)?;

    let metadata = document.metadata();
    let page_count = document.pages().len() as usize;
    let file_size = std::fs::metadata(pdf_path).map(|m| m.len()).unwrap_or_default();

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    let pdf_version = match document.version() {
        PdfDocumentVersion::Unset => None,
        v => Some(format!("{v:?}")),
    };

    Ok(PdfInfo {
        path: pdf_path.to_path_buf(),
        page_count,
        file_size,
        encrypted,
        pdf_version,
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
        modification_date: get_meta(PdfDocumentMetadataTagType::ModificationDate),
    })
}

// ── Rasterisation ─────────────────────────────────────────────────────────

/// Rasterise every page of a PDF to PNG files under `out_dir`.
///
/// Fails only when the document itself cannot be opened. A single
/// unrenderable page degrades to a white placeholder with a recorded
/// [`StageError::Rasterize`], keeping its slot in the returned sequence.
pub async fn rasterize(
    pdf_path: &Path,
    out_dir: &Path,
    config: &ProcessingConfig,
    progress: Option<RenderProgress>,
) -> Result<Vec<RenderedPage>, PdfOcrError> {
    let path = pdf_path.to_path_buf();
    let dir = out_dir.to_path_buf();
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    let password = config.password.clone();

    tokio::task::spawn_blocking(move || {
        rasterize_blocking(&path, &dir, dpi, max_pixels, password.as_deref(), progress)
    })
    .await
    .map_err(|e| PdfOcrError::Internal(format!("Render task panicked: {e}")))?
}

fn rasterize_blocking(
    pdf_path: &Path,
    out_dir: &Path,
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
    progress: Option<RenderProgress>,
) -> Result<Vec<RenderedPage>, PdfOcrError> {
    let pdfium = bind_pdfium()?;
    let (document, _) = open_document(&pdfium, pdf_path, password)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(PdfOcrError::EmptyDocument {
            path: pdf_path.to_path_buf(),
        });
    }
    info!("PDF loaded: {} pages", total_pages);

    let stem = pdf_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");

    let mut results = Vec::with_capacity(total_pages);

    for idx in 0..total_pages {
        let page_number = idx + 1;
        let out_path = out_dir.join(page_file_name(stem, page_number));

        let rendered: Result<DynamicImage, String> = pages
            .get(idx as u16)
            .map_err(|e| format!("{e:?}"))
            .and_then(|page| {
                let (w_px, _) = target_pixels(page.width().value, page.height().value, dpi, max_pixels);
                let render_config = PdfRenderConfig::new()
                    .set_target_width(w_px as i32)
                    .set_maximum_height(max_pixels as i32);
                page.render_with_config(&render_config)
                    .map(|bitmap| bitmap.as_image())
                    .map_err(|e| format!("{e:?}"))
            });

        let entry = match rendered {
            Ok(image) => match image.save(&out_path) {
                Ok(()) => {
                    debug!(
                        "Rendered page {} → {}x{} px → {}",
                        page_number,
                        image.width(),
                        image.height(),
                        out_path.display()
                    );
                    RenderedPage {
                        image: PageImage {
                            page_number,
                            path: out_path,
                            source: pdf_path.to_path_buf(),
                            dpi,
                            width: image.width(),
                            height: image.height(),
                            placeholder: false,
                        },
                        degradation: None,
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to write page {} of '{}': {e}",
                        page_number,
                        pdf_path.display()
                    );
                    placeholder_page(pdf_path, &out_path, page_number, dpi, max_pixels, e.to_string())
                }
            },
            Err(detail) => {
                warn!(
                    "Rasterisation failed for page {} of '{}': {detail}",
                    page_number,
                    pdf_path.display()
                );
                placeholder_page(pdf_path, &out_path, page_number, dpi, max_pixels, detail)
            }
        };

        results.push(entry);
        if let Some(cb) = &progress {
            cb(page_number, total_pages);
        }
    }

    Ok(results)
}

/// Build the blank substitute entry for a page that failed to render.
fn placeholder_page(
    pdf_path: &Path,
    out_path: &Path,
    page_number: usize,
    dpi: u32,
    max_pixels: u32,
    detail: String,
) -> RenderedPage {
    let image = placeholder_image(dpi, max_pixels);
    // Best effort: extraction tolerates a missing file as an empty page.
    if let Err(e) = image.save(out_path) {
        warn!(
            "Failed to write placeholder for page {}: {e}",
            page_number
        );
    }
    RenderedPage {
        image: PageImage {
            page_number,
            path: out_path.to_path_buf(),
            source: pdf_path.to_path_buf(),
            dpi,
            width: image.width(),
            height: image.height(),
            placeholder: true,
        },
        degradation: Some(StageError::Rasterize {
            page: page_number,
            detail,
        }),
    }
}

/// Delete the image files written during a run. Failures are logged, not
/// raised.
pub fn cleanup_images(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            if path.exists() {
                warn!("Failed to remove '{}': {e}", path.display());
            }
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn bind_pdfium() -> Result<Pdfium, PdfOcrError> {
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| PdfOcrError::PdfiumBindingFailed(format!("{e:?}")))
}

/// Open a document, probing encryption status.
///
/// The passwordless attempt comes first so the encrypted flag is accurate
/// even when a caller supplies a password the document does not need.
fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<(PdfDocument<'a>, bool), PdfOcrError> {
    match pdfium.load_pdf_from_file(pdf_path, None) {
        Ok(doc) => Ok((doc, false)),
        Err(e) if is_password_error(&e) => match password {
            Some(pwd) => pdfium
                .load_pdf_from_file(pdf_path, Some(pwd))
                .map(|doc| (doc, true))
                .map_err(|e2| {
                    if is_password_error(&e2) {
                        PdfOcrError::WrongPassword {
                            path: pdf_path.to_path_buf(),
                        }
                    } else {
                        PdfOcrError::CorruptPdf {
                            path: pdf_path.to_path_buf(),
                            detail: format!("{e2:?}"),
                        }
                    }
                }),
            None => Err(PdfOcrError::PasswordRequired {
                path: pdf_path.to_path_buf(),
            }),
        },
        Err(e) => Err(PdfOcrError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{e:?}"),
        }),
    }
}

fn is_password_error(e: &PdfiumError) -> bool {
    let s = format!("{e:?}");
    s.contains("Password") || s.contains("password")
}

/// Deterministic, collision-free file name for one page's PNG.
fn page_file_name(stem: &str, page_number: usize) -> String {
    format!("{stem}_page_{page_number:03}.png")
}

/// Pixel dimensions for a page at `dpi`, longest edge capped.
fn target_pixels(width_pts: f32, height_pts: f32, dpi: u32, max_pixels: u32) -> (u32, u32) {
    let mut w = (width_pts * dpi as f32 / 72.0).round().max(1.0);
    let mut h = (height_pts * dpi as f32 / 72.0).round().max(1.0);
    let longest = w.max(h);
    if longest > max_pixels as f32 {
        let scale = max_pixels as f32 / longest;
        w = (w * scale).round().max(1.0);
        h = (h * scale).round().max(1.0);
    }
    (w as u32, h as u32)
}

/// A white, US-Letter-proportioned stand-in for an unrenderable page.
fn placeholder_image(dpi: u32, max_pixels: u32) -> DynamicImage {
    let (w, h) = target_pixels(612.0, 792.0, dpi, max_pixels);
    DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([255, 255, 255])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_file_names_are_zero_padded_and_distinct() {
        assert_eq!(page_file_name("scan", 7), "scan_page_007.png");
        assert_eq!(page_file_name("scan", 123), "scan_page_123.png");
        assert_ne!(page_file_name("scan", 1), page_file_name("scan", 10));
    }

    #[test]
    fn target_pixels_scales_points_by_dpi() {
        // US Letter at 300 DPI.
        let (w, h) = target_pixels(612.0, 792.0, 300, 10_000);
        assert_eq!((w, h), (2550, 3300));
    }

    #[test]
    fn target_pixels_caps_longest_edge() {
        let (w, h) = target_pixels(612.0, 792.0, 300, 1100);
        assert_eq!(h, 1100);
        assert!(w < h);
        // Aspect ratio survives the cap.
        let ratio = w as f32 / h as f32;
        assert!((ratio - 612.0 / 792.0).abs() < 0.01, "ratio {ratio}");
    }

    #[test]
    fn placeholder_is_white_and_letter_proportioned() {
        let img = placeholder_image(100, 10_000);
        assert_eq!((img.width(), img.height()), (850, 1100));
        let rgb = img.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(rgb.get_pixel(849, 1099).0, [255, 255, 255]);
    }

    #[test]
    fn cleanup_tolerates_missing_files() {
        cleanup_images(&[PathBuf::from("/nonexistent/x_page_001.png")]);
    }
}
