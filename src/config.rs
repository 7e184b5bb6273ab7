//! Configuration types for the OCR pipeline.
//!
//! All run behaviour is controlled through [`ProcessingConfig`], built via
//! its [`ProcessingConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across threads, echo them into results for
//! reproducibility, and diff two runs to understand why their outputs
//! differ. The config is validated once by [`ProcessingConfigBuilder::build`]
//! and treated as read-only for the duration of a run.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely
//! on well-documented defaults for the rest.

use crate::error::PdfOcrError;
use crate::output::ProcessingOptions;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for a document processing run.
///
/// Built via [`ProcessingConfig::builder()`] or using
/// [`ProcessingConfig::default()`].
///
/// # Example
/// ```rust
/// use pdfocr::ProcessingConfig;
///
/// let config = ProcessingConfig::builder()
///     .dpi(200)
///     .preprocess(true)
///     .worker_count(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ProcessingConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–600. Default: 300.
    ///
    /// OCR engines want more pixels per glyph than a human reader does.
    /// 300 DPI resolves 8-point body text cleanly; drop to 150–200 for
    /// clean digital-born PDFs where speed matters, raise to 400+ only for
    /// very small print, since render time and memory grow quadratically.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 4500.
    ///
    /// A safety cap independent of DPI. A 300-DPI render of an A0 poster
    /// would produce a 28 000 px wide image and exhaust memory. This caps
    /// either dimension, scaling the other proportionally. The default
    /// clears A4/Letter at 300 DPI (3508 px) with headroom.
    pub max_rendered_pixels: u32,

    /// Run the image enhancement chain before text detection. Default: true.
    ///
    /// Scanned documents benefit heavily (contrast, noise, skew); clean
    /// digital-born PDFs barely change. Disable to halve per-page cost when
    /// the source is known to be synthetic.
    pub preprocess: bool,

    /// Run text postprocessing and document summarisation. Default: true.
    pub postprocess: bool,

    /// Drop normalised regions whose confidence falls below this. Default: 0.0 (keep all).
    ///
    /// Detectors that emit per-region scores can be trimmed here; detectors
    /// that emit none are unaffected because score-less regions receive the
    /// default confidence of 0.95.
    pub confidence_threshold: f32,

    /// Bounded parallelism across documents in a batch. Default: `min(cores, 4)`.
    ///
    /// Pages within one document are always sequential: the detector is a
    /// single shared, stateful resource not assumed to tolerate concurrent
    /// invocation. Parallelism therefore only pays across documents.
    pub worker_count: usize,

    /// Keep rendered page images after the run instead of deleting them. Default: false.
    pub keep_images: bool,

    /// Directory for rendered page images when `keep_images` is set.
    ///
    /// `None` (the default) renders into a run-scoped temporary directory
    /// that is removed when the run ends. Setting a directory implies the
    /// images survive the run.
    pub output_dir: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Image enhancement stage options. See [`EnhancementConfig`].
    pub enhancement: EnhancementConfig,

    /// Observer for stage transitions and per-page events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_rendered_pixels: 4500,
            preprocess: true,
            postprocess: true,
            confidence_threshold: 0.0,
            worker_count: num_cpus::get().min(4).max(1),
            keep_images: false,
            output_dir: None,
            password: None,
            enhancement: EnhancementConfig::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ProcessingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("preprocess", &self.preprocess)
            .field("postprocess", &self.postprocess)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("worker_count", &self.worker_count)
            .field("keep_images", &self.keep_images)
            .field("output_dir", &self.output_dir)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("enhancement", &self.enhancement)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn callback>"),
            )
            .finish()
    }
}

impl ProcessingConfig {
    /// Create a new builder for `ProcessingConfig`.
    pub fn builder() -> ProcessingConfigBuilder {
        ProcessingConfigBuilder {
            config: Self::default(),
        }
    }

    /// Serialisable echo of this config, embedded into results.
    pub fn options(&self) -> ProcessingOptions {
        ProcessingOptions {
            dpi: self.dpi,
            preprocess: self.preprocess,
            postprocess: self.postprocess,
            confidence_threshold: self.confidence_threshold,
            worker_count: self.worker_count,
            keep_images: self.keep_images,
            enhancement: self.enhancement.clone(),
        }
    }
}

/// Builder for [`ProcessingConfig`].
#[derive(Debug)]
pub struct ProcessingConfigBuilder {
    config: ProcessingConfig,
}

impl ProcessingConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn preprocess(mut self, v: bool) -> Self {
        self.config.preprocess = v;
        self
    }

    pub fn postprocess(mut self, v: bool) -> Self {
        self.config.postprocess = v;
        self
    }

    pub fn confidence_threshold(mut self, t: f32) -> Self {
        self.config.confidence_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.config.worker_count = n.max(1);
        self
    }

    pub fn keep_images(mut self, v: bool) -> Self {
        self.config.keep_images = v;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn enhancement(mut self, e: EnhancementConfig) -> Self {
        self.config.enhancement = e;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessingConfig, PdfOcrError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(PdfOcrError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.worker_count == 0 {
            return Err(PdfOcrError::InvalidConfig(
                "worker_count must be ≥ 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.confidence_threshold) {
            return Err(PdfOcrError::InvalidConfig(format!(
                "confidence_threshold must be in [0, 1], got {}",
                c.confidence_threshold
            )));
        }
        c.enhancement.validate()?;
        Ok(self.config)
    }
}

// ── Enhancement options ──────────────────────────────────────────────────

/// Options for the page-image enhancement chain.
///
/// Stages run in a fixed order — grayscale, contrast, denoise, binarise,
/// morphological opening, deskew — and each is independently toggleable.
/// The defaults reproduce a conventional scanned-document cleanup: CLAHE
/// with clip limit 3.0 on an 8×8 tile grid, bilateral smoothing over a
/// 9-pixel window, adaptive mean thresholding with an 11-pixel block, a
/// 2×2 opening pass, and deskew bounded to ±5°.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancementConfig {
    /// Convert to single-channel grayscale first. Default: true.
    pub grayscale: bool,
    /// Contrast enhancement method. Default: [`ContrastMethod::Clahe`].
    pub contrast: ContrastMethod,
    /// CLAHE clip limit as a multiple of the uniform histogram level. Default: 3.0.
    pub clip_limit: f32,
    /// CLAHE tile grid dimension (n×n tiles). Default: 8.
    pub tile_size: u32,
    /// Denoising method. Default: [`DenoiseMethod::Bilateral`].
    pub denoise: DenoiseMethod,
    /// Denoise window diameter in pixels (bilateral/median) or blur radius
    /// seed (gaussian). Default: 9.
    pub denoise_strength: u32,
    /// Binarisation method. Default: [`ThresholdMethod::Adaptive`].
    pub threshold: ThresholdMethod,
    /// Adaptive threshold neighbourhood size; must be odd and ≥ 3. Default: 11.
    pub block_size: u32,
    /// Constant subtracted from the neighbourhood mean. Default: 2.0.
    pub threshold_c: f32,
    /// Morphological 2×2 opening after binarisation. Default: true.
    pub morph_open: bool,
    /// Estimate and correct page skew. Default: true.
    pub deskew: bool,
    /// Largest skew angle searched/corrected, in degrees. Default: 5.0.
    pub max_skew_angle: f32,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            grayscale: true,
            contrast: ContrastMethod::Clahe,
            clip_limit: 3.0,
            tile_size: 8,
            denoise: DenoiseMethod::Bilateral,
            denoise_strength: 9,
            threshold: ThresholdMethod::Adaptive,
            block_size: 11,
            threshold_c: 2.0,
            morph_open: true,
            deskew: true,
            max_skew_angle: 5.0,
        }
    }
}

impl EnhancementConfig {
    /// A config with every stage disabled; input images pass through.
    pub fn disabled() -> Self {
        Self {
            grayscale: false,
            contrast: ContrastMethod::Off,
            denoise: DenoiseMethod::Off,
            threshold: ThresholdMethod::Off,
            morph_open: false,
            deskew: false,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), PdfOcrError> {
        if self.contrast == ContrastMethod::Clahe && self.clip_limit <= 0.0 {
            return Err(PdfOcrError::InvalidConfig(format!(
                "clip_limit must be > 0, got {}",
                self.clip_limit
            )));
        }
        if self.tile_size == 0 {
            return Err(PdfOcrError::InvalidConfig("tile_size must be ≥ 1".into()));
        }
        if self.threshold == ThresholdMethod::Adaptive
            && (self.block_size < 3 || self.block_size % 2 == 0)
        {
            return Err(PdfOcrError::InvalidConfig(format!(
                "block_size must be odd and ≥ 3, got {}",
                self.block_size
            )));
        }
        if self.denoise != DenoiseMethod::Off && self.denoise_strength == 0 {
            return Err(PdfOcrError::InvalidConfig(
                "denoise_strength must be ≥ 1".into(),
            ));
        }
        if self.deskew && !(self.max_skew_angle > 0.0 && self.max_skew_angle <= 45.0) {
            return Err(PdfOcrError::InvalidConfig(format!(
                "max_skew_angle must be in (0, 45], got {}",
                self.max_skew_angle
            )));
        }
        Ok(())
    }
}

/// Contrast enhancement variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContrastMethod {
    /// Contrast-limited adaptive histogram equalisation. (default)
    #[default]
    Clahe,
    /// Plain global histogram equalisation.
    Histogram,
    /// Skip contrast enhancement.
    Off,
}

/// Denoising variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenoiseMethod {
    /// Edge-preserving bilateral filter. (default)
    #[default]
    Bilateral,
    /// Gaussian blur.
    Gaussian,
    /// 3×3 median filter.
    Median,
    /// Skip denoising.
    Off,
}

/// Binarisation variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMethod {
    /// Adaptive mean threshold over `block_size` neighbourhoods. (default)
    #[default]
    Adaptive,
    /// Global threshold chosen by Otsu's method.
    Otsu,
    /// Fixed global threshold at 127.
    Global,
    /// Skip binarisation.
    Off,
}
