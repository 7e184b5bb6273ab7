//! Image enhancement: clean up a rasterised page before text detection.
//!
//! Stages run in a fixed order — grayscale, contrast, denoise, binarise,
//! morphological opening, deskew — and each is a pure function of (input,
//! stage config): identical inputs always produce identical outputs.
//!
//! ## Why degrade instead of abort?
//!
//! Enhancement is an accuracy booster, not a correctness requirement. A
//! stage that fails (most commonly deskew on a blank page, which has no
//! foreground to estimate from) passes its input through unmodified and
//! records a [`StageWarning`]; the page continues to detection with
//! whatever quality it has. Aborting a 200-page run because one page is
//! blank would be strictly worse than extracting nothing from that page.
//!
//! ## Why hand-written kernels?
//!
//! Everything here operates on `image::GrayImage` with plain pixel loops:
//! CLAHE, bilateral filtering, adaptive thresholding, and the
//! projection-profile skew estimator are each a page of arithmetic, and
//! keeping them in-tree avoids dragging a computer-vision stack into a
//! crate that otherwise only decodes and encodes PNGs.

use crate::config::{ContrastMethod, DenoiseMethod, EnhancementConfig, ThresholdMethod};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use tracing::{debug, warn};

// ── Stage accounting ──────────────────────────────────────────────────────

/// The enhancement stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhanceStage {
    Grayscale,
    Contrast,
    Denoise,
    Binarize,
    MorphOpen,
    Deskew,
}

impl std::fmt::Display for EnhanceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnhanceStage::Grayscale => "grayscale",
            EnhanceStage::Contrast => "contrast",
            EnhanceStage::Denoise => "denoise",
            EnhanceStage::Binarize => "binarize",
            EnhanceStage::MorphOpen => "morph-open",
            EnhanceStage::Deskew => "deskew",
        };
        f.write_str(s)
    }
}

/// A stage that fell back to pass-through.
#[derive(Debug, Clone)]
pub struct StageWarning {
    pub stage: EnhanceStage,
    pub detail: String,
}

/// The enhanced image plus any recorded pass-through degradations.
#[derive(Debug, Clone)]
pub struct Enhanced {
    pub image: DynamicImage,
    pub warnings: Vec<StageWarning>,
}

// ── Chain ─────────────────────────────────────────────────────────────────

/// Run the configured enhancement chain over one page image.
pub fn enhance(image: &DynamicImage, config: &EnhancementConfig) -> Enhanced {
    let any_enabled = config.grayscale
        || config.contrast != ContrastMethod::Off
        || config.denoise != DenoiseMethod::Off
        || config.threshold != ThresholdMethod::Off
        || config.morph_open
        || config.deskew;
    if !any_enabled {
        return Enhanced {
            image: image.clone(),
            warnings: Vec::new(),
        };
    }

    let mut warnings = Vec::new();
    // Every enabled stage is defined on single-channel data, so the chain
    // works on luma regardless of the grayscale toggle.
    let mut gray = image.to_luma8();

    match config.contrast {
        ContrastMethod::Clahe => apply(
            &mut gray,
            EnhanceStage::Contrast,
            |g| equalize_clahe(g, config.clip_limit, config.tile_size),
            &mut warnings,
        ),
        ContrastMethod::Histogram => apply(
            &mut gray,
            EnhanceStage::Contrast,
            equalize_histogram,
            &mut warnings,
        ),
        ContrastMethod::Off => {}
    }

    match config.denoise {
        DenoiseMethod::Bilateral => apply(
            &mut gray,
            EnhanceStage::Denoise,
            |g| denoise_bilateral(g, config.denoise_strength),
            &mut warnings,
        ),
        DenoiseMethod::Gaussian => apply(
            &mut gray,
            EnhanceStage::Denoise,
            |g| denoise_gaussian(g, config.denoise_strength),
            &mut warnings,
        ),
        DenoiseMethod::Median => {
            apply(&mut gray, EnhanceStage::Denoise, denoise_median, &mut warnings)
        }
        DenoiseMethod::Off => {}
    }

    match config.threshold {
        ThresholdMethod::Adaptive => apply(
            &mut gray,
            EnhanceStage::Binarize,
            |g| binarize_adaptive(g, config.block_size, config.threshold_c),
            &mut warnings,
        ),
        ThresholdMethod::Otsu => {
            apply(&mut gray, EnhanceStage::Binarize, binarize_otsu, &mut warnings)
        }
        ThresholdMethod::Global => {
            apply(&mut gray, EnhanceStage::Binarize, binarize_global, &mut warnings)
        }
        ThresholdMethod::Off => {}
    }

    if config.morph_open {
        apply(&mut gray, EnhanceStage::MorphOpen, morph_open, &mut warnings);
    }

    if config.deskew {
        match estimate_skew(&gray, config.max_skew_angle) {
            Ok(angle) if angle != 0.0 => {
                debug!("Deskewing by {angle:.2}°");
                gray = rotate_about_center(&gray, angle);
            }
            Ok(_) => {}
            Err(detail) => {
                warn!("Enhancement stage 'deskew' failed: {detail}");
                warnings.push(StageWarning {
                    stage: EnhanceStage::Deskew,
                    detail,
                });
            }
        }
    }

    Enhanced {
        image: DynamicImage::ImageLuma8(gray),
        warnings,
    }
}

/// Replace the working image on success; log and record on failure.
fn apply<F>(gray: &mut GrayImage, stage: EnhanceStage, f: F, warnings: &mut Vec<StageWarning>)
where
    F: FnOnce(&GrayImage) -> Result<GrayImage, String>,
{
    match f(gray) {
        Ok(next) => *gray = next,
        Err(detail) => {
            warn!("Enhancement stage '{stage}' failed: {detail}");
            warnings.push(StageWarning { stage, detail });
        }
    }
}

// ── Contrast ──────────────────────────────────────────────────────────────

/// Contrast-limited adaptive histogram equalisation over an n×n tile grid.
///
/// The per-tile clip limit is `clip_limit` times the uniform histogram
/// level; clipped mass is redistributed evenly, and per-pixel output
/// bilinearly interpolates the four nearest tile mappings so tile seams
/// never show.
pub(crate) fn equalize_clahe(
    img: &GrayImage,
    clip_limit: f32,
    tile_grid: u32,
) -> Result<GrayImage, String> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err("empty image".into());
    }
    let tiles = tile_grid.clamp(1, w.min(h).max(1));
    let tw = w.div_ceil(tiles);
    let th = h.div_ceil(tiles);

    let mut luts = vec![[0u8; 256]; (tiles * tiles) as usize];
    for ty in 0..tiles {
        for tx in 0..tiles {
            let x0 = tx * tw;
            let y0 = ty * th;
            let x1 = ((tx + 1) * tw).min(w);
            let y1 = ((ty + 1) * th).min(h);
            let lut = &mut luts[(ty * tiles + tx) as usize];
            if x0 >= x1 || y0 >= y1 {
                for (i, slot) in lut.iter_mut().enumerate() {
                    *slot = i as u8;
                }
                continue;
            }
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[img.get_pixel(x, y).0[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            clip_histogram(&mut hist, clip_limit, area);
            build_equalization_lut(&hist, area, lut);
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        // Position in tile units, measured from the first tile centre.
        let gy = (y as f32 + 0.5) / th as f32 - 0.5;
        let ty0 = (gy.floor().max(0.0) as u32).min(tiles - 1);
        let ty1 = (ty0 + 1).min(tiles - 1);
        let ay = (gy - gy.floor()).clamp(0.0, 1.0);
        for x in 0..w {
            let gx = (x as f32 + 0.5) / tw as f32 - 0.5;
            let tx0 = (gx.floor().max(0.0) as u32).min(tiles - 1);
            let tx1 = (tx0 + 1).min(tiles - 1);
            let ax = (gx - gx.floor()).clamp(0.0, 1.0);

            let v = img.get_pixel(x, y).0[0] as usize;
            let p00 = luts[(ty0 * tiles + tx0) as usize][v] as f32;
            let p01 = luts[(ty0 * tiles + tx1) as usize][v] as f32;
            let p10 = luts[(ty1 * tiles + tx0) as usize][v] as f32;
            let p11 = luts[(ty1 * tiles + tx1) as usize][v] as f32;
            let top = p00 * (1.0 - ax) + p01 * ax;
            let bottom = p10 * (1.0 - ax) + p11 * ax;
            let blended = top * (1.0 - ay) + bottom * ay;
            out.put_pixel(x, y, Luma([blended.round().clamp(0.0, 255.0) as u8]));
        }
    }
    Ok(out)
}

/// Plain global histogram equalisation.
pub(crate) fn equalize_histogram(img: &GrayImage) -> Result<GrayImage, String> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err("empty image".into());
    }
    let mut hist = [0u32; 256];
    for p in img.pixels() {
        hist[p.0[0] as usize] += 1;
    }
    let mut lut = [0u8; 256];
    build_equalization_lut(&hist, w * h, &mut lut);
    Ok(map_pixels(img, &lut))
}

fn clip_histogram(hist: &mut [u32; 256], clip_limit: f32, area: u32) {
    let limit = ((clip_limit * area as f32 / 256.0).max(1.0)) as u32;
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let per_bin = excess / 256;
    let mut remainder = excess % 256;
    for bin in hist.iter_mut() {
        *bin += per_bin;
        if remainder > 0 {
            *bin += 1;
            remainder -= 1;
        }
    }
}

/// Standard CDF equalisation; identity when the image is a single value.
fn build_equalization_lut(hist: &[u32; 256], area: u32, lut: &mut [u8; 256]) {
    let mut cdf = 0u32;
    let mut cdf_min = 0u32;
    let mut cdfs = [0u32; 256];
    for (i, &count) in hist.iter().enumerate() {
        cdf += count;
        cdfs[i] = cdf;
        if cdf_min == 0 {
            cdf_min = cdf;
        }
    }
    if area <= cdf_min {
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = i as u8;
        }
        return;
    }
    let denom = (area - cdf_min) as f32;
    for (i, slot) in lut.iter_mut().enumerate() {
        let scaled = (cdfs[i].saturating_sub(cdf_min)) as f32 / denom * 255.0;
        *slot = scaled.round().clamp(0.0, 255.0) as u8;
    }
}

fn map_pixels(img: &GrayImage, lut: &[u8; 256]) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut out = GrayImage::new(w, h);
    for (src, dst) in img.pixels().zip(out.pixels_mut()) {
        dst.0[0] = lut[src.0[0] as usize];
    }
    out
}

// ── Denoise ───────────────────────────────────────────────────────────────

/// Edge-preserving bilateral filter over a `diameter`-pixel window.
pub(crate) fn denoise_bilateral(img: &GrayImage, diameter: u32) -> Result<GrayImage, String> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err("empty image".into());
    }
    let d = (diameter.max(3) | 1) as i32;
    let radius = d / 2;
    const SIGMA_COLOR: f32 = 75.0;
    const SIGMA_SPACE: f32 = 75.0;

    let mut spatial = vec![0f32; (d * d) as usize];
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let idx = ((dy + radius) * d + (dx + radius)) as usize;
            let dist2 = (dx * dx + dy * dy) as f32;
            spatial[idx] = (-dist2 / (2.0 * SIGMA_SPACE * SIGMA_SPACE)).exp();
        }
    }
    let mut range = [0f32; 256];
    for (i, slot) in range.iter_mut().enumerate() {
        let diff = i as f32;
        *slot = (-(diff * diff) / (2.0 * SIGMA_COLOR * SIGMA_COLOR)).exp();
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let centre = img.get_pixel(x as u32, y as u32).0[0];
            let mut acc = 0f32;
            let mut weight_sum = 0f32;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let sx = (x + dx).clamp(0, w as i32 - 1) as u32;
                    let sy = (y + dy).clamp(0, h as i32 - 1) as u32;
                    let v = img.get_pixel(sx, sy).0[0];
                    let idx = ((dy + radius) * d + (dx + radius)) as usize;
                    let wgt = spatial[idx] * range[centre.abs_diff(v) as usize];
                    acc += wgt * v as f32;
                    weight_sum += wgt;
                }
            }
            out.put_pixel(
                x as u32,
                y as u32,
                Luma([(acc / weight_sum).round().clamp(0.0, 255.0) as u8]),
            );
        }
    }
    Ok(out)
}

/// Gaussian blur, sigma derived from the strength knob.
pub(crate) fn denoise_gaussian(img: &GrayImage, strength: u32) -> Result<GrayImage, String> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err("empty image".into());
    }
    let sigma = (strength.max(1) as f32 / 3.0).max(0.5);
    Ok(imageops::blur(img, sigma))
}

/// 3×3 median filter; removes salt-and-pepper speckle.
pub(crate) fn denoise_median(img: &GrayImage) -> Result<GrayImage, String> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err("empty image".into());
    }
    let mut out = GrayImage::new(w, h);
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let mut window = [0u8; 9];
            let mut i = 0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let sx = (x + dx).clamp(0, w as i32 - 1) as u32;
                    let sy = (y + dy).clamp(0, h as i32 - 1) as u32;
                    window[i] = img.get_pixel(sx, sy).0[0];
                    i += 1;
                }
            }
            window.sort_unstable();
            out.put_pixel(x as u32, y as u32, Luma([window[4]]));
        }
    }
    Ok(out)
}

// ── Binarise ──────────────────────────────────────────────────────────────

/// Adaptive mean threshold: a pixel survives (white) when it exceeds its
/// neighbourhood mean minus `c`. Computed over an integral image so the
/// block size does not affect cost.
pub(crate) fn binarize_adaptive(
    img: &GrayImage,
    block_size: u32,
    c: f32,
) -> Result<GrayImage, String> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err("empty image".into());
    }
    let block = (block_size.max(3) | 1) as i64;
    let radius = block / 2;

    let wi = w as usize + 1;
    let mut integral = vec![0u64; wi * (h as usize + 1)];
    for y in 0..h as usize {
        let mut row = 0u64;
        for x in 0..w as usize {
            row += img.get_pixel(x as u32, y as u32).0[0] as u64;
            integral[(y + 1) * wi + (x + 1)] = integral[y * wi + (x + 1)] + row;
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h as i64 {
        let y0 = (y - radius).max(0) as usize;
        let y1 = ((y + radius).min(h as i64 - 1) + 1) as usize;
        for x in 0..w as i64 {
            let x0 = (x - radius).max(0) as usize;
            let x1 = ((x + radius).min(w as i64 - 1) + 1) as usize;
            let sum = integral[y1 * wi + x1] + integral[y0 * wi + x0]
                - integral[y0 * wi + x1]
                - integral[y1 * wi + x0];
            let count = ((x1 - x0) * (y1 - y0)) as f32;
            let mean = sum as f32 / count;
            let v = img.get_pixel(x as u32, y as u32).0[0] as f32;
            let bit = if v > mean - c { 255 } else { 0 };
            out.put_pixel(x as u32, y as u32, Luma([bit]));
        }
    }
    Ok(out)
}

/// Global threshold chosen by Otsu's between-class variance criterion.
pub(crate) fn binarize_otsu(img: &GrayImage) -> Result<GrayImage, String> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err("empty image".into());
    }
    let mut hist = [0u32; 256];
    for p in img.pixels() {
        hist[p.0[0] as usize] += 1;
    }
    let level = otsu_level(&hist, (w * h) as u64);
    Ok(threshold_at(img, level))
}

/// Fixed global threshold at 127; a stable fixed point on binary input.
pub(crate) fn binarize_global(img: &GrayImage) -> Result<GrayImage, String> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err("empty image".into());
    }
    Ok(threshold_at(img, 127))
}

pub(crate) fn otsu_level(hist: &[u32; 256], total: u64) -> u8 {
    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();
    let mut sum_bg = 0f64;
    let mut weight_bg = 0f64;
    let mut best_score = 0f64;
    let mut best_level = 0u8;
    for t in 0..256usize {
        weight_bg += hist[t] as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total as f64 - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += t as f64 * hist[t] as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let between = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if between > best_score {
            best_score = between;
            best_level = t as u8;
        }
    }
    best_level
}

fn threshold_at(img: &GrayImage, level: u8) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut out = GrayImage::new(w, h);
    for (src, dst) in img.pixels().zip(out.pixels_mut()) {
        dst.0[0] = if src.0[0] > level { 255 } else { 0 };
    }
    out
}

// ── Morphology ────────────────────────────────────────────────────────────

/// 2×2 opening (erosion then dilation); fills single-pixel white holes
/// inside dark strokes and smooths ragged glyph edges. Isolated dark
/// specks are the median filter's problem, not this one's.
pub(crate) fn morph_open(img: &GrayImage) -> Result<GrayImage, String> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err("empty image".into());
    }
    let eroded = morph_2x2(img, true);
    Ok(morph_2x2(&eroded, false))
}

fn morph_2x2(img: &GrayImage, take_min: bool) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut v = img.get_pixel(x, y).0[0];
            for (dx, dy) in [(1u32, 0u32), (0, 1), (1, 1)] {
                let sx = (x + dx).min(w - 1);
                let sy = (y + dy).min(h - 1);
                let s = img.get_pixel(sx, sy).0[0];
                v = if take_min { v.min(s) } else { v.max(s) };
            }
            out.put_pixel(x, y, Luma([v]));
        }
    }
    out
}

// ── Deskew ────────────────────────────────────────────────────────────────

/// Estimate the correction angle (degrees) that makes text lines
/// horizontal, by maximising the sharpness of the horizontal projection
/// profile over candidate rotations.
///
/// Fails on pages with too little foreground to carry a signal (blank
/// pages, placeholders); callers degrade to no rotation.
pub(crate) fn estimate_skew(img: &GrayImage, max_angle: f32) -> Result<f32, String> {
    let (w, h) = img.dimensions();
    if w < 8 || h < 8 {
        return Err(format!("image too small to estimate skew ({w}x{h})"));
    }

    // Work on a bounded copy so the sweep stays cheap on 300-DPI pages.
    let longest = w.max(h);
    let work: GrayImage = if longest > 800 {
        let scale = 800.0 / longest as f32;
        imageops::resize(
            img,
            ((w as f32 * scale).round() as u32).max(1),
            ((h as f32 * scale).round() as u32).max(1),
            FilterType::Triangle,
        )
    } else {
        img.clone()
    };
    let (ww, wh) = work.dimensions();

    let mut dark: Vec<(f32, f32)> = Vec::new();
    for y in 0..wh {
        for x in 0..ww {
            if work.get_pixel(x, y).0[0] < 128 {
                dark.push((x as f32, y as f32));
            }
        }
    }
    if dark.len() < 64 {
        return Err(format!(
            "only {} foreground pixels; not enough to estimate skew",
            dark.len()
        ));
    }

    let bins = (ww + wh + 2) as usize;
    let offset = ww as f32;
    let mut counts = vec![0u32; bins];
    let mut best_angle = 0.0f32;
    let mut best_score = -1.0f64;

    let max_angle = max_angle.abs().min(45.0);
    let step = 0.25f32;
    let mut angle = -max_angle;
    while angle <= max_angle + 1e-4 {
        let (sin, cos) = angle.to_radians().sin_cos();
        counts.iter_mut().for_each(|c| *c = 0);
        for &(x, y) in &dark {
            let projected = x * sin + y * cos + offset;
            let idx = (projected as usize).min(bins - 1);
            counts[idx] += 1;
        }
        let score: f64 = counts.iter().map(|&c| (c as f64) * (c as f64)).sum();
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
        angle += step;
    }

    // Below the sweep resolution there is nothing worth resampling for.
    if best_angle.abs() < 0.1 {
        best_angle = 0.0;
    }
    Ok(best_angle)
}

/// Rotate around the image centre with bilinear sampling, filling exposed
/// corners with white.
pub(crate) fn rotate_about_center(img: &GrayImage, degrees: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = w as f32 / 2.0;
    let cy = h as f32 / 2.0;

    let mut out = GrayImage::from_pixel(w, h, Luma([255]));
    for y in 0..h {
        for x in 0..w {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let sx = cos * dx + sin * dy + cx;
            let sy = -sin * dx + cos * dy + cy;
            if sx >= 0.0 && sy >= 0.0 && sx <= (w - 1) as f32 && sy <= (h - 1) as f32 {
                out.put_pixel(x, y, Luma([bilinear_sample(img, sx, sy)]));
            }
        }
    }
    out
}

fn bilinear_sample(img: &GrayImage, x: f32, y: f32) -> u8 {
    let (w, h) = img.dimensions();
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let ax = x - x0 as f32;
    let ay = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0).0[0] as f32;
    let p01 = img.get_pixel(x1, y0).0[0] as f32;
    let p10 = img.get_pixel(x0, y1).0[0] as f32;
    let p11 = img.get_pixel(x1, y1).0[0] as f32;
    let top = p00 * (1.0 - ax) + p01 * ax;
    let bottom = p10 * (1.0 - ax) + p11 * ax;
    (top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnhancementConfig;

    fn constant(w: u32, h: u32, v: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([v]))
    }

    /// Horizontal black bars on white, a crude page of text lines.
    fn lined_page() -> GrayImage {
        let mut img = constant(240, 240, 255);
        for band in 0..6u32 {
            let top = 30 + band * 32;
            for y in top..top + 6 {
                for x in 20..220 {
                    img.put_pixel(x, y, Luma([0]));
                }
            }
        }
        img
    }

    #[test]
    fn disabled_config_passes_input_through() {
        let img = DynamicImage::ImageLuma8(lined_page());
        let out = enhance(&img, &EnhancementConfig::disabled());
        assert!(out.warnings.is_empty());
        assert_eq!(out.image.to_luma8(), img.to_luma8());
    }

    #[test]
    fn global_binarization_is_idempotent() {
        let img = lined_page();
        let once = binarize_global(&img).unwrap();
        let twice = binarize_global(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn otsu_binarization_is_idempotent() {
        let img = lined_page();
        let once = binarize_otsu(&img).unwrap();
        let twice = binarize_otsu(&once).unwrap();
        assert_eq!(once, twice);
        assert!(once.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn grayscale_conversion_is_idempotent() {
        let img = DynamicImage::ImageLuma8(lined_page());
        assert_eq!(img.to_luma8(), DynamicImage::ImageLuma8(img.to_luma8()).to_luma8());
    }

    #[test]
    fn otsu_level_splits_a_bimodal_histogram() {
        let mut hist = [0u32; 256];
        hist[40] = 500;
        hist[200] = 500;
        let level = otsu_level(&hist, 1000);
        assert!((40..200).contains(&(level as usize)), "level {level}");
    }

    #[test]
    fn adaptive_threshold_keeps_flat_regions_white() {
        let img = constant(32, 32, 128);
        let out = binarize_adaptive(&img, 11, 2.0).unwrap();
        assert!(out.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn histogram_equalization_stretches_to_full_range() {
        let mut img = constant(20, 20, 100);
        for y in 0..20 {
            for x in 0..10 {
                img.put_pixel(x, y, Luma([140]));
            }
        }
        let out = equalize_histogram(&img).unwrap();
        let min = out.pixels().map(|p| p.0[0]).min().unwrap();
        let max = out.pixels().map(|p| p.0[0]).max().unwrap();
        assert_eq!(min, 0);
        assert_eq!(max, 255);
    }

    #[test]
    fn clahe_leaves_constant_images_constant() {
        let img = constant(64, 64, 180);
        let out = equalize_clahe(&img, 3.0, 8).unwrap();
        let first = out.get_pixel(0, 0).0[0];
        assert!(out.pixels().all(|p| p.0[0] == first));
    }

    #[test]
    fn median_filter_removes_lone_speck() {
        let mut img = constant(9, 9, 255);
        img.put_pixel(4, 4, Luma([0]));
        let out = denoise_median(&img).unwrap();
        assert_eq!(out.get_pixel(4, 4).0[0], 255);
    }

    #[test]
    fn bilateral_keeps_constant_images_constant() {
        let img = constant(16, 16, 90);
        let out = denoise_bilateral(&img, 9).unwrap();
        assert!(out.pixels().all(|p| p.0[0] == 90));
    }

    #[test]
    fn morph_open_fills_white_pinholes_in_strokes() {
        let mut img = constant(12, 12, 0);
        img.put_pixel(6, 6, Luma([255]));
        let out = morph_open(&img).unwrap();
        assert!(out.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn morph_open_does_not_remove_dark_specks() {
        let mut img = constant(12, 12, 255);
        img.put_pixel(6, 6, Luma([0]));
        let out = morph_open(&img).unwrap();
        let dark = out.pixels().filter(|p| p.0[0] == 0).count();
        assert_eq!(dark, 1, "pepper survives opening; median handles it");
    }

    #[test]
    fn skew_estimate_is_near_zero_for_straight_lines() {
        let angle = estimate_skew(&lined_page(), 5.0).unwrap();
        assert!(angle.abs() < 0.6, "angle {angle}");
    }

    #[test]
    fn skew_estimate_recovers_an_applied_rotation() {
        let rotated = rotate_about_center(&lined_page(), 3.0);
        let correction = estimate_skew(&rotated, 5.0).unwrap();
        assert!(
            (correction + 3.0).abs() < 1.0,
            "expected ≈ -3.0, got {correction}"
        );
    }

    #[test]
    fn skew_estimate_fails_on_blank_pages() {
        let err = estimate_skew(&constant(100, 100, 255), 5.0).unwrap_err();
        assert!(err.contains("foreground"), "got: {err}");
    }

    #[test]
    fn blank_page_degrades_deskew_and_keeps_going() {
        let img = DynamicImage::ImageLuma8(constant(64, 64, 255));
        let out = enhance(&img, &EnhancementConfig::default());
        assert_eq!(out.image.to_luma8().dimensions(), (64, 64));
        assert!(out
            .warnings
            .iter()
            .any(|w| w.stage == EnhanceStage::Deskew));
    }

    #[test]
    fn rotation_preserves_dimensions() {
        let img = lined_page();
        let out = rotate_about_center(&img, -2.5);
        assert_eq!(out.dimensions(), img.dimensions());
    }

    #[test]
    fn enhancement_with_fixed_config_is_deterministic() {
        let img = DynamicImage::ImageLuma8(lined_page());
        let cfg = EnhancementConfig::default();
        let a = enhance(&img, &cfg);
        let b = enhance(&img, &cfg);
        assert_eq!(a.image.to_luma8(), b.image.to_luma8());
    }
}
