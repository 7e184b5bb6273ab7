//! Text extraction: run the detector and normalise whatever comes back.
//!
//! Detector payloads arrive as any [`DetectorOutput`] variant; this module
//! folds them all into one canonical list of [`TextRegion`]s with the same
//! guarantees regardless of shape:
//!
//! - region ids are sequential from zero within each image, assigned after
//!   every filter has run;
//! - region text is trimmed and never empty;
//! - score-less shapes get [`DEFAULT_CONFIDENCE`], unclassifiable payloads
//!   that still stringify to something meaningful get
//!   [`FALLBACK_CONFIDENCE`];
//! - geometry collapses to an axis-aligned `[min_x, min_y, max_x, max_y]`
//!   box, `[0.0; 4]` when the detector carried none.
//!
//! ## Why does `extract` swallow detector errors?
//!
//! A page whose detection fails is still a page; the document must keep
//! its shape (`pages.len() == page_count`, ascending order). `extract`
//! logs the failure and returns an empty list so the caller always gets a
//! value per page; [`TextExtractor::try_extract`] exposes the error for
//! callers that record degradations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::detector::{parse_geometry, parse_polygon, polygon_bbox, DetectorOutput, TextDetector};
use crate::error::DetectorError;
use crate::output::TextRegion;

/// Confidence assigned when the detector reports none.
pub const DEFAULT_CONFIDENCE: f32 = 0.95;

/// Confidence assigned to best-effort conversions of unclassifiable
/// payloads.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

/// Stringified payloads that carry no information and are dropped.
const NOISE_STRINGS: [&str; 4] = ["None", "null", "[]", "{}"];

// ── Extractor ─────────────────────────────────────────────────────────────

/// Runs a shared detector over page images and normalises its output.
///
/// Cloning is cheap; clones share the underlying detector.
#[derive(Clone)]
pub struct TextExtractor {
    detector: Arc<dyn TextDetector>,
    confidence_threshold: f32,
}

impl std::fmt::Debug for TextExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextExtractor")
            .field("detector", &self.detector.name())
            .field("confidence_threshold", &self.confidence_threshold)
            .finish()
    }
}

impl TextExtractor {
    pub fn new(detector: Arc<dyn TextDetector>) -> Self {
        TextExtractor {
            detector,
            confidence_threshold: 0.0,
        }
    }

    /// Drop regions below `threshold` (clamped to `[0, 1]`) after
    /// normalisation. Ids are assigned after the filter, so the surviving
    /// regions always count from zero.
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Detect and normalise one image; never fails.
    ///
    /// Detector errors are logged and produce an empty list, keeping the
    /// one-value-per-page contract intact.
    pub fn extract(&self, image_path: &Path) -> Vec<TextRegion> {
        match self.try_extract(image_path) {
            Ok(regions) => regions,
            Err(e) => {
                warn!(
                    "Detector '{}' failed on {}: {e}",
                    self.detector.name(),
                    image_path.display()
                );
                Vec::new()
            }
        }
    }

    /// Detect and normalise one image, surfacing the detector error.
    pub fn try_extract(&self, image_path: &Path) -> Result<Vec<TextRegion>, DetectorError> {
        let output = self.detector.detect(image_path)?;
        Ok(self.normalize(output, image_path))
    }

    /// Fold a detector payload into canonical regions for `image_path`.
    pub fn normalize(&self, output: DetectorOutput, image_path: &Path) -> Vec<TextRegion> {
        let mut candidates: Vec<(String, f32, [f32; 4])> = Vec::new();

        match output {
            DetectorOutput::Paired {
                descriptions,
                geometries,
            } => {
                for (i, text) in descriptions.into_iter().enumerate() {
                    let bbox = geometries
                        .get(i)
                        .map(|pts| polygon_bbox(pts))
                        .unwrap_or([0.0; 4]);
                    candidates.push((text, DEFAULT_CONFIDENCE, bbox));
                }
            }
            DetectorOutput::Spans(spans) => {
                for (geometry, text, confidence) in spans {
                    candidates.push((
                        text,
                        confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0),
                        geometry.to_bbox(),
                    ));
                }
            }
            DetectorOutput::Records(records) => {
                for record in &records {
                    match record_text(record) {
                        Some(text) => candidates.push((
                            text,
                            record_confidence(record),
                            record_bbox(record),
                        )),
                        None => debug!("Skipping record without a text field"),
                    }
                }
            }
            DetectorOutput::Lines(lines) => {
                for line in lines {
                    candidates.push((line, DEFAULT_CONFIDENCE, [0.0; 4]));
                }
            }
            DetectorOutput::Text(s) => candidates.push((s, DEFAULT_CONFIDENCE, [0.0; 4])),
            DetectorOutput::Other(value) => match stringify_other(&value) {
                Some(text) => candidates.push((text, FALLBACK_CONFIDENCE, [0.0; 4])),
                None => debug!("Dropping unclassifiable detector payload"),
            },
        }

        candidates
            .into_iter()
            .filter_map(|(text, confidence, bbox)| {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some((trimmed.to_string(), confidence, bbox))
                }
            })
            .filter(|(_, confidence, _)| *confidence >= self.confidence_threshold)
            .enumerate()
            .map(|(id, (text, confidence, bbox))| {
                TextRegion::new(id, text, confidence, bbox, image_path)
            })
            .collect()
    }

    /// Extract from several images in order, one at a time.
    ///
    /// Sequential on purpose: the detector is a shared, possibly stateful
    /// resource, and page order inside a document is part of the output
    /// contract. `progress` receives `(completed, total, path)` after each
    /// image.
    pub fn batch_extract(
        &self,
        paths: &[PathBuf],
        progress: Option<&(dyn Fn(usize, usize, &Path) + Send + Sync)>,
    ) -> Vec<(PathBuf, Vec<TextRegion>)> {
        let total = paths.len();
        let mut results = Vec::with_capacity(total);
        for (i, path) in paths.iter().enumerate() {
            let regions = self.extract(path);
            if let Some(cb) = progress {
                cb(i + 1, total, path);
            }
            results.push((path.clone(), regions));
        }
        results
    }
}

// ── Record field aliases ──────────────────────────────────────────────────

/// First text-bearing field under the known key aliases.
fn record_text(record: &serde_json::Map<String, Value>) -> Option<String> {
    ["description", "text", "word", "content"]
        .iter()
        .find_map(|k| record.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

/// First numeric confidence under the known key aliases, clamped to
/// `[0, 1]`; [`DEFAULT_CONFIDENCE`] when absent.
fn record_confidence(record: &serde_json::Map<String, Value>) -> f32 {
    ["confidence", "score", "prob"]
        .iter()
        .find_map(|k| record.get(*k).and_then(Value::as_f64))
        .map(|c| (c as f32).clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE)
}

/// Geometry under `vertices` or a flat box alias; `[0.0; 4]` when absent.
fn record_bbox(record: &serde_json::Map<String, Value>) -> [f32; 4] {
    if let Some(pts) = record.get("vertices").and_then(parse_polygon) {
        return polygon_bbox(&pts);
    }
    for key in ["bbox", "bounding_box", "box"] {
        if let Some(g) = record.get(key).and_then(parse_geometry) {
            return g.to_bbox();
        }
    }
    [0.0; 4]
}

/// Best-effort string form of an unclassified payload; `None` when it
/// stringifies to nothing meaningful.
fn stringify_other(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let trimmed = text.trim();
    if trimmed.is_empty() || NOISE_STRINGS.contains(&trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Geometry;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a queue of detector results, one per call.
    struct ScriptedDetector {
        script: Mutex<VecDeque<Result<DetectorOutput, DetectorError>>>,
    }

    impl ScriptedDetector {
        fn new(script: Vec<Result<DetectorOutput, DetectorError>>) -> Self {
            ScriptedDetector {
                script: Mutex::new(script.into()),
            }
        }
    }

    impl TextDetector for ScriptedDetector {
        fn detect(&self, _image: &Path) -> Result<DetectorOutput, DetectorError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(DetectorOutput::Text(String::new())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn extractor() -> TextExtractor {
        TextExtractor::new(Arc::new(ScriptedDetector::new(Vec::new())))
    }

    fn records(v: Value) -> DetectorOutput {
        match DetectorOutput::from_json(v) {
            out @ DetectorOutput::Records(_) => out,
            other => panic!("fixture is not a record list: {other:?}"),
        }
    }

    #[test]
    fn every_variant_normalizes_to_the_same_regions() {
        let poly_a = vec![[0.0, 0.0], [10.0, 0.0], [10.0, 4.0], [0.0, 4.0]];
        let poly_b = vec![[0.0, 6.0], [12.0, 6.0], [12.0, 10.0], [0.0, 10.0]];

        let variants = vec![
            DetectorOutput::Paired {
                descriptions: vec!["Hello".into(), "world".into()],
                geometries: vec![poly_a.clone(), poly_b.clone()],
            },
            DetectorOutput::Spans(vec![
                (Geometry::Polygon(poly_a.clone()), "Hello".into(), None),
                (Geometry::Polygon(poly_b.clone()), "world".into(), None),
            ]),
            records(json!([
                {"text": "Hello", "vertices": [[0, 0], [10, 0], [10, 4], [0, 4]]},
                {"text": "world", "vertices": [[0, 6], [12, 6], [12, 10], [0, 10]]}
            ])),
        ];

        let ex = extractor();
        for variant in variants {
            let regions = ex.normalize(variant, Path::new("p.png"));
            assert_eq!(regions.len(), 2);
            assert_eq!(regions[0].id, 0);
            assert_eq!(regions[1].id, 1);
            assert_eq!(regions[0].text, "Hello");
            assert_eq!(regions[1].text, "world");
            assert_eq!(regions[0].confidence, DEFAULT_CONFIDENCE);
            assert_eq!(regions[0].bbox, [0.0, 0.0, 10.0, 4.0]);
            assert_eq!(regions[1].bbox, [0.0, 6.0, 12.0, 10.0]);
        }
    }

    #[test]
    fn single_string_gets_default_confidence_and_zero_bbox() {
        let regions = extractor().normalize(
            DetectorOutput::Text("Hello".into()),
            Path::new("p.png"),
        );
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].id, 0);
        assert_eq!(regions[0].text, "Hello");
        assert_eq!(regions[0].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(regions[0].bbox, [0.0; 4]);
    }

    #[test]
    fn blank_lines_never_survive() {
        let regions = extractor().normalize(
            DetectorOutput::Lines(vec!["ok".into(), "   ".into(), String::new()]),
            Path::new("p.png"),
        );
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "ok");
        assert_eq!(regions[0].id, 0);
    }

    #[test]
    fn span_text_is_trimmed() {
        let regions = extractor().normalize(
            DetectorOutput::Spans(vec![(
                Geometry::Box([1.0, 2.0, 3.0, 4.0]),
                "  padded  ".into(),
                Some(0.8),
            )]),
            Path::new("p.png"),
        );
        assert_eq!(regions[0].text, "padded");
        assert_eq!(regions[0].confidence, 0.8);
        assert_eq!(regions[0].bbox, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn noise_fallbacks_are_dropped() {
        let ex = extractor();
        for payload in [json!(null), json!([]), json!({}), json!("None"), json!("  ")] {
            let regions = ex.normalize(DetectorOutput::Other(payload.clone()), Path::new("p.png"));
            assert!(regions.is_empty(), "payload {payload} should drop");
        }
    }

    #[test]
    fn meaningful_fallbacks_keep_low_confidence() {
        let regions = extractor().normalize(
            DetectorOutput::Other(json!(3.25)),
            Path::new("p.png"),
        );
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "3.25");
        assert_eq!(regions[0].confidence, FALLBACK_CONFIDENCE);
    }

    #[test]
    fn record_key_aliases_are_recognised() {
        let regions = extractor().normalize(
            records(json!([
                {"word": "w", "score": 0.7},
                {"content": "c"},
                {"confidence": 0.99}
            ])),
            Path::new("p.png"),
        );
        assert_eq!(regions.len(), 2, "text-less record is skipped");
        assert_eq!(regions[0].text, "w");
        assert_eq!(regions[0].confidence, 0.7);
        assert_eq!(regions[1].text, "c");
        assert_eq!(regions[1].confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn record_confidence_is_clamped() {
        let regions = extractor().normalize(
            records(json!([
                {"text": "hot", "confidence": 1.7},
                {"text": "cold", "confidence": -0.3}
            ])),
            Path::new("p.png"),
        );
        assert_eq!(regions[0].confidence, 1.0);
        assert_eq!(regions[1].confidence, 0.0);
    }

    #[test]
    fn paired_entry_without_geometry_gets_zero_bbox() {
        let regions = extractor().normalize(
            DetectorOutput::Paired {
                descriptions: vec!["a".into(), "b".into()],
                geometries: vec![vec![[2.0, 2.0], [6.0, 8.0]]],
            },
            Path::new("p.png"),
        );
        assert_eq!(regions[0].bbox, [2.0, 2.0, 6.0, 8.0]);
        assert_eq!(regions[1].bbox, [0.0; 4]);
    }

    #[test]
    fn ids_are_sequential_after_threshold_filter() {
        let ex = extractor().with_confidence_threshold(0.5);
        let regions = ex.normalize(
            DetectorOutput::Spans(vec![
                (Geometry::Box([0.0; 4]), "keep-a".into(), Some(0.9)),
                (Geometry::Box([0.0; 4]), "drop".into(), Some(0.2)),
                (Geometry::Box([0.0; 4]), "keep-b".into(), Some(0.5)),
            ]),
            Path::new("p.png"),
        );
        assert_eq!(regions.len(), 2, "0.5 meets a 0.5 threshold");
        assert_eq!(regions[0].text, "keep-a");
        assert_eq!(regions[0].id, 0);
        assert_eq!(regions[1].text, "keep-b");
        assert_eq!(regions[1].id, 1);
    }

    #[test]
    fn detector_failure_yields_an_empty_page() {
        let ex = TextExtractor::new(Arc::new(ScriptedDetector::new(vec![Err(
            DetectorError::new("engine crashed"),
        )])));
        assert!(ex.extract(Path::new("p.png")).is_empty());
    }

    #[test]
    fn try_extract_surfaces_the_error() {
        let ex = TextExtractor::new(Arc::new(ScriptedDetector::new(vec![Err(
            DetectorError::new("engine crashed"),
        )])));
        let err = ex.try_extract(Path::new("p.png")).unwrap_err();
        assert!(err.to_string().contains("engine crashed"));
    }

    #[test]
    fn batch_extract_preserves_input_order_and_reports_progress() {
        let ex = TextExtractor::new(Arc::new(ScriptedDetector::new(vec![
            Ok(DetectorOutput::Text("first".into())),
            Err(DetectorError::new("flaky")),
            Ok(DetectorOutput::Text("third".into())),
        ])));
        let paths = vec![
            PathBuf::from("a.png"),
            PathBuf::from("b.png"),
            PathBuf::from("c.png"),
        ];
        let seen = Mutex::new(Vec::new());
        let results = ex.batch_extract(
            &paths,
            Some(&|done, total, _path: &Path| {
                seen.lock().unwrap().push((done, total));
            }),
        );

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, paths[0]);
        assert_eq!(results[1].0, paths[1]);
        assert_eq!(results[2].0, paths[2]);
        assert_eq!(results[0].1[0].text, "first");
        assert!(results[1].1.is_empty(), "failed image keeps its slot");
        assert_eq!(results[2].1[0].text, "third");
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }
}
