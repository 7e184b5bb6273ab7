//! The opaque text-detection boundary.
//!
//! The pipeline never assumes anything about the OCR engine beyond one
//! call: give it an image path, get back *something* describing detected
//! text. Engines disagree wildly about what that something looks like —
//! paired description/geometry lists, span triples, keyed records, bare
//! strings — so the contract is an explicit tagged union,
//! [`DetectorOutput`], with one variant per shape observed in practice
//! plus a fallback arm for everything else. The normaliser in
//! [`crate::pipeline::extract`] folds every variant into the same
//! canonical [`crate::output::TextRegion`] list.
//!
//! # Why a tagged union instead of duck typing?
//!
//! Branching on "does this value have a `description` key?" scatters the
//! shape knowledge across the codebase and silently misclassifies new
//! shapes. With an enum, classification happens in exactly one place
//! ([`DetectorOutput::from_json`]), unknown shapes land visibly in
//! [`DetectorOutput::Other`], and the normaliser's match is exhaustive.
//!
//! Implementations of [`TextDetector`] are free to construct variants
//! directly; detectors that talk to an external process over JSON (like
//! the bundled [`CommandDetector`]) go through `from_json`.

use std::path::Path;
use std::process::Command;

use serde_json::Value;

use crate::error::DetectorError;

// ── Capability trait ──────────────────────────────────────────────────────

/// An opaque text-detection/recognition capability.
///
/// `detect` is synchronous and possibly slow; the pipeline always invokes
/// it from the blocking thread pool. Implementations must be `Send + Sync`
/// because one detector instance is shared across a whole batch — but the
/// pipeline still calls it from one page at a time per document, so a
/// `Mutex` around stateful internals is acceptable.
pub trait TextDetector: Send + Sync {
    /// Run detection on one page image.
    fn detect(&self, image: &Path) -> Result<DetectorOutput, DetectorError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "detector"
    }
}

// ── Output shapes ─────────────────────────────────────────────────────────

/// Everything a detector may hand back, as an explicit tagged union.
///
/// Variants (a)–(e) are the shapes real engines emit; [`Self::Other`] is
/// the fallback arm for anything unclassifiable, which the normaliser
/// converts best-effort at low confidence or drops.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorOutput {
    /// (a) A mapping with paired `description`/`geometry` lists: one text
    /// string per region, one vertex polygon per region, index-aligned.
    Paired {
        descriptions: Vec<String>,
        geometries: Vec<Vec<[f32; 2]>>,
    },
    /// (b) A sequence of (geometry, text, confidence) triples, confidence
    /// optional.
    Spans(Vec<(Geometry, String, Option<f32>)>),
    /// (c) A sequence of keyed records; text, confidence, and vertices sit
    /// under engine-specific key aliases.
    Records(Vec<serde_json::Map<String, Value>>),
    /// (d) A sequence of bare text lines.
    Lines(Vec<String>),
    /// (e) A single recognised string.
    Text(String),
    /// (f) Any other shape; normalised best-effort at confidence 0.5, or
    /// dropped when it stringifies to nothing meaningful.
    Other(Value),
}

/// Region geometry as a flat box or a vertex polygon.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// `[min_x, min_y, max_x, max_y]`.
    Box([f32; 4]),
    /// Arbitrary vertex list, `[x, y]` each.
    Polygon(Vec<[f32; 2]>),
}

impl Geometry {
    /// Axis-aligned bounding box; `[0.0; 4]` for an empty polygon.
    pub fn to_bbox(&self) -> [f32; 4] {
        match self {
            Geometry::Box(b) => *b,
            Geometry::Polygon(pts) => polygon_bbox(pts),
        }
    }
}

/// Min/max envelope of a vertex list; `[0.0; 4]` when empty.
pub(crate) fn polygon_bbox(pts: &[[f32; 2]]) -> [f32; 4] {
    if pts.is_empty() {
        return [0.0; 4];
    }
    let mut bbox = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
    for p in pts {
        bbox[0] = bbox[0].min(p[0]);
        bbox[1] = bbox[1].min(p[1]);
        bbox[2] = bbox[2].max(p[0]);
        bbox[3] = bbox[3].max(p[1]);
    }
    bbox
}

// ── JSON classification ───────────────────────────────────────────────────

impl DetectorOutput {
    /// Classify a JSON payload into the matching variant.
    ///
    /// Classification is conservative: a sequence is only promoted to
    /// [`Self::Spans`] or [`Self::Lines`] when *every* element fits the
    /// shape; mixed or unrecognised payloads fall through to
    /// [`Self::Other`] so nothing is silently misread.
    pub fn from_json(value: Value) -> DetectorOutput {
        match value {
            Value::String(s) => DetectorOutput::Text(s),
            Value::Array(ref items) if !items.is_empty() => {
                if items.iter().all(Value::is_string) {
                    let lines = items
                        .iter()
                        .map(|v| v.as_str().unwrap_or_default().to_string())
                        .collect();
                    return DetectorOutput::Lines(lines);
                }
                if items.iter().all(Value::is_object) {
                    let records = items
                        .iter()
                        .filter_map(|v| v.as_object().cloned())
                        .collect();
                    return DetectorOutput::Records(records);
                }
                if let Some(spans) = items
                    .iter()
                    .map(parse_span_triple)
                    .collect::<Option<Vec<_>>>()
                {
                    return DetectorOutput::Spans(spans);
                }
                DetectorOutput::Other(value)
            }
            Value::Object(ref map) => {
                if let Some(paired) = parse_paired(map) {
                    return paired;
                }
                DetectorOutput::Other(value)
            }
            other => DetectorOutput::Other(other),
        }
    }
}

/// `[geometry, text]` or `[geometry, text, confidence]`.
fn parse_span_triple(v: &Value) -> Option<(Geometry, String, Option<f32>)> {
    let parts = v.as_array()?;
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let geometry = parse_geometry(&parts[0])?;
    let text = parts[1].as_str()?.to_string();
    let confidence = match parts.get(2) {
        Some(c) => Some(c.as_f64()? as f32),
        None => None,
    };
    Some((geometry, text, confidence))
}

/// A mapping with index-aligned `description` and geometry lists.
///
/// The geometry key varies by engine (`geometry`, `bounding_poly`,
/// `vertices`); alignment is preserved even for entries that fail to
/// parse, so text N never picks up polygon N+1.
fn parse_paired(map: &serde_json::Map<String, Value>) -> Option<DetectorOutput> {
    let descriptions = map.get("description")?.as_array()?;
    let geometries = ["geometry", "bounding_poly", "vertices"]
        .iter()
        .find_map(|k| map.get(*k))?
        .as_array()?;

    let descriptions: Vec<String> = descriptions
        .iter()
        .map(|v| v.as_str().unwrap_or_default().to_string())
        .collect();
    let geometries: Vec<Vec<[f32; 2]>> = geometries
        .iter()
        .map(|g| parse_polygon(g).unwrap_or_default())
        .collect();

    Some(DetectorOutput::Paired {
        descriptions,
        geometries,
    })
}

/// A flat 4-number box, or a vertex polygon.
pub(crate) fn parse_geometry(v: &Value) -> Option<Geometry> {
    if let Some(arr) = v.as_array() {
        if arr.len() == 4 && arr.iter().all(Value::is_number) {
            let mut b = [0.0f32; 4];
            for (i, n) in arr.iter().enumerate() {
                b[i] = n.as_f64()? as f32;
            }
            return Some(Geometry::Box(b));
        }
    }
    parse_polygon(v).map(Geometry::Polygon)
}

/// A vertex list: `[[x, y], ...]`, `[{"x":..,"y":..}, ...]`, or an object
/// wrapping one under a `vertices` key.
pub(crate) fn parse_polygon(v: &Value) -> Option<Vec<[f32; 2]>> {
    let arr = match v {
        Value::Array(a) => a,
        Value::Object(m) => m.get("vertices")?.as_array()?,
        _ => return None,
    };
    if arr.is_empty() {
        return None;
    }
    arr.iter().map(parse_point).collect()
}

/// `[x, y]` or `{"x":.., "y":..}`.
fn parse_point(v: &Value) -> Option<[f32; 2]> {
    match v {
        Value::Array(xy) if xy.len() == 2 => {
            Some([xy[0].as_f64()? as f32, xy[1].as_f64()? as f32])
        }
        Value::Object(m) => Some([
            m.get("x")?.as_f64()? as f32,
            m.get("y")?.as_f64()? as f32,
        ]),
        _ => None,
    }
}

// ── Command detector ──────────────────────────────────────────────────────

/// A [`TextDetector`] that shells out to an external OCR command.
///
/// The command runs once per page image. A literal `{}` inside an argument
/// is replaced by the image path; when no argument carries the
/// placeholder, the path is appended as the final argument. Stdout is
/// parsed as JSON and classified via [`DetectorOutput::from_json`];
/// non-JSON stdout is treated as a single recognised string. A non-zero
/// exit status is a [`DetectorError`], which the pipeline degrades to an
/// empty page rather than propagating.
///
/// # Example
/// ```no_run
/// use pdfocr::CommandDetector;
///
/// // Runs `tesseract <image> stdout --psm 6` per page.
/// let detector = CommandDetector::new("tesseract")
///     .arg("{}")
///     .arg("stdout")
///     .arg("--psm")
///     .arg("6");
/// ```
#[derive(Debug, Clone)]
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
    name: String,
}

impl CommandDetector {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        let name = Path::new(&program)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("command")
            .to_string();
        CommandDetector {
            program,
            args: Vec::new(),
            name,
        }
    }

    /// Append a fixed argument. `{}` inside it expands to the image path.
    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    /// Append several fixed arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl TextDetector for CommandDetector {
    fn detect(&self, image: &Path) -> Result<DetectorOutput, DetectorError> {
        let image_arg = image.to_string_lossy();
        let mut command = Command::new(&self.program);
        let mut substituted = false;
        for a in &self.args {
            if a.contains("{}") {
                command.arg(a.replace("{}", &image_arg));
                substituted = true;
            } else {
                command.arg(a);
            }
        }
        if !substituted {
            command.arg(image);
        }

        let output = command
            .output()
            .map_err(|e| DetectorError::new(format!("failed to run '{}': {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DetectorError::new(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        match serde_json::from_str::<Value>(trimmed) {
            Ok(v) => Ok(DetectorOutput::from_json(v)),
            Err(_) => Ok(DetectorOutput::Text(trimmed.to_string())),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_classifies_as_text() {
        let out = DetectorOutput::from_json(json!("Hello"));
        assert_eq!(out, DetectorOutput::Text("Hello".into()));
    }

    #[test]
    fn string_array_classifies_as_lines() {
        let out = DetectorOutput::from_json(json!(["one", "two"]));
        assert_eq!(out, DetectorOutput::Lines(vec!["one".into(), "two".into()]));
    }

    #[test]
    fn object_array_classifies_as_records() {
        let out = DetectorOutput::from_json(json!([
            {"text": "a", "confidence": 0.8},
            {"word": "b"}
        ]));
        match out {
            DetectorOutput::Records(recs) => assert_eq!(recs.len(), 2),
            other => panic!("expected Records, got {other:?}"),
        }
    }

    #[test]
    fn triple_array_classifies_as_spans() {
        let out = DetectorOutput::from_json(json!([
            [[0, 0, 10, 10], "boxed", 0.9],
            [[[1, 1], [4, 1], [4, 3], [1, 3]], "polygonal"]
        ]));
        match out {
            DetectorOutput::Spans(spans) => {
                assert_eq!(spans.len(), 2);
                assert_eq!(spans[0].0, Geometry::Box([0.0, 0.0, 10.0, 10.0]));
                assert_eq!(spans[0].2, Some(0.9));
                assert_eq!(spans[1].2, None);
            }
            other => panic!("expected Spans, got {other:?}"),
        }
    }

    #[test]
    fn paired_lists_classify_with_alignment() {
        let out = DetectorOutput::from_json(json!({
            "description": ["alpha", "beta"],
            "bounding_poly": [
                {"vertices": [{"x": 0, "y": 0}, {"x": 5, "y": 0}, {"x": 5, "y": 2}]},
                "garbage"
            ]
        }));
        match out {
            DetectorOutput::Paired {
                descriptions,
                geometries,
            } => {
                assert_eq!(descriptions, vec!["alpha".to_string(), "beta".to_string()]);
                assert_eq!(geometries.len(), 2);
                assert_eq!(geometries[0].len(), 3);
                assert!(geometries[1].is_empty(), "bad entry keeps its slot");
            }
            other => panic!("expected Paired, got {other:?}"),
        }
    }

    #[test]
    fn mixed_array_falls_through_to_other() {
        let out = DetectorOutput::from_json(json!(["text", 42]));
        assert!(matches!(out, DetectorOutput::Other(_)));
    }

    #[test]
    fn scalars_and_empty_collections_are_other() {
        assert!(matches!(
            DetectorOutput::from_json(json!(17)),
            DetectorOutput::Other(_)
        ));
        assert!(matches!(
            DetectorOutput::from_json(json!([])),
            DetectorOutput::Other(_)
        ));
        assert!(matches!(
            DetectorOutput::from_json(json!(null)),
            DetectorOutput::Other(_)
        ));
    }

    #[test]
    fn polygon_bbox_is_min_max_envelope() {
        let g = Geometry::Polygon(vec![[1.0, 2.0], [5.0, 0.0], [3.0, 9.0]]);
        assert_eq!(g.to_bbox(), [1.0, 0.0, 5.0, 9.0]);
    }

    #[test]
    fn command_detector_takes_name_from_program_stem() {
        let d = CommandDetector::new("/usr/local/bin/tesseract").arg("--psm").arg("6");
        assert_eq!(d.name(), "tesseract");
    }

    #[cfg(unix)]
    #[test]
    fn command_detector_substitutes_the_placeholder() {
        let d = CommandDetector::new("echo").arg("before").arg("{}").arg("after");
        let out = d.detect(Path::new("/tmp/scan.png")).unwrap();
        assert_eq!(out, DetectorOutput::Text("before /tmp/scan.png after".into()));
    }

    #[cfg(unix)]
    #[test]
    fn command_detector_appends_path_without_placeholder() {
        let d = CommandDetector::new("echo");
        let out = d.detect(Path::new("/tmp/scan.png")).unwrap();
        assert_eq!(out, DetectorOutput::Text("/tmp/scan.png".into()));
    }
}
