use anyhow::Result;
use image::RgbaImage;

use crate::script::Script;
use crate::text::sanitize_recognized;
use crate::unit::{BBoxPx, Geometry, Orientation, RegionId, TextRegion, TextRun, UnitId};

mod geom;
mod merge;
mod parse;
mod preprocess;
mod tesseract;

pub use tesseract::{TesseractDetector, list_tesseract_languages};

/// Detector output before region ids and flags are assigned.
#[derive(Debug, Clone)]
pub struct RawRegion {
    pub geometry: Geometry,
    pub text: String,
    /// 0..1
    pub confidence: f32,
    /// `None` lets the shape of the box decide.
    pub orientation: Option<Orientation>,
}

/// Locates and recognizes text on a raster surface. Implementations are
/// blocking; the pipeline runs them off the async workers.
pub trait TextDetector: Send + Sync {
    fn detect(&self, image: &RgbaImage, hints: &[String]) -> Result<Vec<RawRegion>>;
}

/// Turns raw detections into the unit's regions: reading order, ids,
/// script and language, orientation, overlap and confidence flags.
pub fn finalize_regions(
    unit: UnitId,
    raw: Vec<RawRegion>,
    hints: &[String],
    confidence_threshold: f32,
) -> Vec<TextRegion> {
    let mut raw = raw
        .into_iter()
        .filter_map(|mut region| {
            region.text = sanitize_recognized(&region.text);
            (!region.text.is_empty() && region.geometry.bbox.area() > 0).then_some(region)
        })
        .collect::<Vec<_>>();
    raw.sort_by_key(|region| (region.geometry.bbox.y, region.geometry.bbox.x));

    let boxes = raw
        .iter()
        .map(|region| region.geometry.bbox)
        .collect::<Vec<_>>();

    raw.into_iter()
        .enumerate()
        .map(|(idx, region)| {
            let script = Script::detect(&region.text);
            let language = script
                .and_then(|script| script.language_tag())
                .map(str::to_string)
                .or_else(|| hints.first().cloned());
            let orientation = region
                .orientation
                .unwrap_or_else(|| infer_orientation(&region.geometry.bbox, script));
            let confidence = region.confidence.clamp(0.0, 1.0);
            let overlaps = boxes
                .iter()
                .enumerate()
                .any(|(other, bbox)| other != idx && geom::intersects(bbox, &region.geometry.bbox));
            TextRegion {
                id: RegionId(idx),
                geometry: region.geometry,
                text: region.text,
                script,
                language,
                confidence,
                orientation,
                unit,
                overlaps,
                low_confidence: confidence < confidence_threshold,
            }
        })
        .collect()
}

/// A structured run is its own single region: the text is already known
/// exactly, so confidence is 1 and the geometry is empty.
pub fn structured_regions(unit: UnitId, run: &TextRun) -> Vec<TextRegion> {
    let text = run.text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let script = Script::detect(text);
    vec![TextRegion {
        id: RegionId(0),
        geometry: Geometry::from_bbox(BBoxPx::new(0, 0, 0, 0)),
        text: text.to_string(),
        script,
        language: script
            .and_then(|script| script.language_tag())
            .map(str::to_string),
        confidence: 1.0,
        orientation: Orientation::Horizontal,
        unit,
        overlaps: false,
        low_confidence: false,
    }]
}

fn infer_orientation(bbox: &BBoxPx, script: Option<Script>) -> Orientation {
    let cjk = script.is_some_and(|script| script.supports_vertical());
    if cjk && bbox.h >= bbox.w.saturating_mul(2) {
        Orientation::Vertical
    } else {
        Orientation::Horizontal
    }
}
