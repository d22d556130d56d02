use image::RgbaImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::script::Script;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BBoxPx {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BBoxPx {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.w)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }

    /// Intersection with a `width` x `height` surface, `None` when empty.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BBoxPx> {
        let x2 = self.right().min(width);
        let y2 = self.bottom().min(height);
        if self.x >= x2 || self.y >= y2 {
            return None;
        }
        Some(BBoxPx::new(self.x, self.y, x2 - self.x, y2 - self.y))
    }

    /// Grows the box by `margin` on every side, clipped to the surface.
    pub fn expand(&self, margin: u32, width: u32, height: u32) -> BBoxPx {
        let x = self.x.saturating_sub(margin);
        let y = self.y.saturating_sub(margin);
        let x2 = self.right().saturating_add(margin).min(width);
        let y2 = self.bottom().saturating_add(margin).min(height);
        BBoxPx::new(x, y, x2.saturating_sub(x), y2.saturating_sub(y))
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Footprint of a region in unit-local pixels. The polygon, when present,
/// lies inside the bounding box.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Geometry {
    pub bbox: BBoxPx,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polygon: Option<Vec<(i32, i32)>>,
}

impl Geometry {
    pub fn from_bbox(bbox: BBoxPx) -> Self {
        Self {
            bbox,
            polygon: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UnitId {
    pub document: usize,
    pub index: usize,
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.document, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RegionId(pub usize);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A detected piece of text. Never modified after the detector returns it.
#[derive(Debug, Clone, Serialize)]
pub struct TextRegion {
    pub id: RegionId,
    pub geometry: Geometry,
    pub text: String,
    pub script: Option<Script>,
    pub language: Option<String>,
    pub confidence: f32,
    pub orientation: Orientation,
    pub unit: UnitId,
    /// Overlaps another region of the same unit.
    pub overlaps: bool,
    /// Below the confidence threshold; kept but never translated.
    pub low_confidence: bool,
}

/// Laid-out text with the style attributes of its container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRun {
    pub text: String,
    pub attributes: BTreeMap<String, String>,
}

impl TextRun {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub enum Surface {
    Raster(RgbaImage),
    Text(TextRun),
}

impl Surface {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Surface::Raster(image) => Some(image.dimensions()),
            Surface::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Image,
    PdfPage,
    ParagraphRun,
    Cell,
    SlideShape,
    ChartText,
}

/// One independently processable surface of a document.
#[derive(Debug, Clone)]
pub struct PipelineUnit {
    pub id: UnitId,
    pub kind: UnitKind,
    pub surface: Surface,
    pub regions: Vec<TextRegion>,
}

impl PipelineUnit {
    pub fn new(id: UnitId, kind: UnitKind, surface: Surface) -> Self {
        Self {
            id,
            kind,
            surface,
            regions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_drops_boxes_outside_the_surface() {
        let bbox = BBoxPx::new(90, 10, 20, 20);
        assert_eq!(bbox.clamp_to(100, 100), Some(BBoxPx::new(90, 10, 10, 20)));
        assert_eq!(BBoxPx::new(120, 0, 5, 5).clamp_to(100, 100), None);
        assert_eq!(BBoxPx::new(10, 10, 0, 5).clamp_to(100, 100), None);
    }

    #[test]
    fn expand_is_clipped() {
        let bbox = BBoxPx::new(1, 1, 10, 10);
        assert_eq!(bbox.expand(2, 12, 100), BBoxPx::new(0, 0, 12, 13));
    }
}
