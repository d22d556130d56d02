use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
use imageproc::morphology::dilate;
use imageproc::point::Point;
use imageproc::rect::Rect;
use tracing::debug;

use crate::error::ErrorKind;
use crate::settings::{ErasureMethod, Settings};
use crate::unit::{BBoxPx, TextRegion};

mod diffusion;
mod fluid;

/// Removes a region's text and reconstructs the background. Pixels outside
/// the returned footprint are never written.
pub trait RegionEraser: Send + Sync {
    fn erase(&self, image: &mut RgbaImage, region: &TextRegion) -> Result<BBoxPx, ErrorKind>;
}

#[derive(Debug, Clone)]
pub struct Eraser {
    pub method: ErasureMethod,
    /// Anti-alias margin around the region geometry.
    pub margin: u32,
    /// How far to look for background samples.
    pub radius: u32,
    pub iterations: u32,
}

impl Eraser {
    pub fn new(method: ErasureMethod) -> Self {
        Self {
            method,
            margin: 2,
            radius: 5,
            iterations: 200,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            method: settings.erasure_method,
            margin: settings.erasure_margin,
            radius: settings.erasure_radius.max(1),
            iterations: settings.erasure_iterations,
        }
    }
}

impl RegionEraser for Eraser {
    fn erase(&self, image: &mut RgbaImage, region: &TextRegion) -> Result<BBoxPx, ErrorKind> {
        let (width, height) = image.dimensions();
        let mut patch = Patch::capture(image, region, self.margin, self.radius, width, height)?;
        diffusion::fill(&mut patch, self.radius);
        if self.method == ErasureMethod::Quality {
            let iterations = fluid::relax(&mut patch, self.iterations);
            debug!(region = %region.id, iterations, "harmonic fill converged");
        }
        patch.write_back(image);
        Ok(patch.footprint)
    }
}

/// Working copy of the pixels around one region.
pub(crate) struct Patch {
    /// Surface area covered by `pixels`.
    window: BBoxPx,
    /// Region geometry plus margin; every masked pixel lies inside it.
    footprint: BBoxPx,
    pixels: Vec<[f32; 4]>,
    masked: Vec<bool>,
    known: Vec<bool>,
}

impl Patch {
    fn capture(
        image: &RgbaImage,
        region: &TextRegion,
        margin: u32,
        context: u32,
        width: u32,
        height: u32,
    ) -> Result<Self, ErrorKind> {
        let bbox = region.geometry.bbox;
        if bbox.area() == 0 {
            return Err(ErrorKind::RenderSkipped(format!(
                "region {} has zero area",
                region.id
            )));
        }
        let bbox = bbox.clamp_to(width, height).ok_or_else(|| {
            ErrorKind::RenderSkipped(format!("region {} lies outside the surface", region.id))
        })?;
        let footprint = bbox.expand(margin, width, height);
        let window = footprint.expand(context, width, height);

        let mask = build_mask(region, bbox, margin, window);
        let len = (window.w * window.h) as usize;
        let mut pixels = Vec::with_capacity(len);
        let mut masked = Vec::with_capacity(len);
        for y in 0..window.h {
            for x in 0..window.w {
                let Rgba(channels) = *image.get_pixel(window.x + x, window.y + y);
                pixels.push(channels.map(f32::from));
                let inside = mask.get_pixel(x, y)[0] > 0
                    && footprint.contains(window.x + x, window.y + y);
                masked.push(inside);
            }
        }
        let known = masked.iter().map(|value| !value).collect::<Vec<_>>();
        if !known.iter().any(|value| *value) {
            return Err(ErrorKind::RenderSkipped(format!(
                "no background around region {}",
                region.id
            )));
        }
        Ok(Self {
            window,
            footprint,
            pixels,
            masked,
            known,
        })
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y * self.window.w + x) as usize
    }

    fn write_back(&self, image: &mut RgbaImage) {
        for y in 0..self.window.h {
            for x in 0..self.window.w {
                let idx = self.index(x, y);
                if !self.masked[idx] {
                    continue;
                }
                let value = self.pixels[idx].map(|channel| channel.round().clamp(0.0, 255.0) as u8);
                image.put_pixel(self.window.x + x, self.window.y + y, Rgba(value));
            }
        }
    }
}

/// Region shape in window coordinates, dilated by `margin`.
fn build_mask(region: &TextRegion, bbox: BBoxPx, margin: u32, window: BBoxPx) -> GrayImage {
    let mut mask = GrayImage::new(window.w, window.h);
    let ox = window.x as i32;
    let oy = window.y as i32;
    let polygon = region
        .geometry
        .polygon
        .as_deref()
        .map(|points| polygon_points(points, ox, oy))
        .filter(|points| points.len() >= 3);
    match polygon {
        Some(points) => draw_polygon_mut(&mut mask, &points, Luma([255])),
        None => draw_filled_rect_mut(
            &mut mask,
            Rect::at(bbox.x as i32 - ox, bbox.y as i32 - oy).of_size(bbox.w, bbox.h),
            Luma([255]),
        ),
    }
    if margin == 0 {
        return mask;
    }
    dilate(&mask, Norm::LInf, margin.min(u8::MAX as u32) as u8)
}

/// Offsets polygon points into the window and drops the closing point,
/// which the polygon fill rejects.
fn polygon_points(points: &[(i32, i32)], ox: i32, oy: i32) -> Vec<Point<i32>> {
    let mut out: Vec<Point<i32>> = Vec::with_capacity(points.len());
    for (x, y) in points {
        let point = Point::new(x - ox, y - oy);
        if out.last() != Some(&point) {
            out.push(point);
        }
    }
    if out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::unit::{Geometry, Orientation, RegionId, UnitId};

    pub(crate) fn region_at(bbox: BBoxPx) -> TextRegion {
        TextRegion {
            id: RegionId(0),
            geometry: Geometry::from_bbox(bbox),
            text: "Hello".into(),
            script: None,
            language: None,
            confidence: 0.9,
            orientation: Orientation::Horizontal,
            unit: UnitId {
                document: 0,
                index: 0,
            },
            overlaps: false,
            low_confidence: false,
        }
    }

    /// Horizontal gradient with a black "text" bar across the middle.
    pub(crate) fn sample_image() -> RgbaImage {
        let mut image = RgbaImage::from_fn(80, 40, |x, _| Rgba([100 + x as u8, 150, 200, 255]));
        for y in 15..25 {
            for x in 20..60 {
                image.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        image
    }

    fn assert_outside_untouched(before: &RgbaImage, after: &RgbaImage, footprint: BBoxPx) {
        for (x, y, pixel) in before.enumerate_pixels() {
            if !footprint.contains(x, y) {
                assert_eq!(pixel, after.get_pixel(x, y), "pixel {},{} changed", x, y);
            }
        }
    }

    #[test]
    fn both_methods_keep_outside_pixels_identical() {
        for method in [ErasureMethod::Fast, ErasureMethod::Quality] {
            let before = sample_image();
            let mut after = before.clone();
            let region = region_at(BBoxPx::new(20, 15, 40, 10));
            let footprint = Eraser::new(method).erase(&mut after, &region).unwrap();
            assert_eq!(footprint, BBoxPx::new(18, 13, 44, 14));
            assert_outside_untouched(&before, &after, footprint);
        }
    }

    #[test]
    fn erased_text_takes_the_background_colour() {
        for method in [ErasureMethod::Fast, ErasureMethod::Quality] {
            let mut image = sample_image();
            Eraser::new(method)
                .erase(&mut image, &region_at(BBoxPx::new(20, 15, 40, 10)))
                .unwrap();
            let pixel = image.get_pixel(40, 20);
            assert!(pixel[0] >= 110 && pixel[0] <= 170, "red {}", pixel[0]);
            assert!((pixel[1] as i32 - 150).abs() <= 2);
            assert!((pixel[2] as i32 - 200).abs() <= 2);
        }
    }

    #[test]
    fn polygon_geometry_limits_the_mask() {
        let before = sample_image();
        let mut after = before.clone();
        let mut region = region_at(BBoxPx::new(20, 15, 40, 10));
        region.geometry.polygon = Some(vec![(20, 15), (59, 15), (59, 24), (20, 24), (20, 15)]);
        let eraser = Eraser {
            margin: 0,
            ..Eraser::new(ErasureMethod::Fast)
        };
        let footprint = eraser.erase(&mut after, &region).unwrap();
        assert_outside_untouched(&before, &after, footprint);
        assert_ne!(after.get_pixel(40, 20), before.get_pixel(40, 20));
    }

    #[test]
    fn degenerate_regions_are_skipped() {
        let mut image = sample_image();
        let eraser = Eraser::new(ErasureMethod::Fast);
        let zero = eraser.erase(&mut image, &region_at(BBoxPx::new(10, 10, 0, 5)));
        assert!(matches!(zero, Err(ErrorKind::RenderSkipped(_))));
        let outside = eraser.erase(&mut image, &region_at(BBoxPx::new(200, 10, 5, 5)));
        assert!(matches!(outside, Err(ErrorKind::RenderSkipped(_))));
        assert_eq!(image, sample_image());
    }

    #[test]
    fn whole_surface_region_has_nothing_to_sample() {
        let mut image = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        let err = Eraser::new(ErasureMethod::Quality)
            .erase(&mut image, &region_at(BBoxPx::new(0, 0, 10, 10)))
            .unwrap_err();
        assert!(matches!(err, ErrorKind::RenderSkipped(_)));
    }
}
