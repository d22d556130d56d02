use anyhow::{Result, anyhow};
use image::RgbaImage;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::script::Script;
use crate::settings::Settings;
use crate::unit::{Orientation, TextRegion};

mod font;
mod layout;
mod svg;

pub use font::{EstimatedMeasure, FontChoice, FontTable, TextMeasure};
pub use layout::{ELLIPSIS, Layout, LayoutParams, fit_horizontal, fit_vertical};
pub use svg::Direction;

/// Draws translated text into a region of an already erased surface.
pub trait RegionRenderer: Send + Sync {
    fn render(
        &self,
        image: &mut RgbaImage,
        region: &TextRegion,
        text: &str,
        target: Script,
    ) -> Result<RenderReport, ErrorKind>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderReport {
    pub family: String,
    pub font_size: f32,
    pub lines: usize,
    /// Text was cut at the minimum size and ends in an ellipsis.
    pub overflow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextColor {
    /// Black or white, whichever contrasts with the erased background.
    Auto,
    Fixed([u8; 3]),
}

impl TextColor {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("auto") {
            return Ok(TextColor::Auto);
        }
        let hex = value.trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(anyhow!("invalid text colour '{}', expected auto or #rrggbb", value));
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16);
        Ok(TextColor::Fixed([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
    }

    fn resolve(&self, image: &RgbaImage, left: u32, top: u32, width: u32, height: u32) -> [u8; 3] {
        match self {
            TextColor::Fixed(rgb) => *rgb,
            TextColor::Auto => {
                let mut sum = 0f64;
                let mut count = 0u64;
                for y in top..top + height {
                    for x in left..left + width {
                        let pixel = image.get_pixel(x, y);
                        sum += 0.299 * pixel[0] as f64
                            + 0.587 * pixel[1] as f64
                            + 0.114 * pixel[2] as f64;
                        count += 1;
                    }
                }
                if count > 0 && sum / (count as f64) < 128.0 {
                    [255, 255, 255]
                } else {
                    [0, 0, 0]
                }
            }
        }
    }
}

pub struct Compositor {
    fonts: Arc<FontTable>,
    params: LayoutParams,
    color: TextColor,
}

impl Compositor {
    pub fn new(fonts: Arc<FontTable>, params: LayoutParams, color: TextColor) -> Self {
        Self {
            fonts,
            params,
            color,
        }
    }

    pub fn from_settings(settings: &Settings, fonts: Arc<FontTable>) -> Result<Self> {
        Ok(Self::new(
            fonts,
            LayoutParams::from_settings(settings),
            TextColor::parse(&settings.text_color)?,
        ))
    }
}

impl RegionRenderer for Compositor {
    fn render(
        &self,
        image: &mut RgbaImage,
        region: &TextRegion,
        text: &str,
        target: Script,
    ) -> Result<RenderReport, ErrorKind> {
        let (width, height) = image.dimensions();
        let bbox = region.geometry.bbox.clamp_to(width, height).ok_or_else(|| {
            ErrorKind::RenderSkipped(format!("region {} lies outside the surface", region.id))
        })?;
        let font = self.fonts.select(target, text)?;

        let direction = if region.orientation == Orientation::Vertical && target.supports_vertical() {
            Direction::Vertical
        } else if target.is_rtl() {
            Direction::Rtl
        } else {
            Direction::Ltr
        };
        let layout = match direction {
            Direction::Vertical => fit_vertical(text, bbox.w as f32, bbox.h as f32, &self.params),
            _ => fit_horizontal(text, bbox.w as f32, bbox.h as f32, &self.params, &font),
        };
        if layout.overflow {
            warn!(
                region = %region.id,
                unit = %region.unit,
                font_size = layout.font_size,
                "translated text truncated to fit region"
            );
        }

        let color = self.color.resolve(image, bbox.x, bbox.y, bbox.w, bbox.h);
        let document = svg::region_svg(
            &layout,
            bbox.w,
            bbox.h,
            &font.family,
            color,
            direction,
            self.params.padding,
        );
        let pixmap = svg::rasterize(&document, bbox.w, bbox.h, self.fonts.database())
            .map_err(|err| ErrorKind::RenderSkipped(format!("region {}: {err:#}", region.id)))?;
        svg::composite_over(image, &pixmap, bbox.x, bbox.y);
        debug!(
            region = %region.id,
            family = %font.family,
            font_size = layout.font_size,
            lines = layout.lines.len(),
            "region rendered"
        );

        Ok(RenderReport {
            family: font.family.clone(),
            font_size: layout.font_size,
            lines: layout.lines.len(),
            overflow: layout.overflow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erase::tests::region_at;
    use crate::unit::BBoxPx;
    use image::Rgba;

    fn compositor() -> Compositor {
        let fonts = FontTable::estimated([
            (Script::Latin, "sans-serif"),
            (Script::Han, "Noto Sans CJK SC"),
        ]);
        Compositor::new(Arc::new(fonts), LayoutParams::default(), TextColor::Auto)
    }

    #[test]
    fn cjk_text_fits_a_short_wide_box() {
        let mut image = RgbaImage::from_pixel(300, 100, Rgba([240, 240, 240, 255]));
        let region = region_at(BBoxPx::new(50, 30, 200, 40));
        let report = compositor()
            .render(&mut image, &region, "你好", Script::Han)
            .unwrap();
        assert_eq!(report.family, "Noto Sans CJK SC");
        assert!(report.font_size <= 36.0 && report.font_size >= 10.0);
        assert_eq!(report.lines, 1);
        assert!(!report.overflow);
    }

    #[test]
    fn render_never_writes_outside_the_box() {
        let before = RgbaImage::from_pixel(120, 60, Rgba([10, 20, 30, 255]));
        let mut after = before.clone();
        let region = region_at(BBoxPx::new(10, 10, 50, 20));
        compositor()
            .render(&mut after, &region, "Hello there", Script::Latin)
            .unwrap();
        for (x, y, pixel) in before.enumerate_pixels() {
            if !region.geometry.bbox.contains(x, y) {
                assert_eq!(pixel, after.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn unknown_script_reports_font_unavailable() {
        let mut image = RgbaImage::new(50, 50);
        let err = compositor()
            .render(&mut image, &region_at(BBoxPx::new(0, 0, 40, 20)), "שלום", Script::Hebrew)
            .unwrap_err();
        assert_eq!(err, ErrorKind::FontUnavailable("hebrew".into()));
    }

    #[test]
    fn region_outside_surface_is_skipped() {
        let mut image = RgbaImage::new(50, 50);
        let err = compositor()
            .render(&mut image, &region_at(BBoxPx::new(60, 0, 10, 10)), "Hi", Script::Latin)
            .unwrap_err();
        assert!(matches!(err, ErrorKind::RenderSkipped(_)));
    }

    #[test]
    fn auto_colour_contrasts_with_background() {
        let dark = RgbaImage::from_pixel(4, 4, Rgba([20, 20, 20, 255]));
        let light = RgbaImage::from_pixel(4, 4, Rgba([230, 230, 230, 255]));
        assert_eq!(TextColor::Auto.resolve(&dark, 0, 0, 4, 4), [255, 255, 255]);
        assert_eq!(TextColor::Auto.resolve(&light, 0, 0, 4, 4), [0, 0, 0]);
        assert_eq!(TextColor::parse("#FF8000").unwrap(), TextColor::Fixed([255, 128, 0]));
        assert!(TextColor::parse("orange").is_err());
    }
}
