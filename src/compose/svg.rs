use anyhow::{Context, Result, anyhow};
use image::{Rgba, RgbaImage};
use std::sync::Arc;
use tiny_skia::Pixmap;
use usvg::{Options, Tree, fontdb};

use super::layout::Layout;

/// How glyphs advance inside the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ltr,
    Rtl,
    /// Top to bottom, columns right to left.
    Vertical,
}

/// SVG document the size of the region box, clipped to it.
pub fn region_svg(
    layout: &Layout,
    width: u32,
    height: u32,
    family: &str,
    color: [u8; 3],
    direction: Direction,
    padding: f32,
) -> String {
    let size = layout.font_size;
    let fill = format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2]);
    let family = escape_xml(family);
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    );
    svg.push_str(&format!(
        r#"<clipPath id="region"><rect x="0" y="0" width="{width}" height="{height}"/></clipPath>"#
    ));
    svg.push_str(r#"<g clip-path="url(#region)">"#);

    match direction {
        Direction::Ltr | Direction::Rtl => {
            let (x, anchor) = match direction {
                Direction::Rtl => (
                    width as f32 - padding,
                    r#" text-anchor="end" direction="rtl""#,
                ),
                _ => (padding, ""),
            };
            let baseline = padding + size * 0.85;
            svg.push_str(&format!(
                r#"<text x="{x}" y="{baseline}" font-family="{family}" font-size="{size}" fill="{fill}"{anchor}>"#
            ));
            for (idx, line) in layout.lines.iter().enumerate() {
                let text = escape_xml(line);
                if idx == 0 {
                    svg.push_str(&format!(r#"<tspan x="{x}">{text}</tspan>"#));
                } else {
                    let dy = layout.line_height;
                    svg.push_str(&format!(r#"<tspan x="{x}" dy="{dy}">{text}</tspan>"#));
                }
            }
            svg.push_str("</text>");
        }
        Direction::Vertical => {
            for (column, glyphs) in layout.lines.iter().enumerate() {
                let x = width as f32 - padding - size / 2.0 - column as f32 * layout.line_height;
                for (row, ch) in glyphs.chars().enumerate() {
                    let y = padding + row as f32 * size + size * 0.85;
                    let text = escape_xml(&ch.to_string());
                    svg.push_str(&format!(
                        r#"<text x="{x}" y="{y}" font-family="{family}" font-size="{size}" fill="{fill}" text-anchor="middle">{text}</text>"#
                    ));
                }
            }
        }
    }

    svg.push_str("</g></svg>");
    svg
}

pub fn rasterize(svg: &str, width: u32, height: u32, fonts: Arc<fontdb::Database>) -> Result<Pixmap> {
    let options = Options {
        fontdb: fonts,
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse SVG")?;
    let mut pixmap =
        Pixmap::new(width, height).ok_or_else(|| anyhow!("empty SVG size {width}x{height}"))?;
    resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());
    Ok(pixmap)
}

/// Source-over blend of a premultiplied pixmap onto the image at
/// `(left, top)`. Pixels past the pixmap's extent are not touched.
pub fn composite_over(image: &mut RgbaImage, pixmap: &Pixmap, left: u32, top: u32) {
    let (img_w, img_h) = image.dimensions();
    let width = pixmap.width();
    for (idx, src) in pixmap.pixels().iter().enumerate() {
        let alpha = src.alpha() as u32;
        if alpha == 0 {
            continue;
        }
        let x = left + idx as u32 % width;
        let y = top + idx as u32 / width;
        if x >= img_w || y >= img_h {
            continue;
        }
        let Rgba(dst) = *image.get_pixel(x, y);
        let inv = 255 - alpha;
        let blend = |s: u8, d: u8| (s as u32 + (d as u32 * inv + 127) / 255).min(255) as u8;
        image.put_pixel(
            x,
            y,
            Rgba([
                blend(src.red(), dst[0]),
                blend(src.green(), dst[1]),
                blend(src.blue(), dst[2]),
                blend(src.alpha(), dst[3]),
            ]),
        );
    }
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
