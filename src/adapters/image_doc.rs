use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use super::DocumentAdapter;
use crate::error::ErrorKind;
use crate::unit::{PipelineUnit, Surface, UnitId, UnitKind};

/// A raster image is a single unit. Output keeps the source format.
pub struct ImageAdapter {
    format: ImageFormat,
}

impl ImageAdapter {
    pub fn new(format: ImageFormat) -> Self {
        Self { format }
    }
}

impl DocumentAdapter for ImageAdapter {
    fn open(&self, document: usize, bytes: &[u8]) -> Result<Vec<PipelineUnit>, ErrorKind> {
        let image = image::load_from_memory_with_format(bytes, self.format).map_err(|err| {
            ErrorKind::UnsupportedFormat(format!("failed to decode {:?} image: {err}", self.format))
        })?;
        Ok(vec![PipelineUnit::new(
            UnitId { document, index: 0 },
            UnitKind::Image,
            Surface::Raster(image.to_rgba8()),
        )])
    }

    fn reassemble(&self, original: &[u8], surfaces: &[Option<Surface>]) -> Result<Vec<u8>> {
        match surfaces {
            [Some(Surface::Raster(image))] => encode(image.clone(), self.format),
            [None] => Ok(original.to_vec()),
            _ => Err(anyhow!("image document expects one raster surface")),
        }
    }
}

pub(crate) fn encode(image: image::RgbaImage, format: ImageFormat) -> Result<Vec<u8>> {
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8()),
        _ => DynamicImage::ImageRgba8(image),
    };
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .with_context(|| format!("failed to encode {:?} image", format))?;
    Ok(bytes)
}
