use image::{DynamicImage, GrayImage, Luma, RgbaImage};

const MAX_SCALED_WIDTH: u32 = 6000;
const BINARIZE_THRESHOLD: u8 = 166;

/// Recognizer inputs for one surface: a binarized and a contrast-stretched
/// grayscale copy, both upscaled by `scale`.
pub(super) fn variants(image: &RgbaImage, scale: u32) -> Vec<DynamicImage> {
    let luma = flatten_to_luma(image);
    let (width, height) = luma.dimensions();
    let resized = if scale > 1 {
        image::imageops::resize(
            &luma,
            width.saturating_mul(scale),
            height.saturating_mul(scale),
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        luma
    };

    let stretched = contrast_stretch(&resized);
    let binary = binarize(&stretched, BINARIZE_THRESHOLD);
    vec![
        DynamicImage::ImageLuma8(binary),
        DynamicImage::ImageLuma8(stretched),
    ]
}

/// Small images are upscaled up to 3x; wide ones less.
pub(super) fn scale_for(width: u32) -> u32 {
    let mut scale = 3u32;
    while width.saturating_mul(scale) > MAX_SCALED_WIDTH && scale > 1 {
        scale -= 1;
    }
    scale
}

/// Alpha is composited over white before the luma conversion.
fn flatten_to_luma(image: &RgbaImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut luma = GrayImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let over_white = |channel: u8| channel as f32 * alpha + 255.0 * (1.0 - alpha);
        let value = 0.299 * over_white(r) + 0.587 * over_white(g) + 0.114 * over_white(b);
        luma.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
    }
    luma
}

fn contrast_stretch(image: &GrayImage) -> GrayImage {
    let (min, max) = image
        .pixels()
        .fold((255u8, 0u8), |(min, max), pixel| (min.min(pixel[0]), max.max(pixel[0])));
    if max <= min {
        return image.clone();
    }

    let scale = 255.0 / (max as f32 - min as f32);
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        pixel[0] = (pixel[0].saturating_sub(min) as f32 * scale).round() as u8;
    }
    output
}

fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        pixel[0] = if pixel[0] > threshold { 255 } else { 0 };
    }
    output
}
