use anyhow::{Context, Result, anyhow};
use image::{ImageFormat, RgbaImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;
use tracing::{debug, warn};

use super::DocumentAdapter;
use super::image_doc::encode;
use crate::error::ErrorKind;
use crate::unit::{PipelineUnit, Surface, UnitId, UnitKind};

/// PDF pages are rasterized and processed as images. In the output, each
/// changed page shows its page image; every other page object is carried
/// over from the input untouched.
pub struct PdfAdapter {
    dpi: u32,
}

impl Default for PdfAdapter {
    fn default() -> Self {
        Self { dpi: 200 }
    }
}

impl DocumentAdapter for PdfAdapter {
    fn open(&self, document: usize, bytes: &[u8]) -> Result<Vec<PipelineUnit>, ErrorKind> {
        if !bytes.starts_with(b"%PDF") {
            return Err(ErrorKind::UnsupportedFormat("missing PDF header".into()));
        }
        let pages = render_pages(bytes, self.dpi)
            .map_err(|err| ErrorKind::UnsupportedFormat(format!("{err:#}")))?;
        if pages.is_empty() {
            return Err(ErrorKind::UnsupportedFormat("no pages found in pdf".into()));
        }
        debug!(pages = pages.len(), dpi = self.dpi, "pdf rasterized");
        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(index, page)| {
                PipelineUnit::new(
                    UnitId { document, index },
                    UnitKind::PdfPage,
                    Surface::Raster(page),
                )
            })
            .collect())
    }

    fn reassemble(&self, original: &[u8], surfaces: &[Option<Surface>]) -> Result<Vec<u8>> {
        let changed = surfaces
            .iter()
            .enumerate()
            .filter_map(|(index, surface)| match surface {
                Some(Surface::Raster(image)) => Some(Ok((index, image))),
                Some(Surface::Text(_)) => Some(Err(anyhow!("pdf pages must be raster surfaces"))),
                None => None,
            })
            .collect::<Result<Vec<_>>>()?;
        if changed.is_empty() {
            return Ok(original.to_vec());
        }

        let mut document =
            Document::load_mem(original).with_context(|| "failed to load original pdf")?;
        let pages = document.get_pages();
        if pages.len() != surfaces.len() {
            return Err(anyhow!(
                "pdf has {} pages but {} surfaces were given",
                pages.len(),
                surfaces.len()
            ));
        }
        let images = changed.iter().map(|(_, image)| *image).collect::<Vec<_>>();
        let rendered = Document::load_mem(&pages_to_pdf(&images, self.dpi)?)
            .with_context(|| "failed to load rendered pages")?;
        for ((index, _), rendered_id) in changed.iter().zip(rendered.get_pages().into_values()) {
            let page_id = pages
                .get(&(*index as u32 + 1))
                .copied()
                .ok_or_else(|| anyhow!("page {} not found in page tree", index + 1))?;
            replace_page(&rendered, rendered_id, &mut document, page_id)?;
        }
        debug!(
            replaced = changed.len(),
            kept = surfaces.len() - changed.len(),
            "pdf pages spliced"
        );

        let mut output = Vec::new();
        document
            .save_to(&mut output)
            .with_context(|| "failed to write pdf")?;
        Ok(output)
    }
}

/// Points a page of `target` at the content, resources and media box of a
/// page from `source`. The page keeps its place in the tree and its other
/// entries; rotation and crop box are dropped since the image already has
/// them applied.
fn replace_page(
    source: &Document,
    source_id: ObjectId,
    target: &mut Document,
    page_id: ObjectId,
) -> Result<()> {
    let page = source
        .get_dictionary(source_id)
        .with_context(|| "rendered page is not a dictionary")?;
    let mut copied = HashMap::new();
    let mut entries = Vec::new();
    for key in [b"Contents".as_slice(), b"Resources", b"MediaBox"] {
        let value = page.get(key).with_context(|| {
            format!("rendered page has no /{}", String::from_utf8_lossy(key))
        })?;
        entries.push((key.to_vec(), copy_object(source, target, value, &mut copied)));
    }

    let dict = target
        .get_dictionary_mut(page_id)
        .with_context(|| "original page is not a dictionary")?;
    for (key, value) in entries {
        dict.set(key, value);
    }
    dict.remove(b"CropBox");
    dict.remove(b"Rotate");
    Ok(())
}

/// Copies `object` and everything it references from `source` into
/// `target`. Each referenced object is copied once; `/Parent` links are
/// left out.
fn copy_object(
    source: &Document,
    target: &mut Document,
    object: &Object,
    copied: &mut HashMap<ObjectId, ObjectId>,
) -> Object {
    match object {
        Object::Reference(id) => {
            if let Some(new_id) = copied.get(id) {
                return Object::Reference(*new_id);
            }
            let Ok(referenced) = source.get_object(*id) else {
                warn!(?id, "unresolved reference in rendered page");
                return Object::Null;
            };
            let new_id = target.new_object_id();
            copied.insert(*id, new_id);
            let value = copy_object(source, target, referenced, copied);
            target.objects.insert(new_id, value);
            Object::Reference(new_id)
        }
        Object::Dictionary(dict) => Object::Dictionary(copy_dictionary(source, target, dict, copied)),
        Object::Array(items) => Object::Array(
            items
                .iter()
                .map(|item| copy_object(source, target, item, copied))
                .collect(),
        ),
        Object::Stream(stream) => {
            let mut stream = stream.clone();
            stream.dict = copy_dictionary(source, target, &stream.dict, copied);
            Object::Stream(stream)
        }
        other => other.clone(),
    }
}

fn copy_dictionary(
    source: &Document,
    target: &mut Document,
    dict: &Dictionary,
    copied: &mut HashMap<ObjectId, ObjectId>,
) -> Dictionary {
    let mut out = Dictionary::new();
    for (key, value) in dict.iter() {
        if key == b"Parent" {
            continue;
        }
        out.set(key.clone(), copy_object(source, target, value, copied));
    }
    out
}

fn render_pages(pdf_bytes: &[u8], dpi: u32) -> Result<Vec<RgbaImage>> {
    let dir = tempdir().with_context(|| "failed to create temp dir for pdf")?;
    let input_path = dir.path().join("input.pdf");
    fs::write(&input_path, pdf_bytes).with_context(|| "failed to write temp pdf")?;
    let resolution = dpi.to_string();

    let output = if command_exists("mutool") {
        Command::new("mutool")
            .args(["draw", "-r", &resolution, "-o"])
            .arg(dir.path().join("page-%03d.png"))
            .arg(&input_path)
            .output()
            .with_context(|| "failed to run mutool")?
    } else if command_exists("pdftoppm") {
        Command::new("pdftoppm")
            .args(["-png", "-r", &resolution])
            .arg(&input_path)
            .arg(dir.path().join("page"))
            .output()
            .with_context(|| "failed to run pdftoppm")?
    } else {
        return Err(anyhow!(
            "pdf rendering requires mutool or pdftoppm (install mupdf or poppler)"
        ));
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("pdf rasterizer failed: {}", stderr.trim()));
    }

    let mut paths = fs::read_dir(dir.path())
        .with_context(|| "failed to read temp pdf directory")?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| is_page_png(path))
        .collect::<Vec<_>>();
    paths.sort();
    paths
        .iter()
        .map(|path| {
            Ok(image::open(path)
                .with_context(|| format!("failed to read rendered page {}", path.display()))?
                .to_rgba8())
        })
        .collect()
}

fn is_page_png(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("page"));
    let png = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    named && png
}

fn command_exists(cmd: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(cmd).is_file())
}

fn pages_to_pdf(pages: &[&RgbaImage], dpi: u32) -> Result<Vec<u8>> {
    use printpdf::{Image, ImageTransform, Mm, PdfDocument};

    let mut doc = None;
    let mut layers = Vec::new();
    for (idx, page) in pages.iter().enumerate() {
        // printpdf links its own copy of the image crate; hand over PNG bytes.
        let png = encode((*page).clone(), ImageFormat::Png)?;
        let image = printpdf::image_crate::load_from_memory(&png)
            .with_context(|| "failed to decode page image")?;
        let image = printpdf::image_crate::DynamicImage::ImageRgb8(image.to_rgb8());
        let width_mm = px_to_mm(page.width(), dpi);
        let height_mm = px_to_mm(page.height(), dpi);
        if idx == 0 {
            let (handle, page, layer) =
                PdfDocument::new("translated", Mm(width_mm), Mm(height_mm), "Layer 1");
            doc = Some(handle);
            layers.push((page, layer, image));
        } else if let Some(handle) = doc.as_mut() {
            let (page, layer) = handle.add_page(Mm(width_mm), Mm(height_mm), format!("Layer {}", idx + 1));
            layers.push((page, layer, image));
        }
    }

    let doc = doc.ok_or_else(|| anyhow!("no pages to write"))?;
    for (page, layer, image) in layers {
        let current_layer = doc.get_page(page).get_layer(layer);
        Image::from_dynamic_image(&image).add_to_layer(
            current_layer,
            ImageTransform {
                translate_x: Some(Mm(0.0)),
                translate_y: Some(Mm(0.0)),
                rotate: None,
                scale_x: Some(1.0),
                scale_y: Some(1.0),
                dpi: Some(dpi as f32),
            },
        );
    }

    let mut buffer = Vec::new();
    {
        let mut writer = std::io::BufWriter::new(&mut buffer);
        doc.save(&mut writer).with_context(|| "failed to write pdf")?;
    }
    Ok(buffer)
}

fn px_to_mm(px: u32, dpi: u32) -> f32 {
    px as f32 / dpi.max(1) as f32 * 25.4
}
