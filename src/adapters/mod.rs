use anyhow::Result;
use image::ImageFormat;
use std::io::Cursor;
use std::path::Path;
use zip::ZipArchive;

use crate::error::ErrorKind;
use crate::unit::{PipelineUnit, Surface};

mod image_doc;
mod office;
mod pdf;

pub use image_doc::ImageAdapter;
pub use office::{OfficeAdapter, OfficeKind};
pub use pdf::PdfAdapter;

/// Converts a document into pipeline units and back. `reassemble` receives
/// one entry per unit, in `open` order; `None` marks a unit that failed or
/// changed nothing, and its original content is kept as it was.
pub trait DocumentAdapter: Send + Sync {
    fn open(&self, document: usize, bytes: &[u8]) -> Result<Vec<PipelineUnit>, ErrorKind>;
    fn reassemble(&self, original: &[u8], surfaces: &[Option<Surface>]) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Image(ImageFormat),
    Pdf,
    Office(OfficeKind),
}

const SUPPORTED_IMAGES: [ImageFormat; 6] = [
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::WebP,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
    ImageFormat::Gif,
];

impl DocumentFormat {
    /// Content sniffing first, then the file extension.
    pub fn detect(bytes: &[u8], path: Option<&Path>) -> Result<Self, ErrorKind> {
        let name = path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "input".to_string());
        if let Some(kind) = infer::get(bytes) {
            let mime = kind.mime_type();
            if let Some(format) = from_mime(mime, bytes) {
                return Ok(format);
            }
            if is_legacy_office(mime) {
                return Err(ErrorKind::UnsupportedFormat(format!(
                    "{name}: legacy {mime} documents are not supported"
                )));
            }
        }
        let ext = path
            .and_then(|path| path.extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        match ext.as_deref() {
            Some("doc" | "xls" | "ppt") => Err(ErrorKind::UnsupportedFormat(format!(
                "{name}: legacy office formats are not supported"
            ))),
            Some(ext) => from_extension(ext).ok_or_else(|| {
                ErrorKind::UnsupportedFormat(format!("{name}: unrecognized .{ext} file"))
            }),
            None => Err(ErrorKind::UnsupportedFormat(format!(
                "{name}: unable to detect document format"
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Image(format) => format.extensions_str().first().copied().unwrap_or("png"),
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Office(kind) => kind.extension(),
        }
    }

    pub fn adapter(&self) -> Box<dyn DocumentAdapter> {
        match self {
            DocumentFormat::Image(format) => Box::new(ImageAdapter::new(*format)),
            DocumentFormat::Pdf => Box::new(PdfAdapter::default()),
            DocumentFormat::Office(kind) => Box::new(OfficeAdapter::new(*kind)),
        }
    }
}

fn from_mime(mime: &str, bytes: &[u8]) -> Option<DocumentFormat> {
    if mime.starts_with("image/") {
        return ImageFormat::from_mime_type(mime)
            .filter(|format| SUPPORTED_IMAGES.contains(format))
            .map(DocumentFormat::Image);
    }
    match mime {
        "application/pdf" => Some(DocumentFormat::Pdf),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            Some(DocumentFormat::Office(OfficeKind::Docx))
        }
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
            Some(DocumentFormat::Office(OfficeKind::Pptx))
        }
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
            Some(DocumentFormat::Office(OfficeKind::Xlsx))
        }
        "application/zip" => office_in_zip(bytes).map(DocumentFormat::Office),
        _ => None,
    }
}

/// Office containers are zips; the main part tells them apart.
fn office_in_zip(bytes: &[u8]) -> Option<OfficeKind> {
    let archive = ZipArchive::new(Cursor::new(bytes)).ok()?;
    let has = |name: &str| archive.file_names().any(|entry| entry == name);
    if has("word/document.xml") {
        Some(OfficeKind::Docx)
    } else if has("ppt/presentation.xml") {
        Some(OfficeKind::Pptx)
    } else if has("xl/workbook.xml") {
        Some(OfficeKind::Xlsx)
    } else {
        None
    }
}

fn is_legacy_office(mime: &str) -> bool {
    matches!(
        mime,
        "application/msword"
            | "application/vnd.ms-excel"
            | "application/vnd.ms-powerpoint"
            | "application/x-ole-storage"
    )
}

fn from_extension(ext: &str) -> Option<DocumentFormat> {
    match ext {
        "pdf" => Some(DocumentFormat::Pdf),
        "docx" => Some(DocumentFormat::Office(OfficeKind::Docx)),
        "pptx" => Some(DocumentFormat::Office(OfficeKind::Pptx)),
        "xlsx" => Some(DocumentFormat::Office(OfficeKind::Xlsx)),
        _ => ImageFormat::from_extension(ext)
            .filter(|format| SUPPORTED_IMAGES.contains(format))
            .map(DocumentFormat::Image),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Write;
    use zip::ZipWriter;
    use zip::write::FileOptions;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([200, 220, 240, 255]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    pub(crate) fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn sniffs_content_before_extension() {
        let png = png_bytes(4, 4);
        assert_eq!(
            DocumentFormat::detect(&png, Some(Path::new("photo.jpg"))).unwrap(),
            DocumentFormat::Image(ImageFormat::Png)
        );
        assert_eq!(
            DocumentFormat::detect(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n", None).unwrap(),
            DocumentFormat::Pdf
        );
    }

    #[test]
    fn detects_office_containers() {
        let docx = zip_bytes(&[
            ("[Content_Types].xml", b"<Types/>"),
            ("word/document.xml", b"<w:document/>"),
        ]);
        assert_eq!(
            DocumentFormat::detect(&docx, None).unwrap(),
            DocumentFormat::Office(OfficeKind::Docx)
        );
        let xlsx = zip_bytes(&[("xl/workbook.xml", b"<workbook/>")]);
        assert_eq!(
            DocumentFormat::detect(&xlsx, Some(Path::new("book.xlsx"))).unwrap(),
            DocumentFormat::Office(OfficeKind::Xlsx)
        );
    }

    #[test]
    fn legacy_and_unknown_inputs_are_unsupported() {
        let err = DocumentFormat::detect(b"not a document", Some(Path::new("old.doc"))).unwrap_err();
        assert!(matches!(err, ErrorKind::UnsupportedFormat(_)));
        let err = DocumentFormat::detect(b"not a document", None).unwrap_err();
        assert!(matches!(err, ErrorKind::UnsupportedFormat(_)));
        let err = DocumentFormat::detect(b"plain", Some(Path::new("notes.txt"))).unwrap_err();
        assert!(matches!(err, ErrorKind::UnsupportedFormat(_)));
    }
}
