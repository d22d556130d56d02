use anyhow::{Context, Result, anyhow};
use globset::{Glob, GlobSet, GlobSetBuilder};
use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use super::DocumentAdapter;
use crate::error::ErrorKind;
use crate::unit::{PipelineUnit, Surface, TextRun, UnitId, UnitKind};

/// Spreadsheet `t` elements are text only inside shared or inline strings.
const SHARED_STRING_CONTAINERS: &[&[u8]] = &[b"si", b"is"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeKind {
    Docx,
    Pptx,
    Xlsx,
}

impl OfficeKind {
    pub fn extension(&self) -> &'static str {
        match self {
            OfficeKind::Docx => "docx",
            OfficeKind::Pptx => "pptx",
            OfficeKind::Xlsx => "xlsx",
        }
    }

    fn rules(&self) -> Vec<PartRule> {
        match self {
            OfficeKind::Docx => vec![PartRule::new(
                &[
                    "word/document.xml",
                    "word/header*.xml",
                    "word/footer*.xml",
                    "word/footnotes.xml",
                    "word/endnotes.xml",
                ],
                b"w:t",
                &[],
                UnitKind::ParagraphRun,
            )],
            OfficeKind::Pptx => vec![
                PartRule::new(
                    &[
                        "ppt/slides/slide*.xml",
                        "ppt/notesSlides/*.xml",
                        "ppt/diagrams/*.xml",
                    ],
                    b"a:t",
                    &[],
                    UnitKind::SlideShape,
                ),
                PartRule::new(&["ppt/charts/*.xml"], b"a:t", &[], UnitKind::ChartText),
            ],
            OfficeKind::Xlsx => vec![
                PartRule::new(
                    &["xl/sharedStrings.xml", "xl/worksheets/*.xml"],
                    b"t",
                    SHARED_STRING_CONTAINERS,
                    UnitKind::Cell,
                ),
                PartRule::new(&["xl/charts/*.xml"], b"a:t", &[], UnitKind::ChartText),
            ],
        }
    }
}

/// Which zip parts carry text, and which element holds it.
struct PartRule {
    parts: GlobSet,
    tag: &'static [u8],
    /// The tag only counts inside one of these elements, when non-empty.
    containers: &'static [&'static [u8]],
    kind: UnitKind,
}

impl PartRule {
    fn new(
        patterns: &[&str],
        tag: &'static [u8],
        containers: &'static [&'static [u8]],
        kind: UnitKind,
    ) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            }
        }
        Self {
            parts: builder.build().unwrap_or_else(|_| GlobSet::empty()),
            tag,
            containers,
            kind,
        }
    }

    fn is_container(&self, name: &[u8]) -> bool {
        self.containers.iter().any(|container| *container == name)
    }
}

/// Every non-blank text node of the matching parts becomes one unit.
/// All other zip entries are copied unchanged.
pub struct OfficeAdapter {
    kind: OfficeKind,
    rules: Vec<PartRule>,
}

impl OfficeAdapter {
    pub fn new(kind: OfficeKind) -> Self {
        Self {
            kind,
            rules: kind.rules(),
        }
    }

    fn rule_for(&self, name: &str) -> Option<&PartRule> {
        self.rules.iter().find(|rule| rule.parts.is_match(name))
    }
}

impl DocumentAdapter for OfficeAdapter {
    fn open(&self, document: usize, bytes: &[u8]) -> Result<Vec<PipelineUnit>, ErrorKind> {
        self.collect_units(document, bytes).map_err(|err| {
            ErrorKind::UnsupportedFormat(format!("{}: {err:#}", self.kind.extension()))
        })
    }

    fn reassemble(&self, original: &[u8], surfaces: &[Option<Surface>]) -> Result<Vec<u8>> {
        let mut replacements = surfaces.iter().map(|surface| match surface {
            Some(Surface::Text(run)) => Ok(Some(run.text.clone())),
            Some(Surface::Raster(_)) => Err(anyhow!("office units must be text surfaces")),
            None => Ok(None),
        });

        let mut archive =
            ZipArchive::new(Cursor::new(original)).with_context(|| "failed to read zip archive")?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for idx in 0..archive.len() {
            let mut file = archive
                .by_index(idx)
                .with_context(|| "failed to read zip entry")?;
            let name = file.name().to_string();
            let Some(rule) = self.rule_for(&name).filter(|_| !file.is_dir()) else {
                writer
                    .raw_copy_file(file)
                    .with_context(|| format!("failed to copy zip entry {name}"))?;
                continue;
            };

            let options = FileOptions::default().compression_method(file.compression());
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .with_context(|| format!("failed to read zip entry {name}"))?;
            drop(file);

            let mut failure = None;
            let output = rewrite_text_nodes(&data, rule, |_| match replacements.next() {
                Some(Ok(text)) => text,
                Some(Err(err)) => {
                    failure.get_or_insert(err);
                    None
                }
                None => {
                    failure.get_or_insert(anyhow!("fewer surfaces than text runs"));
                    None
                }
            })
            .with_context(|| format!("failed to rewrite {name}"))?;
            if let Some(err) = failure {
                return Err(err);
            }

            writer
                .start_file(name.as_str(), options)
                .with_context(|| "failed to write zip entry")?;
            writer
                .write_all(&output)
                .with_context(|| "failed to write zip content")?;
        }
        if replacements.next().is_some() {
            return Err(anyhow!("more surfaces than text runs"));
        }

        Ok(writer
            .finish()
            .with_context(|| "failed to finalize zip output")?
            .into_inner())
    }
}

impl OfficeAdapter {
    fn collect_units(&self, document: usize, bytes: &[u8]) -> Result<Vec<PipelineUnit>> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).with_context(|| "failed to read zip archive")?;
        let mut units = Vec::new();
        for idx in 0..archive.len() {
            let mut file = archive
                .by_index(idx)
                .with_context(|| "failed to read zip entry")?;
            let name = file.name().to_string();
            let Some(rule) = self.rule_for(&name).filter(|_| !file.is_dir()) else {
                continue;
            };
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .with_context(|| format!("failed to read zip entry {name}"))?;

            rewrite_text_nodes(&data, rule, |text| {
                let run = TextRun::new(text)
                    .with_attribute("part", name.as_str())
                    .with_attribute("tag", String::from_utf8_lossy(rule.tag));
                units.push(PipelineUnit::new(
                    UnitId {
                        document,
                        index: units.len(),
                    },
                    rule.kind,
                    Surface::Text(run),
                ));
                None
            })
            .with_context(|| format!("failed to parse {name}"))?;
        }
        Ok(units)
    }
}

/// Streams `xml` through unchanged except for the non-blank text nodes the
/// rule selects; `visit` sees each one in document order and may replace it.
fn rewrite_text_nodes(
    xml: &[u8],
    rule: &PartRule,
    mut visit: impl FnMut(&str) -> Option<String>,
) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.trim_text(false);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut in_text = false;
    let mut container_depth = 0usize;

    let mut replace = |text: String, writer: &mut Writer<Vec<u8>>| -> Result<bool> {
        if text.trim().is_empty() {
            return Ok(false);
        }
        let output = visit(&text).unwrap_or(text);
        writer.write_event(Event::Text(BytesText::new(&output)))?;
        Ok(true)
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name();
                if rule.is_container(name.as_ref()) {
                    container_depth += 1;
                } else if name.as_ref() == rule.tag
                    && (rule.containers.is_empty() || container_depth > 0)
                {
                    in_text = true;
                }
                writer.write_event(Event::Start(e.to_owned()))?;
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                if name.as_ref() == rule.tag {
                    in_text = false;
                } else if rule.is_container(name.as_ref()) {
                    container_depth = container_depth.saturating_sub(1);
                }
                writer.write_event(Event::End(e.to_owned()))?;
            }
            Ok(Event::Text(e)) if in_text => {
                let text = e.unescape()?.into_owned();
                if !replace(text, &mut writer)? {
                    writer.write_event(Event::Text(e))?;
                }
            }
            Ok(Event::CData(e)) if in_text => {
                let text = String::from_utf8_lossy(&e).into_owned();
                if !replace(text, &mut writer)? {
                    writer.write_event(Event::CData(e))?;
                }
            }
            Ok(Event::Eof) => break,
            Ok(event) => writer.write_event(event)?,
            Err(err) => return Err(anyhow!("xml error at {}: {}", reader.buffer_position(), err)),
        }
        buf.clear();
    }
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::tests::zip_bytes;

    const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="urn:w"><w:body><w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> fish &amp; chips </w:t></w:r><w:r><w:t> </w:t></w:r></w:p><w:tbl><w:tr><w:tc><w:p><w:r><w:t>Cell</w:t></w:r></w:p></w:tc></w:tr></w:tbl></w:body></w:document>"#;

    fn read_entry(bytes: &[u8], name: &str) -> Vec<u8> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        data
    }

    fn texts(units: &[PipelineUnit]) -> Vec<String> {
        units
            .iter()
            .map(|unit| match &unit.surface {
                Surface::Text(run) => run.text.clone(),
                Surface::Raster(_) => String::new(),
            })
            .collect()
    }

    #[test]
    fn docx_runs_become_units_in_order() {
        let docx = zip_bytes(&[
            ("word/document.xml", DOCUMENT.as_bytes()),
            ("word/media/image1.png", &[0x89, b'P', b'N', b'G', 1, 2, 3]),
        ]);
        let adapter = OfficeAdapter::new(OfficeKind::Docx);
        let units = adapter.open(1, &docx).unwrap();
        assert_eq!(texts(&units), vec!["Hello", " fish & chips ", "Cell"]);
        assert_eq!(units[2].id, UnitId { document: 1, index: 2 });
        assert_eq!(units[0].kind, UnitKind::ParagraphRun);
        let Surface::Text(run) = &units[0].surface else {
            panic!("expected text surface");
        };
        assert_eq!(run.attributes["part"], "word/document.xml");
    }

    #[test]
    fn reassembly_replaces_only_text_nodes() {
        let media: &[u8] = &[0x89, b'P', b'N', b'G', 1, 2, 3];
        let docx = zip_bytes(&[
            ("word/document.xml", DOCUMENT.as_bytes()),
            ("word/media/image1.png", media),
        ]);
        let adapter = OfficeAdapter::new(OfficeKind::Docx);
        let surfaces = ["你好", " 炸鱼 & 薯条 ", "单元格"]
            .into_iter()
            .map(|text| Some(Surface::Text(TextRun::new(text))))
            .collect::<Vec<_>>();
        let output = adapter.reassemble(&docx, &surfaces).unwrap();

        let xml = String::from_utf8(read_entry(&output, "word/document.xml")).unwrap();
        assert!(xml.contains("<w:t>你好</w:t>"));
        assert!(xml.contains(r#"<w:t xml:space="preserve"> 炸鱼 &amp; 薯条 </w:t>"#));
        assert!(xml.contains("<w:t> </w:t>"));
        assert!(xml.contains("<w:tbl><w:tr><w:tc><w:p><w:r><w:t>单元格</w:t>"));
        assert_eq!(read_entry(&output, "word/media/image1.png"), media);
    }

    #[test]
    fn unchanged_runs_keep_their_text() {
        let docx = zip_bytes(&[("word/document.xml", DOCUMENT.as_bytes())]);
        let adapter = OfficeAdapter::new(OfficeKind::Docx);
        let surfaces = vec![None, Some(Surface::Text(TextRun::new(" 炸鱼 "))), None];
        let output = adapter.reassemble(&docx, &surfaces).unwrap();

        let xml = String::from_utf8(read_entry(&output, "word/document.xml")).unwrap();
        assert!(xml.contains("<w:t>Hello</w:t>"));
        assert!(xml.contains(r#"<w:t xml:space="preserve"> 炸鱼 </w:t>"#));
        assert!(xml.contains("<w:t>Cell</w:t>"));
    }

    #[test]
    fn surface_count_must_match_text_runs() {
        let docx = zip_bytes(&[("word/document.xml", DOCUMENT.as_bytes())]);
        let adapter = OfficeAdapter::new(OfficeKind::Docx);
        let short = vec![Some(Surface::Text(TextRun::new("only one")))];
        assert!(adapter.reassemble(&docx, &short).is_err());
    }

    #[test]
    fn xlsx_keeps_formulas_and_numbers() {
        let shared = r#"<sst><si><t>Total</t></si><si><r><t>Rich</t></r></si></sst>"#;
        let sheet = r#"<worksheet><sheetData><row><c t="inlineStr"><is><t>Inline</t></is></c><c><f>SUM(A1:A3)</f><v>3</v></c></row></sheetData></worksheet>"#;
        let chart = r#"<c:chartSpace><c:title><a:p><a:r><a:t>Revenue</a:t></a:r></a:p></c:title></c:chartSpace>"#;
        let xlsx = zip_bytes(&[
            ("xl/workbook.xml", b"<workbook/>"),
            ("xl/sharedStrings.xml", shared.as_bytes()),
            ("xl/worksheets/sheet1.xml", sheet.as_bytes()),
            ("xl/charts/chart1.xml", chart.as_bytes()),
        ]);
        let adapter = OfficeAdapter::new(OfficeKind::Xlsx);
        let units = adapter.open(0, &xlsx).unwrap();
        assert_eq!(texts(&units), vec!["Total", "Rich", "Inline", "Revenue"]);
        assert_eq!(units[3].kind, UnitKind::ChartText);

        let surfaces = ["合计", "富文本", "内联", "收入"]
            .into_iter()
            .map(|text| Some(Surface::Text(TextRun::new(text))))
            .collect::<Vec<_>>();
        let output = adapter.reassemble(&xlsx, &surfaces).unwrap();
        let sheet = String::from_utf8(read_entry(&output, "xl/worksheets/sheet1.xml")).unwrap();
        assert!(sheet.contains("<is><t>内联</t></is>"));
        assert!(sheet.contains("<f>SUM(A1:A3)</f><v>3</v>"));
        let chart = String::from_utf8(read_entry(&output, "xl/charts/chart1.xml")).unwrap();
        assert!(chart.contains("<a:t>收入</a:t>"));
    }

    #[test]
    fn broken_archive_is_unsupported() {
        let err = OfficeAdapter::new(OfficeKind::Pptx)
            .open(0, b"PK\x03\x04 broken")
            .unwrap_err();
        assert!(matches!(err, ErrorKind::UnsupportedFormat(_)));
    }
}
