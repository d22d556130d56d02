use anyhow::{Context, Result, anyhow};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use ttf_parser::{Face, name_id};
use usvg::fontdb;

use crate::error::ErrorKind;
use crate::script::Script;

/// Measures rendered text width in pixels.
pub trait TextMeasure {
    fn width(&self, text: &str, font_size: f32) -> f32;
}

/// Parsed face data used for glyph coverage and advance widths.
pub struct FontFace {
    data: Arc<Vec<u8>>,
    face_index: u32,
    units_per_em: u16,
    space_advance: u16,
    family: Option<String>,
}

impl FontFace {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    /// True when every visible character has a glyph in this face.
    pub fn covers(&self, text: &str) -> bool {
        let Ok(face) = Face::parse(&self.data, self.face_index) else {
            return false;
        };
        text.chars()
            .filter(|ch| !ch.is_whitespace() && *ch != '…')
            .all(|ch| face.glyph_index(ch).is_some())
    }

    fn advance_px(&self, text: &str, font_size: f32) -> Option<f32> {
        let face = Face::parse(&self.data, self.face_index).ok()?;
        let mut advance = 0u32;
        for ch in text.chars() {
            if ch == '\n' {
                continue;
            }
            let units = face
                .glyph_index(ch)
                .and_then(|glyph| face.glyph_hor_advance(glyph))
                .unwrap_or(self.space_advance);
            advance = advance.saturating_add(units as u32);
        }
        Some(advance as f32 * font_size / self.units_per_em.max(1) as f32)
    }
}

/// A resolved font for one region: the family name the SVG refers to and,
/// when the face could be parsed, its metrics.
#[derive(Clone)]
pub struct FontChoice {
    pub script: Script,
    pub family: String,
    face: Option<Arc<FontFace>>,
}

impl FontChoice {
    pub fn covers(&self, text: &str) -> bool {
        self.face.as_ref().is_none_or(|face| face.covers(text))
    }
}

impl TextMeasure for FontChoice {
    fn width(&self, text: &str, font_size: f32) -> f32 {
        self.face
            .as_ref()
            .and_then(|face| face.advance_px(text, font_size))
            .unwrap_or_else(|| EstimatedMeasure.width(text, font_size))
    }
}

/// Width estimate from character classes, used when no face is loaded.
pub struct EstimatedMeasure;

impl TextMeasure for EstimatedMeasure {
    fn width(&self, text: &str, font_size: f32) -> f32 {
        text.chars().map(estimate_char_units).sum::<f32>() * font_size
    }
}

fn estimate_char_units(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if crate::script::is_cjk_char(ch) {
        1.0
    } else {
        0.9
    }
}

/// Script → font mapping shared read-only by every render.
pub struct FontTable {
    entries: BTreeMap<Script, FontChoice>,
    db: Arc<fontdb::Database>,
}

impl FontTable {
    /// Resolves each configured entry: an existing file path is loaded
    /// directly, anything else is looked up as a system family name.
    /// Entries that cannot be resolved are left out with a warning.
    pub fn load(table: &BTreeMap<Script, String>) -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        let mut entries = BTreeMap::new();
        for (script, value) in table {
            let path = Path::new(value);
            let resolved = if path.is_file() {
                db.load_font_file(path)
                    .with_context(|| format!("failed to load font file: {}", path.display()))
                    .and_then(|_| load_face_file(path))
            } else {
                load_face_family(&db, value)
            };
            match resolved {
                Ok(face) => {
                    let family = face
                        .family()
                        .map(str::to_string)
                        .unwrap_or_else(|| value.clone());
                    debug!(script = %script, family = %family, "font resolved");
                    entries.insert(
                        *script,
                        FontChoice {
                            script: *script,
                            family,
                            face: Some(Arc::new(face)),
                        },
                    );
                }
                Err(err) => warn!(script = %script, font = %value, "font unavailable: {err:#}"),
            }
        }
        Self {
            entries,
            db: Arc::new(db),
        }
    }

    /// Table of family names without loaded faces. Coverage is assumed and
    /// widths are estimated.
    pub fn estimated<'a>(families: impl IntoIterator<Item = (Script, &'a str)>) -> Self {
        let entries = families
            .into_iter()
            .map(|(script, family)| {
                (
                    script,
                    FontChoice {
                        script,
                        family: family.to_string(),
                        face: None,
                    },
                )
            })
            .collect();
        Self {
            entries,
            db: Arc::new(fontdb::Database::new()),
        }
    }

    pub fn database(&self) -> Arc<fontdb::Database> {
        Arc::clone(&self.db)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Font for `script`, falling back to the nearest compatible scripts.
    /// A candidate must cover every glyph of `text`.
    pub fn select(&self, script: Script, text: &str) -> Result<FontChoice, ErrorKind> {
        std::iter::once(&script)
            .chain(script.fallbacks())
            .filter_map(|candidate| self.entries.get(candidate))
            .find(|choice| choice.covers(text))
            .cloned()
            .ok_or_else(|| ErrorKind::FontUnavailable(script.key().to_string()))
    }
}

fn load_face_file(path: &Path) -> Result<FontFace> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    parse_face(data, None).with_context(|| format!("failed to parse font: {}", path.display()))
}

fn load_face_family(db: &fontdb::Database, family: &str) -> Result<FontFace> {
    let families = if family.eq_ignore_ascii_case("sans-serif") {
        vec![fontdb::Family::SansSerif]
    } else if family.eq_ignore_ascii_case("serif") {
        vec![fontdb::Family::Serif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let (data, index) = db
        .with_face_data(id, |data, index| (data.to_vec(), index))
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    parse_face(data, Some(index))
}

fn parse_face(data: Vec<u8>, index: Option<u32>) -> Result<FontFace> {
    let data = Arc::new(data);
    let indices = match index {
        Some(index) => index..index + 1,
        None => 0..ttf_parser::fonts_in_collection(&data).unwrap_or(1),
    };
    for index in indices {
        let Ok(face) = Face::parse(&data, index) else {
            continue;
        };
        let units_per_em = face.units_per_em().max(1);
        let space_advance = face
            .glyph_index(' ')
            .and_then(|id| face.glyph_hor_advance(id))
            .unwrap_or(units_per_em / 2);
        let family = extract_family_name(&face);
        return Ok(FontFace {
            data: Arc::clone(&data),
            face_index: index,
            units_per_em,
            space_advance,
            family,
        });
    }
    Err(anyhow!("no parsable face in font data"))
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}
