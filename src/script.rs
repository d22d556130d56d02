use serde::Serialize;
use std::fmt;

/// Writing system of a piece of text. Fonts are chosen per script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    Latin,
    Cyrillic,
    Greek,
    Arabic,
    Hebrew,
    Han,
    Japanese,
    Hangul,
    Thai,
    Devanagari,
}

impl Script {
    pub const ALL: [Script; 10] = [
        Script::Latin,
        Script::Cyrillic,
        Script::Greek,
        Script::Arabic,
        Script::Hebrew,
        Script::Han,
        Script::Japanese,
        Script::Hangul,
        Script::Thai,
        Script::Devanagari,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Script::Latin => "latin",
            Script::Cyrillic => "cyrillic",
            Script::Greek => "greek",
            Script::Arabic => "arabic",
            Script::Hebrew => "hebrew",
            Script::Han => "han",
            Script::Japanese => "japanese",
            Script::Hangul => "hangul",
            Script::Thai => "thai",
            Script::Devanagari => "devanagari",
        }
    }

    pub fn from_key(key: &str) -> Option<Script> {
        let key = key.trim().to_lowercase();
        Script::ALL.into_iter().find(|script| script.key() == key)
    }

    /// Script used to write the given language code (`zh-CN`, `ja`, `ar`...).
    pub fn for_language(code: &str) -> Script {
        let lower = code.trim().to_lowercase();
        let base = lower.split(['-', '_']).next().unwrap_or("");
        match base {
            "zh" | "zho" | "chi" | "yue" => Script::Han,
            "ja" | "jpn" => Script::Japanese,
            "ko" | "kor" => Script::Hangul,
            "ar" | "ara" | "fa" | "fas" | "ur" | "urd" | "ps" => Script::Arabic,
            "he" | "heb" | "yi" => Script::Hebrew,
            "ru" | "rus" | "uk" | "ukr" | "bg" | "bul" | "sr" | "mk" | "be" | "kk" | "mn" => {
                Script::Cyrillic
            }
            "el" | "ell" | "gre" => Script::Greek,
            "th" | "tha" => Script::Thai,
            "hi" | "hin" | "mr" | "ne" | "sa" => Script::Devanagari,
            _ => Script::Latin,
        }
    }

    /// Dominant script of `text` by character count, kana winning over Han.
    pub fn detect(text: &str) -> Option<Script> {
        let mut counts = [0usize; 10];
        for ch in text.chars() {
            if let Some(script) = char_script(ch) {
                counts[script as usize] += 1;
            }
        }
        if counts[Script::Japanese as usize] > 0 {
            return Some(Script::Japanese);
        }
        let (index, count) = counts
            .iter()
            .enumerate()
            .max_by_key(|(idx, count)| (**count, std::cmp::Reverse(*idx)))?;
        if *count == 0 {
            return None;
        }
        Some(Script::ALL[index])
    }

    /// Best-effort language tag for a detected script.
    pub fn language_tag(&self) -> Option<&'static str> {
        match self {
            Script::Han => Some("zh"),
            Script::Japanese => Some("ja"),
            Script::Hangul => Some("ko"),
            Script::Arabic => Some("ar"),
            Script::Hebrew => Some("he"),
            Script::Cyrillic => Some("ru"),
            Script::Greek => Some("el"),
            Script::Thai => Some("th"),
            Script::Devanagari => Some("hi"),
            Script::Latin => None,
        }
    }

    pub fn is_rtl(&self) -> bool {
        matches!(self, Script::Arabic | Script::Hebrew)
    }

    pub fn supports_vertical(&self) -> bool {
        matches!(self, Script::Han | Script::Japanese | Script::Hangul)
    }

    pub fn is_cjk(&self) -> bool {
        self.supports_vertical()
    }

    /// Scripts whose fonts commonly cover this one, nearest first.
    pub fn fallbacks(&self) -> &'static [Script] {
        match self {
            Script::Han => &[Script::Japanese, Script::Hangul],
            Script::Japanese => &[Script::Han, Script::Hangul],
            Script::Hangul => &[Script::Han, Script::Japanese],
            Script::Cyrillic => &[Script::Latin, Script::Greek],
            Script::Greek => &[Script::Latin, Script::Cyrillic],
            Script::Latin => &[Script::Cyrillic, Script::Greek],
            Script::Arabic => &[Script::Hebrew],
            Script::Hebrew => &[Script::Arabic],
            Script::Thai => &[],
            Script::Devanagari => &[],
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

pub(crate) fn char_script(ch: char) -> Option<Script> {
    let code = ch as u32;
    match code {
        0x3040..=0x30FF | 0x31F0..=0x31FF | 0xFF66..=0xFF9F => Some(Script::Japanese),
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF | 0x20000..=0x2A6DF => {
            Some(Script::Han)
        }
        0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F => Some(Script::Hangul),
        0x0600..=0x06FF | 0x0750..=0x077F | 0x08A0..=0x08FF | 0xFB50..=0xFDFF | 0xFE70..=0xFEFF => {
            Some(Script::Arabic)
        }
        0x0590..=0x05FF | 0xFB1D..=0xFB4F => Some(Script::Hebrew),
        0x0400..=0x04FF | 0x0500..=0x052F => Some(Script::Cyrillic),
        0x0370..=0x03FF | 0x1F00..=0x1FFF => Some(Script::Greek),
        0x0E00..=0x0E7F => Some(Script::Thai),
        0x0900..=0x097F => Some(Script::Devanagari),
        _ if ch.is_alphabetic() && code < 0x0250 => Some(Script::Latin),
        0x1E00..=0x1EFF => Some(Script::Latin),
        _ => None,
    }
}

pub(crate) fn is_cjk_char(ch: char) -> bool {
    char_script(ch).is_some_and(|script| script.is_cjk())
}
