use crate::script::is_cjk_char;

pub(crate) fn collapse_whitespace(value: &str) -> String {
    let mut out = String::new();
    let mut last_space = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out
}

/// Cache key normalization: collapsed whitespace, trimmed, lower-cased.
pub(crate) fn normalize_for_key(value: &str) -> String {
    collapse_whitespace(value).trim().to_lowercase()
}

/// Cleans recognizer output before it is sent to an engine.
pub(crate) fn sanitize_recognized(value: &str) -> String {
    let mut out = String::new();
    let mut last_space = false;
    let mut last_noise = false;
    for ch in value.chars() {
        if ch.is_control() {
            continue;
        }
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
            last_noise = false;
            continue;
        }
        if is_noise_symbol(ch) {
            if !last_noise {
                out.push(ch);
                last_noise = true;
            }
            last_space = false;
            continue;
        }
        out.push(ch);
        last_space = false;
        last_noise = false;
    }
    trim_edges(out.trim())
}

fn is_noise_symbol(ch: char) -> bool {
    matches!(ch, '|' | '¦' | '·' | '•' | '―' | '—' | '–' | '…')
}

fn trim_edges(value: &str) -> String {
    value
        .trim_matches(|ch: char| matches!(ch, '|' | '¦' | '_' | '~' | '`'))
        .trim()
        .to_string()
}

pub(crate) fn is_numeric_like(value: &str) -> bool {
    let mut digits = 0usize;
    let mut letters = 0usize;
    let mut others = 0usize;
    for ch in value.chars() {
        if ch.is_ascii_digit() {
            digits += 1;
        } else if ch.is_alphabetic() || is_cjk_char(ch) {
            letters += 1;
        } else if !ch.is_whitespace() {
            others += 1;
        }
    }
    if letters > 0 {
        return false;
    }
    digits > 0 && (digits as f32 / (digits + others).max(1) as f32) >= 0.6
}

/// Whether a recognized or extracted string is worth a provider call.
pub(crate) fn is_translatable(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() || is_numeric_like(trimmed) {
        return false;
    }
    if !trimmed.chars().any(|ch| ch.is_alphabetic() || is_cjk_char(ch)) {
        return false;
    }
    // a lone CJK character is a word, a lone latin letter is noise
    let count = trimmed.chars().count();
    count > 1 || trimmed.chars().any(is_cjk_char)
}

/// Byte range of the non-whitespace core of `text`.
pub(crate) fn split_text_bounds(text: &str) -> Option<(usize, usize)> {
    let start = text.char_indices().find(|(_, ch)| !ch.is_whitespace())?.0;
    let (idx, ch) = text
        .char_indices()
        .rev()
        .find(|(_, ch)| !ch.is_whitespace())?;
    Some((start, idx + ch.len_utf8()))
}

/// Puts `translated` between the whitespace that surrounded `original`.
pub(crate) fn preserve_whitespace(original: &str, translated: &str) -> String {
    let Some((start, end)) = split_text_bounds(original) else {
        return original.to_string();
    };
    format!("{}{}{}", &original[..start], translated.trim(), &original[end..])
}
