use serde::Serialize;

use super::font::TextMeasure;
use crate::script::is_cjk_char;
use crate::settings::Settings;

pub const ELLIPSIS: char = '…';

/// Bounds of the font size search plus spacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutParams {
    pub max_size: f32,
    pub min_size: f32,
    pub step: f32,
    pub line_spacing: f32,
    pub padding: f32,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            max_size: 48.0,
            min_size: 10.0,
            step: 1.0,
            line_spacing: 1.2,
            padding: 2.0,
        }
    }
}

impl LayoutParams {
    pub fn from_settings(settings: &Settings) -> Self {
        let min_size = settings.min_font_size.max(1.0);
        Self {
            max_size: settings.max_font_size.max(min_size),
            min_size,
            step: settings.font_size_step.max(0.25),
            line_spacing: settings.line_spacing.max(1.0),
            padding: settings.padding.max(0.0),
        }
    }
}

/// Fitted text: lines for horizontal text, columns for vertical text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub font_size: f32,
    pub line_height: f32,
    pub lines: Vec<String>,
    pub overflow: bool,
}

/// Largest size from `max_size` down to `min_size` at which the wrapped
/// text fits the box. At the floor the text is cut and ends in an ellipsis.
pub fn fit_horizontal(
    text: &str,
    width: f32,
    height: f32,
    params: &LayoutParams,
    measure: &dyn TextMeasure,
) -> Layout {
    let inner_w = (width - params.padding * 2.0).max(1.0);
    let inner_h = (height - params.padding * 2.0).max(1.0);
    let tokens = tokenize(text);

    for size in sizes(params) {
        let line_height = size * params.line_spacing;
        let lines = wrap_tokens(&tokens, inner_w, size, measure);
        let block = size + (lines.len().saturating_sub(1)) as f32 * line_height;
        let widest = lines
            .iter()
            .map(|line| measure.width(line, size))
            .fold(0f32, f32::max);
        if block <= inner_h && widest <= inner_w {
            return Layout {
                font_size: size,
                line_height,
                lines,
                overflow: false,
            };
        }
    }

    let size = params.min_size;
    let line_height = size * params.line_spacing;
    let mut lines = wrap_tokens(&tokens, inner_w, size, measure);
    let capacity = (((inner_h - size) / line_height).floor().max(0.0) as usize + 1).max(1);
    let cut = lines.len() > capacity;
    lines.truncate(capacity);
    let mut too_wide = false;
    if let Some(last) = lines.last_mut()
        && (cut || measure.width(last, size) > inner_w)
    {
        too_wide = !cut;
        *last = truncate_with_ellipsis(last, inner_w, size, measure);
    }
    Layout {
        font_size: size,
        line_height,
        lines,
        overflow: cut || too_wide || size > inner_h,
    }
}

/// Vertical layout: one glyph per row, columns read right to left.
/// Whitespace is dropped.
pub fn fit_vertical(text: &str, width: f32, height: f32, params: &LayoutParams) -> Layout {
    let inner_w = (width - params.padding * 2.0).max(1.0);
    let inner_h = (height - params.padding * 2.0).max(1.0);
    let chars = text.chars().filter(|ch| !ch.is_whitespace()).collect::<Vec<_>>();

    for size in sizes(params) {
        let column_width = size * params.line_spacing;
        let per_column = (inner_h / size).floor() as usize;
        if per_column == 0 {
            continue;
        }
        let columns = chars.len().div_ceil(per_column).max(1);
        let needed = size + (columns - 1) as f32 * column_width;
        if needed <= inner_w {
            return Layout {
                font_size: size,
                line_height: column_width,
                lines: chunk_columns(&chars, per_column),
                overflow: false,
            };
        }
    }

    let size = params.min_size;
    let column_width = size * params.line_spacing;
    let per_column = ((inner_h / size).floor() as usize).max(1);
    let max_columns = (((inner_w - size) / column_width).floor().max(0.0) as usize + 1).max(1);
    let capacity = per_column * max_columns;
    let mut kept = chars;
    let cut = kept.len() > capacity;
    if cut {
        kept.truncate(capacity.saturating_sub(1));
        kept.push(ELLIPSIS);
    }
    Layout {
        font_size: size,
        line_height: column_width,
        lines: chunk_columns(&kept, per_column),
        overflow: cut || size > inner_h,
    }
}

fn sizes(params: &LayoutParams) -> impl Iterator<Item = f32> {
    let LayoutParams {
        max_size,
        min_size,
        step,
        ..
    } = *params;
    let steps = ((max_size - min_size) / step).floor().max(0.0) as usize;
    let last = (max_size - steps as f32 * step).max(min_size);
    (0..=steps)
        .map(move |idx| (max_size - idx as f32 * step).max(min_size))
        .chain((last > min_size).then_some(min_size))
}

fn chunk_columns(chars: &[char], per_column: usize) -> Vec<String> {
    chars
        .chunks(per_column.max(1))
        .map(|column| column.iter().collect())
        .collect()
}

/// Words, single spaces, explicit newlines and one token per CJK character.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch == '\n' || ch.is_whitespace() || is_cjk_char(ch) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push(match ch {
                '\n' => "\n".to_string(),
                _ if ch.is_whitespace() => " ".to_string(),
                _ => ch.to_string(),
            });
            continue;
        }
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Greedy line filling. A token wider than the line is broken by character.
fn wrap_tokens(tokens: &[String], max_width: f32, size: f32, measure: &dyn TextMeasure) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for token in tokens {
        match token.as_str() {
            "\n" => flush(&mut current, &mut lines),
            " " => {
                if !current.is_empty() && !current.ends_with(' ') {
                    current.push(' ');
                }
            }
            _ => {
                let candidate = format!("{current}{token}");
                if measure.width(candidate.trim_end(), size) <= max_width {
                    current = candidate;
                    continue;
                }
                if !current.trim().is_empty() {
                    flush(&mut current, &mut lines);
                }
                if measure.width(token, size) <= max_width {
                    current.push_str(token);
                    continue;
                }
                for ch in token.chars() {
                    current.push(ch);
                    if current.chars().count() > 1 && measure.width(&current, size) > max_width {
                        current.pop();
                        flush(&mut current, &mut lines);
                        current.push(ch);
                    }
                }
            }
        }
    }
    flush(&mut current, &mut lines);
    lines
}

fn flush(current: &mut String, lines: &mut Vec<String>) {
    let line = current.trim_end().to_string();
    if !line.is_empty() {
        lines.push(line);
    }
    current.clear();
}

fn truncate_with_ellipsis(line: &str, max_width: f32, size: f32, measure: &dyn TextMeasure) -> String {
    let mut chars = line.chars().collect::<Vec<_>>();
    loop {
        let candidate = format!(
            "{}{ELLIPSIS}",
            chars.iter().collect::<String>().trim_end()
        );
        if chars.is_empty() || measure.width(&candidate, size) <= max_width {
            return candidate;
        }
        chars.pop();
    }
}
