use std::collections::BTreeMap;

use super::geom::union_bbox;
use crate::unit::BBoxPx;

/// One recognized line in recognizer pixel space. `conf` is 0..100.
#[derive(Debug, Clone)]
pub(super) struct RecognizedLine {
    pub text: String,
    pub bbox: BBoxPx,
    pub conf: f32,
}

#[derive(Debug, Clone)]
struct Word {
    text: String,
    bbox: BBoxPx,
    conf: f32,
}

/// Groups tesseract TSV word rows (level 5) into lines, splitting a line
/// where its words leave a wide horizontal gap.
pub(super) fn parse_tsv_lines(tsv: &str) -> Vec<RecognizedLine> {
    let mut by_line: BTreeMap<(i32, i32, i32, i32), Vec<Word>> = BTreeMap::new();

    for row in tsv.lines().skip(1) {
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 12 {
            continue;
        }
        let number = |idx: usize| cols[idx].trim().parse::<i32>().unwrap_or(0);
        if number(0) != 5 {
            continue;
        }
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || conf < 0.0 {
            continue;
        }
        let dim = |idx: usize| cols[idx].trim().parse::<u32>().unwrap_or(0);
        let key = (number(1), number(2), number(3), number(4));
        by_line.entry(key).or_default().push(Word {
            text: text.to_string(),
            bbox: BBoxPx::new(dim(6), dim(7), dim(8), dim(9)),
            conf,
        });
    }

    let mut lines = Vec::new();
    for (_, mut words) in by_line {
        words.sort_by_key(|word| word.bbox.x);
        lines.extend(split_segments(words).iter().filter_map(|segment| build_line(segment)));
    }
    lines
}

fn split_segments(words: Vec<Word>) -> Vec<Vec<Word>> {
    if words.len() <= 1 {
        return if words.is_empty() { Vec::new() } else { vec![words] };
    }

    let mut heights = words.iter().map(|word| word.bbox.h).collect::<Vec<_>>();
    heights.sort_unstable();
    let median_h = heights[heights.len() / 2].max(1) as f32;
    let gap_threshold = (median_h * 2.5).clamp(12.0, 120.0);
    let vertical_threshold = (median_h * 0.9).clamp(6.0, 80.0);

    let mut segments: Vec<Vec<Word>> = Vec::new();
    let mut current: Vec<Word> = Vec::new();
    let mut last_right = 0u32;
    let mut last_center_y = 0f32;
    for word in words {
        let center_y = word.bbox.y as f32 + word.bbox.h as f32 * 0.5;
        if !current.is_empty() {
            let gap = word.bbox.x.saturating_sub(last_right) as f32;
            if gap > gap_threshold || (center_y - last_center_y).abs() > vertical_threshold {
                segments.push(std::mem::take(&mut current));
            }
        }
        if current.is_empty() {
            last_right = word.bbox.right();
            last_center_y = center_y;
        } else {
            last_right = last_right.max(word.bbox.right());
            last_center_y = (last_center_y + center_y) * 0.5;
        }
        current.push(word);
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn build_line(words: &[Word]) -> Option<RecognizedLine> {
    let first = words.first()?;
    let mut text = String::new();
    let mut previous = "";
    for word in words {
        if !text.is_empty() && needs_space(previous, &word.text) {
            text.push(' ');
        }
        text.push_str(&word.text);
        previous = &word.text;
    }
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let mut bbox = first.bbox;
    let mut conf_sum = 0.0;
    let mut weight_sum = 0.0;
    for word in words {
        bbox = union_bbox(&bbox, &word.bbox);
        let weight = word.text.chars().count().max(1) as f32;
        conf_sum += word.conf * weight;
        weight_sum += weight;
    }

    Some(RecognizedLine {
        text: text.to_string(),
        bbox,
        conf: if weight_sum > 0.0 { conf_sum / weight_sum } else { 0.0 },
    })
}

/// CJK words are joined without spaces; alphabetic words get one.
pub(super) fn needs_space(left: &str, right: &str) -> bool {
    let last = left.chars().rev().find(|ch| !ch.is_whitespace());
    let first = right.chars().find(|ch| !ch.is_whitespace());
    match (last, first) {
        (Some(a), Some(b)) => {
            let cjk = crate::script::is_cjk_char(a) || crate::script::is_cjk_char(b);
            !cjk && a.is_alphanumeric() && b.is_alphanumeric()
        }
        _ => false,
    }
}

pub(super) fn join_inline(left: &str, right: &str) -> String {
    if needs_space(left, right) {
        format!("{} {}", left.trim_end(), right.trim_start())
    } else {
        format!("{}{}", left.trim_end(), right.trim_start())
    }
}
