use std::cmp::Ordering;

use super::geom::{horizontal_overlap_ratio, iou, union_bbox, vertical_overlap_ratio};
use super::parse::{RecognizedLine, join_inline};
use crate::script::is_cjk_char;
use crate::unit::BBoxPx;

/// Folds the lines of another recognizer pass into `base`, keeping the
/// better reading where both passes saw the same box.
pub(super) fn merge_passes(mut base: Vec<RecognizedLine>, extra: Vec<RecognizedLine>) -> Vec<RecognizedLine> {
    for line in extra {
        let Some(idx) = base
            .iter()
            .position(|existing| iou(&existing.bbox, &line.bbox) > 0.6)
        else {
            base.push(line);
            continue;
        };
        let line_len = line.text.chars().count();
        let base_len = base[idx].text.chars().count();
        let prefer = line.conf > base[idx].conf + 5.0
            || (line_len > base_len && cjk_ratio(&line.text) + 0.05 >= cjk_ratio(&base[idx].text));
        if prefer || (base_len <= 2 && line_len >= 4) {
            base[idx] = line;
        }
    }
    base
}

pub(super) fn unscale(lines: Vec<RecognizedLine>, scale: u32) -> Vec<RecognizedLine> {
    if scale <= 1 {
        return lines;
    }
    let scale = scale as f32;
    let down = |value: u32| (value as f32 / scale).round() as u32;
    lines
        .into_iter()
        .map(|line| RecognizedLine {
            bbox: BBoxPx::new(down(line.bbox.x), down(line.bbox.y), down(line.bbox.w), down(line.bbox.h)),
            ..line
        })
        .collect()
}

/// Drops boxes that cannot be text: degenerate, page-tall, mostly digits
/// or symbols, or low-confidence latin noise.
pub(super) fn filter_implausible(lines: Vec<RecognizedLine>, width: u32, height: u32) -> Vec<RecognizedLine> {
    lines
        .into_iter()
        .filter(|line| is_plausible(line, width, height))
        .collect()
}

fn is_plausible(line: &RecognizedLine, width: u32, height: u32) -> bool {
    let text = line.text.trim();
    if text.is_empty() || line.bbox.w == 0 || line.bbox.h == 0 {
        return false;
    }
    if line.bbox.h as f32 > height as f32 * 0.25 && line.bbox.h <= line.bbox.w {
        return false;
    }
    if line.bbox.w as f32 > width as f32 * 0.98 && (line.bbox.h as f32) < 6.0 {
        return false;
    }

    let stats = TextStats::of(text);
    if stats.total == 0 {
        return false;
    }
    let total = stats.total as f32;
    if stats.total > 4 && (stats.word as f32 / total) < 0.35 {
        return false;
    }
    if stats.total > 3 && (stats.digits as f32 / total) > 0.85 {
        return false;
    }
    if stats.total > 3 && (stats.symbols as f32 / total) > 0.6 {
        return false;
    }
    if line.conf < 25.0 && stats.total <= 4 {
        return false;
    }
    true
}

#[derive(Default)]
struct TextStats {
    total: usize,
    word: usize,
    digits: usize,
    symbols: usize,
}

impl TextStats {
    fn of(text: &str) -> Self {
        let mut stats = TextStats::default();
        for ch in text.chars().filter(|ch| !ch.is_whitespace()) {
            stats.total += 1;
            if ch.is_ascii_digit() {
                stats.digits += 1;
                stats.word += 1;
            } else if ch.is_alphabetic() || is_cjk_char(ch) {
                stats.word += 1;
            } else {
                stats.symbols += 1;
            }
        }
        stats
    }
}

/// Joins fragments that sit on the same baseline close to each other.
pub(super) fn merge_inline(mut lines: Vec<RecognizedLine>) -> Vec<RecognizedLine> {
    lines.sort_by_key(|line| (line.bbox.y, line.bbox.x));
    let mut merged: Vec<RecognizedLine> = Vec::new();

    for line in lines {
        if let Some(last) = merged.last_mut()
            && vertical_overlap_ratio(&last.bbox, &line.bbox) > 0.6
            && is_adjacent(&last.bbox, &line.bbox)
        {
            let left_len = last.text.chars().count().max(1) as f32;
            let right_len = line.text.chars().count().max(1) as f32;
            last.conf = (last.conf * left_len + line.conf * right_len) / (left_len + right_len);
            last.text = join_inline(&last.text, &line.text);
            last.bbox = union_bbox(&last.bbox, &line.bbox);
            continue;
        }
        merged.push(line);
    }
    merged
}

fn is_adjacent(a: &BBoxPx, b: &BBoxPx) -> bool {
    let (left, right) = if a.x <= b.x { (a, b) } else { (b, a) };
    let gap = right.x.saturating_sub(left.right());
    let max_gap = (a.h.max(b.h) as f32 * 0.8).max(6.0) as u32;
    gap <= max_gap && horizontal_overlap_ratio(a, b) < 0.5
}

/// Keeps the most confident of heavily overlapping lines.
pub(super) fn suppress_duplicates(mut lines: Vec<RecognizedLine>) -> Vec<RecognizedLine> {
    lines.sort_by(|a, b| b.conf.partial_cmp(&a.conf).unwrap_or(Ordering::Equal));
    let mut kept: Vec<RecognizedLine> = Vec::new();

    for line in lines {
        let duplicate = kept.iter().any(|existing| {
            iou(&existing.bbox, &line.bbox) > 0.5
                || (vertical_overlap_ratio(&existing.bbox, &line.bbox) > 0.8
                    && horizontal_overlap_ratio(&existing.bbox, &line.bbox) > 0.8)
        });
        if !duplicate {
            kept.push(line);
        }
    }
    kept.sort_by_key(|line| (line.bbox.y, line.bbox.x));
    kept
}

fn cjk_ratio(text: &str) -> f32 {
    let (cjk, total) = text
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .fold((0usize, 0usize), |(cjk, total), ch| {
            (cjk + usize::from(is_cjk_char(ch)), total + 1)
        });
    if total == 0 { 0.0 } else { cjk as f32 / total as f32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str, bbox: BBoxPx, conf: f32) -> RecognizedLine {
        RecognizedLine {
            text: text.to_string(),
            bbox,
            conf,
        }
    }

    #[test]
    fn later_pass_wins_when_more_confident() {
        let base = vec![line("He1lo", BBoxPx::new(0, 0, 50, 20), 60.0)];
        let extra = vec![line("Hello", BBoxPx::new(1, 0, 50, 20), 90.0)];
        let merged = merge_passes(base, extra);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "Hello");
    }

    #[test]
    fn unscale_divides_boxes() {
        let lines = unscale(vec![line("a", BBoxPx::new(30, 60, 90, 30), 90.0)], 3);
        assert_eq!(lines[0].bbox, BBoxPx::new(10, 20, 30, 10));
    }

    #[test]
    fn drops_digit_soup_and_keeps_words() {
        let lines = vec![
            line("12345678", BBoxPx::new(0, 0, 80, 20), 95.0),
            line("Exit", BBoxPx::new(0, 40, 40, 20), 95.0),
            line("##%%&&", BBoxPx::new(0, 80, 60, 20), 95.0),
        ];
        let kept = filter_implausible(lines, 400, 400);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "Exit");
    }

    #[test]
    fn joins_adjacent_fragments() {
        let lines = vec![
            line("Fire", BBoxPx::new(0, 0, 40, 20), 90.0),
            line("exit", BBoxPx::new(46, 1, 40, 20), 70.0),
        ];
        let merged = merge_inline(lines);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "Fire exit");
        assert_eq!(merged[0].bbox, BBoxPx::new(0, 0, 86, 21));
    }

    #[test]
    fn suppresses_overlapping_duplicates() {
        let lines = vec![
            line("Hello", BBoxPx::new(0, 0, 50, 20), 70.0),
            line("Hel1o", BBoxPx::new(2, 0, 50, 20), 90.0),
            line("Other", BBoxPx::new(0, 50, 50, 20), 80.0),
        ];
        let kept = suppress_duplicates(lines);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].text, "Hel1o");
    }
}
