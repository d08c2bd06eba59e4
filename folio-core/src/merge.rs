//! Collapses glyph-level rectangles into per-line highlight bands.
//!
//! The result is cosmetic: rectangles on the same visual line that touch or
//! sit closer than the gap tolerance become a single bounding band.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::geometry::NormalizedRect;

/// Tolerances expressed as multiples of the median rectangle height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeTuning {
    pub line_tolerance: f32,
    pub gap_tolerance: f32,
}

impl Default for MergeTuning {
    fn default() -> Self {
        Self {
            line_tolerance: 0.7,
            gap_tolerance: 1.0,
        }
    }
}

/// Merges `rects` with the default tuning.
pub fn merge_rects(rects: &[NormalizedRect]) -> Vec<NormalizedRect> {
    merge_rects_with(rects, MergeTuning::default())
}

/// Merges `rects` into bands, line by line.
///
/// Passes repeat until nothing else merges, so feeding the output back in
/// returns it unchanged.
pub fn merge_rects_with(rects: &[NormalizedRect], tuning: MergeTuning) -> Vec<NormalizedRect> {
    let mut current = merge_pass(rects, tuning);
    loop {
        let next = merge_pass(&current, tuning);
        if next.len() == current.len() {
            return next;
        }
        current = next;
    }
}

fn merge_pass(rects: &[NormalizedRect], tuning: MergeTuning) -> Vec<NormalizedRect> {
    if rects.is_empty() {
        return Vec::new();
    }

    let mut sorted = rects.to_vec();
    sorted.sort_by(reading_order);

    let median = median_height(&sorted);
    let line_tolerance = median * tuning.line_tolerance;
    let gap_tolerance = median * tuning.gap_tolerance;

    let mut merged = Vec::with_capacity(sorted.len());
    for mut line in split_lines(sorted, line_tolerance) {
        line.sort_by(|a, b| a.left.total_cmp(&b.left).then_with(|| reading_order(a, b)));
        let mut rest = line.into_iter();
        let Some(mut active) = rest.next() else {
            continue;
        };
        for rect in rest {
            let same_row = (rect.top - active.top).abs() <= line_tolerance;
            if same_row && rect.left - active.right <= gap_tolerance {
                active = active.union(&rect);
            } else {
                merged.push(active);
                active = rect;
            }
        }
        merged.push(active);
    }
    merged
}

fn reading_order(a: &NormalizedRect, b: &NormalizedRect) -> Ordering {
    a.top
        .total_cmp(&b.top)
        .then_with(|| a.left.total_cmp(&b.left))
        .then_with(|| a.bottom.total_cmp(&b.bottom))
        .then_with(|| a.right.total_cmp(&b.right))
}

fn median_height(rects: &[NormalizedRect]) -> f32 {
    let mut heights: Vec<f32> = rects.iter().map(|r| r.height().max(0.0)).collect();
    heights.sort_by(f32::total_cmp);
    let mid = heights.len() / 2;
    if heights.len() % 2 == 0 {
        (heights[mid - 1] + heights[mid]) / 2.0
    } else {
        heights[mid]
    }
}

/// Groups rects (already in reading order) into lines. A rect joins the
/// current line while its top stays within `tolerance` of the line's first top.
fn split_lines(sorted: Vec<NormalizedRect>, tolerance: f32) -> Vec<Vec<NormalizedRect>> {
    let mut lines: Vec<Vec<NormalizedRect>> = Vec::new();
    let mut reference_top = f32::NEG_INFINITY;
    for rect in sorted {
        match lines.last_mut() {
            Some(line) if (rect.top - reference_top).abs() <= tolerance => line.push(rect),
            _ => {
                reference_top = rect.top;
                lines.push(vec![rect]);
            }
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(left: f32, top: f32, right: f32, bottom: f32) -> NormalizedRect {
        NormalizedRect::new(left, top, right, bottom)
    }

    fn sorted(mut rects: Vec<NormalizedRect>) -> Vec<NormalizedRect> {
        rects.sort_by(reading_order);
        rects
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(merge_rects(&[]).is_empty());
    }

    #[test]
    fn single_rect_passes_through() {
        let only = rect(0.1, 0.1, 0.2, 0.12);
        assert_eq!(merge_rects(&[only]), vec![only]);
    }

    #[test]
    fn adjacent_glyphs_on_one_line_become_one_band() {
        let glyphs = vec![
            rect(0.30, 0.100, 0.32, 0.120),
            rect(0.10, 0.101, 0.12, 0.121),
            rect(0.12, 0.100, 0.15, 0.120),
            rect(0.155, 0.102, 0.29, 0.122),
        ];
        let merged = merge_rects(&glyphs);
        assert_eq!(merged.len(), 1);
        let band = merged[0];
        assert_eq!(band.left, 0.10);
        assert_eq!(band.right, 0.32);
        assert_eq!(band.top, 0.100);
        assert_eq!(band.bottom, 0.122);
    }

    #[test]
    fn separate_lines_stay_separate() {
        let glyphs = vec![
            rect(0.1, 0.10, 0.3, 0.12),
            rect(0.1, 0.20, 0.3, 0.22),
            rect(0.3, 0.20, 0.5, 0.22),
        ];
        let merged = merge_rects(&glyphs);
        assert_eq!(
            merged,
            vec![rect(0.1, 0.10, 0.3, 0.12), rect(0.1, 0.20, 0.5, 0.22)]
        );
    }

    #[test]
    fn wide_gap_splits_a_line() {
        let glyphs = vec![rect(0.1, 0.1, 0.2, 0.12), rect(0.6, 0.1, 0.7, 0.12)];
        assert_eq!(merge_rects(&glyphs).len(), 2);
    }

    #[test]
    fn zero_height_rects_are_tolerated() {
        let glyphs = vec![
            rect(0.1, 0.5, 0.2, 0.5),
            rect(0.2, 0.5, 0.3, 0.5),
            rect(0.4, 0.5, 0.5, 0.5),
        ];
        let merged = merge_rects(&glyphs);
        assert_eq!(merged, vec![rect(0.1, 0.5, 0.3, 0.5), rect(0.4, 0.5, 0.5, 0.5)]);
    }

    #[test]
    fn merging_twice_changes_nothing() {
        let inputs = vec![
            vec![],
            vec![rect(0.1, 0.1, 0.2, 0.12)],
            vec![
                rect(0.0, 0.00, 0.1, 0.10),
                rect(0.1, 0.05, 0.2, 0.15),
                rect(0.32, 0.00, 0.4, 0.10),
            ],
            vec![
                rect(0.1, 0.10, 0.3, 0.12),
                rect(0.31, 0.105, 0.5, 0.125),
                rect(0.1, 0.20, 0.3, 0.22),
                rect(0.7, 0.20, 0.9, 0.22),
                rect(0.2, 0.40, 0.25, 0.47),
                rect(0.26, 0.41, 0.3, 0.44),
            ],
        ];
        for input in inputs {
            let once = merge_rects(&input);
            let twice = merge_rects(&once);
            assert_eq!(sorted(once), sorted(twice));
        }
    }
}
