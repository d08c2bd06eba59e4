//! Per-page highlight marks with linear undo/redo and a saved baseline.
//!
//! Marks are keyed by original page index and always stored in unrotated
//! normalized space. The only undoable action is adding a mark: undo removes
//! the newest mark, redo puts it back.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{EngineError, EngineResult};
use crate::geometry::{rotate_forward, rotate_inverse, NormalizedRect, RotationAngle};
use crate::merge::{merge_rects_with, MergeTuning};

/// 32-bit ARGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Argb(pub u32);

impl Argb {
    pub const YELLOW: Argb = Argb(0x80FF_EB3B);

    pub fn from_components(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self(u32::from_be_bytes([a, r, g, b]))
    }

    pub fn alpha(self) -> u8 {
        self.0.to_be_bytes()[0]
    }

    pub fn red(self) -> u8 {
        self.0.to_be_bytes()[1]
    }

    pub fn green(self) -> u8 {
        self.0.to_be_bytes()[2]
    }

    pub fn blue(self) -> u8 {
        self.0.to_be_bytes()[3]
    }
}

impl Default for Argb {
    fn default() -> Self {
        Self::YELLOW
    }
}

impl fmt::Display for Argb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08X}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid colour {0:?}, expected #AARRGGBB or #RRGGBB")]
pub struct ParseArgbError(String);

impl FromStr for Argb {
    type Err = ParseArgbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseArgbError(s.to_owned()));
        }
        let value =
            u32::from_str_radix(hex, 16).map_err(|_| ParseArgbError(s.to_owned()))?;
        match hex.len() {
            8 => Ok(Self(value)),
            6 => Ok(Self(0xFF00_0000 | value)),
            _ => Err(ParseArgbError(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightMark {
    pub rects: Vec<NormalizedRect>,
    pub color: Argb,
}

/// A mark as it should be painted on a rotated page.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightBand {
    pub color: Argb,
    pub rects: Vec<NormalizedRect>,
}

pub type HighlightMap = BTreeMap<usize, Vec<HighlightMark>>;

#[derive(Debug, Clone, Default)]
struct PageHistory {
    marks: Vec<HighlightMark>,
    undo: Vec<HighlightMark>,
    redo: Vec<HighlightMark>,
}

impl PageHistory {
    fn is_empty(&self) -> bool {
        self.marks.is_empty() && self.undo.is_empty() && self.redo.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HighlightStore {
    pages: BTreeMap<usize, PageHistory>,
    baseline: HighlightMap,
    has_unsaved: bool,
}

impl HighlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from marks already present in the document; they form the
    /// saved baseline.
    pub fn from_saved(marks: HighlightMap) -> Self {
        let mut store = Self::default();
        for (page, page_marks) in marks {
            if page_marks.is_empty() {
                continue;
            }
            store.pages.insert(
                page,
                PageHistory {
                    marks: page_marks,
                    ..PageHistory::default()
                },
            );
        }
        store.baseline = store.snapshot();
        store
    }

    /// Adds a mark drawn on a page shown at `rotation` degrees. The rects are
    /// converted back to unrotated space before being stored. Returns the
    /// mark's position on its page.
    pub fn add(
        &mut self,
        original_page: usize,
        display_rects: &[NormalizedRect],
        color: Argb,
        rotation: f32,
    ) -> EngineResult<usize> {
        if display_rects.is_empty() {
            return Err(EngineError::EmptyHighlight);
        }
        let angle = RotationAngle::snap(rotation);
        let rects = display_rects
            .iter()
            .map(|rect| rotate_inverse(rect.clamp(), angle).clamp())
            .collect();
        let mark = HighlightMark { rects, color };

        let history = self.pages.entry(original_page).or_default();
        history.undo.push(mark.clone());
        history.redo.clear();
        history.marks.push(mark);
        self.has_unsaved = true;
        Ok(history.marks.len() - 1)
    }

    pub fn undo_last(&mut self, original_page: usize) -> bool {
        let Some(history) = self.pages.get_mut(&original_page) else {
            return false;
        };
        let Some(mark) = history.marks.pop() else {
            return false;
        };
        history.undo.pop();
        history.redo.push(mark);
        self.has_unsaved = true;
        true
    }

    pub fn redo_last(&mut self, original_page: usize) -> bool {
        let Some(history) = self.pages.get_mut(&original_page) else {
            return false;
        };
        let Some(mark) = history.redo.pop() else {
            return false;
        };
        history.undo.push(mark.clone());
        history.marks.push(mark);
        self.has_unsaved = true;
        true
    }

    pub fn can_undo(&self, original_page: usize) -> bool {
        self.pages
            .get(&original_page)
            .is_some_and(|history| !history.marks.is_empty())
    }

    pub fn can_redo(&self, original_page: usize) -> bool {
        self.pages
            .get(&original_page)
            .is_some_and(|history| !history.redo.is_empty())
    }

    /// Removes one mark by position. Not undoable; clears the page's redo
    /// history.
    pub fn remove(&mut self, original_page: usize, index: usize) -> Option<HighlightMark> {
        let history = self.pages.get_mut(&original_page)?;
        if index >= history.marks.len() {
            return None;
        }
        let mark = history.marks.remove(index);
        if let Some(pos) = history.undo.iter().rposition(|m| *m == mark) {
            history.undo.remove(pos);
        }
        history.redo.clear();
        if history.is_empty() {
            self.pages.remove(&original_page);
        }
        self.has_unsaved = true;
        Some(mark)
    }

    pub fn clear_page(&mut self, original_page: usize) {
        self.pages.remove(&original_page);
        self.has_unsaved = true;
    }

    pub fn clear_all(&mut self) {
        self.pages.clear();
        self.has_unsaved = true;
    }

    pub fn mark_saved(&mut self) {
        self.baseline = self.snapshot();
        self.reset_history();
        self.has_unsaved = false;
    }

    pub fn revert_unsaved(&mut self) {
        self.pages = self
            .baseline
            .iter()
            .map(|(&page, marks)| {
                (
                    page,
                    PageHistory {
                        marks: marks.clone(),
                        ..PageHistory::default()
                    },
                )
            })
            .collect();
        self.has_unsaved = false;
    }

    pub fn has_unsaved(&self) -> bool {
        self.has_unsaved
    }

    /// Marks for a page in unrotated storage space.
    pub fn get_for_page(&self, original_page: usize) -> &[HighlightMark] {
        self.pages
            .get(&original_page)
            .map(|history| history.marks.as_slice())
            .unwrap_or(&[])
    }

    /// Deep copy of every non-empty page's marks.
    pub fn snapshot(&self) -> HighlightMap {
        self.pages
            .iter()
            .filter(|(_, history)| !history.marks.is_empty())
            .map(|(&page, history)| (page, history.marks.clone()))
            .collect()
    }

    pub fn total_marks(&self) -> usize {
        self.pages.values().map(|history| history.marks.len()).sum()
    }

    /// Marks for a page rotated into display space and merged into bands.
    pub fn bands_for_page(
        &self,
        original_page: usize,
        rotation: f32,
        tuning: MergeTuning,
    ) -> Vec<HighlightBand> {
        let angle = RotationAngle::snap(rotation);
        self.get_for_page(original_page)
            .iter()
            .map(|mark| {
                let rotated: Vec<NormalizedRect> = mark
                    .rects
                    .iter()
                    .map(|rect| rotate_forward(*rect, angle))
                    .collect();
                HighlightBand {
                    color: mark.color,
                    rects: merge_rects_with(&rotated, tuning),
                }
            })
            .collect()
    }

    /// Re-keys every page through `new_index_of[old] = new`. Used once the
    /// document's storage order has been rewritten.
    pub fn remap_pages(&mut self, new_index_of: &[usize]) {
        let pages = std::mem::take(&mut self.pages);
        self.pages = pages
            .into_iter()
            .filter_map(|(page, history)| new_index_of.get(page).map(|&new| (new, history)))
            .collect();
        let baseline = std::mem::take(&mut self.baseline);
        self.baseline = baseline
            .into_iter()
            .filter_map(|(page, marks)| new_index_of.get(page).map(|&new| (new, marks)))
            .collect();
    }

    fn reset_history(&mut self) {
        for history in self.pages.values_mut() {
            history.undo.clear();
            history.redo.clear();
        }
        self.pages.retain(|_, history| !history.marks.is_empty());
    }
}
