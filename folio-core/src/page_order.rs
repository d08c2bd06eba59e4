//! Display order of pages, kept separate from storage order.
//!
//! `order[display] = original`. Pages are addressed everywhere else by their
//! original index; only navigation and reordering speak in display indices.

use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventLog};
use crate::DocumentId;

#[derive(Debug, Clone, Default)]
pub struct PageOrderIndex {
    order: Vec<usize>,
    display_of: Vec<usize>,
    selected: usize,
    revision: u64,
    notify: Option<(EventLog, DocumentId)>,
}

impl PageOrderIndex {
    pub fn new(total_pages: usize) -> Self {
        let mut index = Self::default();
        index.initialize(total_pages);
        index
    }

    /// Sends order and selection changes to `events`.
    pub fn with_events(mut self, events: EventLog, document: DocumentId) -> Self {
        self.notify = Some((events, document));
        self
    }

    pub fn initialize(&mut self, total_pages: usize) {
        self.order = (0..total_pages).collect();
        self.selected = 0;
        self.order_changed();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn selected_display_index(&self) -> usize {
        self.selected
    }

    pub fn selected_original(&self) -> Option<usize> {
        self.order.get(self.selected).copied()
    }

    /// Bumped on every order mutation; cheap staleness check for caches.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn has_changes(&self) -> bool {
        self.order
            .iter()
            .enumerate()
            .any(|(display, &original)| display != original)
    }

    pub fn original_of(&self, display_index: usize) -> EngineResult<usize> {
        self.order
            .get(display_index)
            .copied()
            .ok_or(EngineError::PageOutOfRange {
                index: display_index,
                len: self.order.len(),
            })
    }

    pub fn display_of(&self, original_index: usize) -> Option<usize> {
        self.display_of.get(original_index).copied()
    }

    pub fn select(&mut self, display_index: usize) -> bool {
        if display_index >= self.order.len() {
            return false;
        }
        if self.selected != display_index {
            self.selected = display_index;
            self.selection_changed();
        }
        true
    }

    /// Swaps the page with its predecessor. No-op for the first page.
    pub fn move_up(&mut self, display_index: usize) -> EngineResult<bool> {
        self.check(display_index)?;
        if display_index == 0 {
            return Ok(false);
        }
        self.swap(display_index - 1, display_index);
        Ok(true)
    }

    /// Swaps the page with its successor. No-op for the last page.
    pub fn move_down(&mut self, display_index: usize) -> EngineResult<bool> {
        self.check(display_index)?;
        if display_index + 1 >= self.order.len() {
            return Ok(false);
        }
        self.swap(display_index, display_index + 1);
        Ok(true)
    }

    /// Removes the page at `from` and reinserts it at `to`.
    pub fn move_to_position(&mut self, from: usize, to: usize) -> EngineResult<bool> {
        self.check(from)?;
        self.check(to)?;
        if from == to {
            return Ok(false);
        }
        let page = self.order.remove(from);
        self.order.insert(to, page);

        let selected = self.selected;
        let adjusted = if selected == from {
            to
        } else if from < selected && selected <= to {
            selected - 1
        } else if to <= selected && selected < from {
            selected + 1
        } else {
            selected
        };
        self.order_changed();
        if adjusted != selected {
            self.selected = adjusted;
            self.selection_changed();
        }
        Ok(true)
    }

    /// Restores storage order. The selected display position is kept, so it
    /// may now show a different page.
    pub fn reset(&mut self, total_pages: usize) {
        self.order = (0..total_pages).collect();
        if self.selected >= total_pages {
            self.selected = total_pages.saturating_sub(1);
        }
        self.order_changed();
    }

    /// Replaces the whole order. `order` must be a permutation of the current
    /// pages; the selection stays on the page it was showing.
    pub fn set_order(&mut self, order: Vec<usize>) -> EngineResult<()> {
        let len = self.order.len();
        if order.len() != len {
            return Err(EngineError::InvalidPageOrder(format!(
                "expected {len} pages, got {}",
                order.len()
            )));
        }
        let mut seen = vec![false; len];
        for &page in &order {
            match seen.get_mut(page) {
                None => return Err(EngineError::PageOutOfRange { index: page, len }),
                Some(true) => {
                    return Err(EngineError::InvalidPageOrder(format!(
                        "page {page} appears more than once"
                    )))
                }
                Some(slot) => *slot = true,
            }
        }
        if order == self.order {
            return Ok(());
        }

        let shown = self.selected_original();
        self.order = order;
        self.order_changed();
        if let Some(display) = shown.and_then(|page| self.display_of(page)) {
            if display != self.selected {
                self.selected = display;
                self.selection_changed();
            }
        }
        Ok(())
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.order.swap(a, b);
        self.order_changed();
        let selected = self.selected;
        if selected == a {
            self.selected = b;
        } else if selected == b {
            self.selected = a;
        }
        if self.selected != selected {
            self.selection_changed();
        }
    }

    fn check(&self, display_index: usize) -> EngineResult<()> {
        if display_index < self.order.len() {
            Ok(())
        } else {
            Err(EngineError::PageOutOfRange {
                index: display_index,
                len: self.order.len(),
            })
        }
    }

    fn order_changed(&mut self) {
        self.display_of = vec![0; self.order.len()];
        for (display, &original) in self.order.iter().enumerate() {
            if let Some(slot) = self.display_of.get_mut(original) {
                *slot = display;
            }
        }
        self.revision += 1;
        if let Some((events, document)) = &self.notify {
            events.push(EngineEvent::PageOrderChanged(*document));
        }
    }

    fn selection_changed(&self) {
        if let Some((events, document)) = &self.notify {
            events.push(EngineEvent::SelectionChanged {
                document: *document,
                display_index: self.selected,
            });
        }
    }
}
