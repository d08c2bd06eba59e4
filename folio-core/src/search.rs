//! Case-insensitive search across the text runs of every page.
//!
//! A match may span several consecutive runs, because documents routinely
//! split one visual word across runs. Runs are compared with surrounding
//! whitespace trimmed and concatenated without separators; a match can only
//! begin at the start of a run.

use rayon::prelude::*;

use crate::geometry::TextRun;
use crate::page_order::PageOrderIndex;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchMatch {
    /// Original page index.
    pub page_index: usize,
    pub runs: Vec<TextRun>,
}

impl SearchMatch {
    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }
}

/// Where the consumer should go after a search step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationRequest {
    pub display_index: usize,
    pub scroll_to_match: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SearchEngine {
    query: String,
    matches: Vec<SearchMatch>,
    current: Option<usize>,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn matches(&self) -> &[SearchMatch] {
        &self.matches
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_match(&self) -> Option<&SearchMatch> {
        self.current.and_then(|index| self.matches.get(index))
    }

    /// `(current, total)`, 1-based, for status lines.
    pub fn position(&self) -> Option<(usize, usize)> {
        self.current.map(|index| (index + 1, self.matches.len()))
    }

    pub fn clear(&mut self) {
        self.query.clear();
        self.matches.clear();
        self.current = None;
    }

    /// Replaces the previous results with matches for `query`.
    ///
    /// Pages are scanned in storage order so results stay stable when pages
    /// are reordered. When the first match is not on the selected page a
    /// navigation request for it is returned.
    pub fn recompute(
        &mut self,
        query: &str,
        runs_by_page: &[Vec<TextRun>],
        order: &PageOrderIndex,
    ) -> Option<NavigationRequest> {
        let query = query.to_lowercase();
        if query.trim().is_empty() {
            self.clear();
            return None;
        }

        self.matches = runs_by_page
            .par_iter()
            .enumerate()
            .map(|(page_index, runs)| find_in_page(page_index, runs, &query))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();
        self.query = query;

        if self.matches.is_empty() {
            self.current = None;
            return None;
        }
        self.current = Some(0);
        let display_index = order.display_of(self.matches[0].page_index)?;
        if display_index == order.selected_display_index() {
            return None;
        }
        Some(NavigationRequest {
            display_index,
            scroll_to_match: false,
        })
    }

    pub fn next(&mut self, order: &PageOrderIndex) -> Option<NavigationRequest> {
        let total = self.matches.len();
        let current = self.current?;
        self.step_to((current + 1) % total, order)
    }

    pub fn previous(&mut self, order: &PageOrderIndex) -> Option<NavigationRequest> {
        let total = self.matches.len();
        let current = self.current?;
        self.step_to((current + total - 1) % total, order)
    }

    /// Runs of the current match if it sits on the page shown at
    /// `display_index`, otherwise nothing.
    pub fn current_match_for_page(
        &self,
        display_index: usize,
        order: &PageOrderIndex,
    ) -> &[TextRun] {
        let Ok(original) = order.original_of(display_index) else {
            return &[];
        };
        match self.current_match() {
            Some(found) if found.page_index == original => &found.runs,
            _ => &[],
        }
    }

    /// Every match on an original page, with its position in the result list.
    pub fn matches_on_page(
        &self,
        original_page: usize,
    ) -> impl Iterator<Item = (usize, &SearchMatch)> {
        self.matches
            .iter()
            .enumerate()
            .filter(move |(_, found)| found.page_index == original_page)
    }

    /// Re-keys matches through `new_index_of[old] = new`.
    pub fn remap_pages(&mut self, new_index_of: &[usize]) {
        for found in &mut self.matches {
            if let Some(&new) = new_index_of.get(found.page_index) {
                found.page_index = new;
            }
        }
    }

    fn step_to(&mut self, index: usize, order: &PageOrderIndex) -> Option<NavigationRequest> {
        self.current = Some(index);
        let display_index = order.display_of(self.matches[index].page_index)?;
        Some(NavigationRequest {
            display_index,
            scroll_to_match: true,
        })
    }
}

fn find_in_page(page_index: usize, runs: &[TextRun], query: &str) -> Vec<SearchMatch> {
    let lowered: Vec<String> = runs.iter().map(|run| run.text.to_lowercase()).collect();
    let mut found = Vec::new();
    let mut start = 0;
    while start < runs.len() {
        match match_from(&lowered, start, query) {
            Some(end) => {
                found.push(SearchMatch {
                    page_index,
                    runs: runs[start..=end].to_vec(),
                });
                start = end + 1;
            }
            None => start += 1,
        }
    }
    found
}

/// Tries to consume `query` with the runs starting at `start`; returns the
/// index of the last run used. Whitespace at run boundaries is optional in
/// the query.
fn match_from(lowered: &[String], start: usize, query: &str) -> Option<usize> {
    let mut remaining = query.trim();
    for (index, text) in lowered.iter().enumerate().skip(start) {
        let text = text.trim();
        if text.is_empty() {
            if index == start {
                return None;
            }
            continue;
        }
        if text.starts_with(remaining) {
            return Some(index);
        }
        remaining = remaining.strip_prefix(text)?.trim_start();
        if remaining.is_empty() {
            return Some(index);
        }
    }
    None
}
