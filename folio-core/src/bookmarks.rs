//! User bookmarks, one per original page, stored in document metadata as
//! `[{"pageIndex":0,"title":"...","note":"..."},...]`.
//!
//! The payload may be hand-edited or written by another tool version, so
//! reading is lenient: each object is decoded on its own and entries that
//! fail are skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRecord {
    pub page_index: usize,
    pub title: String,
    #[serde(default)]
    pub note: String,
}

impl BookmarkRecord {
    pub fn new(page_index: usize, title: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            page_index,
            title: title.into(),
            note: note.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BookmarkStore {
    records: BTreeMap<usize, BookmarkRecord>,
}

impl BookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a metadata payload. Later entries for the same
    /// page win.
    pub fn from_metadata(payload: &str) -> Self {
        let mut store = Self::new();
        for record in deserialize_bookmarks(payload) {
            store.add(record);
        }
        store
    }

    /// Inserts `record`, returning the bookmark it replaced on that page.
    pub fn add(&mut self, record: BookmarkRecord) -> Option<BookmarkRecord> {
        self.records.insert(record.page_index, record)
    }

    pub fn remove(&mut self, page_index: usize) -> Option<BookmarkRecord> {
        self.records.remove(&page_index)
    }

    pub fn get(&self, page_index: usize) -> Option<&BookmarkRecord> {
        self.records.get(&page_index)
    }

    pub fn contains(&self, page_index: usize) -> bool {
        self.records.contains_key(&page_index)
    }

    /// Records ordered by page index.
    pub fn iter(&self) -> impl Iterator<Item = &BookmarkRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn to_metadata(&self) -> String {
        let records: Vec<BookmarkRecord> = self.records.values().cloned().collect();
        serialize_bookmarks(&records)
    }

    /// Re-keys bookmarks through `new_index_of[old] = new`; bookmarks on
    /// pages that no longer exist are dropped.
    pub fn remap_pages(&mut self, new_index_of: &[usize]) {
        let records = std::mem::take(&mut self.records);
        for (page, mut record) in records {
            if let Some(&new) = new_index_of.get(page) {
                record.page_index = new;
                self.records.insert(new, record);
            }
        }
    }
}

pub fn serialize_bookmarks(records: &[BookmarkRecord]) -> String {
    let mut out = String::from("[");
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match serde_json::to_string(record) {
            Ok(entry) => out.push_str(&entry),
            Err(err) => warn!(?err, page = record.page_index, "failed to encode bookmark"),
        }
    }
    out.push(']');
    out
}

/// Decodes every well-formed entry in `payload`, skipping the rest.
#[instrument(skip(payload), fields(len = payload.len()))]
pub fn deserialize_bookmarks(payload: &str) -> Vec<BookmarkRecord> {
    let trimmed = payload.trim();
    let Some(body) = trimmed.strip_prefix('[') else {
        if !trimmed.is_empty() {
            warn!("bookmark metadata is not a list; ignoring it");
        }
        return Vec::new();
    };

    let mut records = Vec::new();
    for (offset, object) in split_objects(body) {
        match serde_json::from_str::<BookmarkRecord>(object) {
            Ok(record) => records.push(record),
            Err(err) => warn!(offset, %err, "skipping malformed bookmark entry"),
        }
    }
    records
}

/// Yields each top-level `{...}` slice with its byte offset. Braces inside
/// string literals are ignored; an unterminated trailing object is dropped.
fn split_objects(body: &str) -> Vec<(usize, &str)> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(begin) = start.take() {
                        objects.push((begin, &body[begin..=i]));
                    }
                }
            }
            _ => {}
        }
    }
    if start.is_some() {
        warn!("bookmark metadata ends inside an entry; dropping it");
    }
    objects
}
