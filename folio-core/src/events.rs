use std::sync::Arc;

use parking_lot::Mutex;

use crate::DocumentId;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Visual page order changed; order-dependent views (thumbnails) are stale.
    PageOrderChanged(DocumentId),
    SelectionChanged {
        document: DocumentId,
        display_index: usize,
    },
    /// The consumer should show `display_index`, scrolling to the current
    /// search match when `scroll_to_match` is set.
    NavigateTo {
        document: DocumentId,
        display_index: usize,
        scroll_to_match: bool,
    },
    SearchUpdated {
        document: DocumentId,
        matches: usize,
    },
    /// `page` is an original page index; `None` means every page.
    HighlightsChanged {
        document: DocumentId,
        page: Option<usize>,
    },
    BookmarksChanged(DocumentId),
    SaveStarted(DocumentId),
    SaveFinished {
        document: DocumentId,
        success: bool,
    },
}

/// Shared queue of engine notifications, drained by the UI layer.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<Vec<EngineEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: EngineEvent) {
        self.inner.lock().push(event);
    }

    pub fn drain(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
