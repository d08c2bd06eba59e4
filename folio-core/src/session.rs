//! One open document: its page order, search state, highlights and
//! bookmarks, mutated only through [`DocumentSession::apply`] and the save
//! methods.
//!
//! The UI layer speaks in display indices; everything stored is keyed by
//! original page index, and the session translates between the two.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::bookmarks::{BookmarkRecord, BookmarkStore};
use crate::config::EngineConfig;
use crate::document::{DocumentInfo, DocumentReader, LoadedDocument};
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventLog};
use crate::geometry::{
    rotate_forward, to_normalized, NormalizedRect, PageSize, RotationAngle, TextRun,
};
use crate::highlights::{Argb, HighlightBand, HighlightStore};
use crate::merge::merge_rects_with;
use crate::page_order::PageOrderIndex;
use crate::persistence::{ExportPayload, PersistenceCoordinator};
use crate::search::{NavigationRequest, SearchEngine};

#[derive(Debug, Clone)]
pub enum Command {
    SelectPage { display_index: usize },
    MovePageUp { display_index: usize },
    MovePageDown { display_index: usize },
    MovePage { from: usize, to: usize },
    /// Replaces the whole order; must be a permutation of the pages.
    SetOrder { order: Vec<usize> },
    ResetOrder,
    Rotate { degrees: f32 },
    Search { query: String },
    SearchNext,
    SearchPrev,
    /// `rects` are in display space, i.e. on the page as currently rotated.
    AddHighlight {
        display_index: usize,
        rects: Vec<NormalizedRect>,
        color: Option<Argb>,
    },
    UndoHighlight { display_index: usize },
    RedoHighlight { display_index: usize },
    RemoveHighlight { display_index: usize, mark: usize },
    ClearPageHighlights { display_index: usize },
    ClearAllHighlights,
    RevertHighlights,
    AddBookmark {
        display_index: usize,
        title: String,
        note: String,
    },
    RemoveBookmark { display_index: usize },
}

/// Search hits on one page, ready to paint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchBands {
    pub current: Vec<NormalizedRect>,
    pub others: Vec<Vec<NormalizedRect>>,
}

pub struct DocumentSession {
    info: DocumentInfo,
    page_sizes: Vec<PageSize>,
    runs: Vec<Vec<TextRun>>,
    order: PageOrderIndex,
    search: SearchEngine,
    highlights: HighlightStore,
    bookmarks: BookmarkStore,
    bookmarks_dirty: bool,
    rotation: RotationAngle,
    config: EngineConfig,
    coordinator: Arc<PersistenceCoordinator>,
    saving: Arc<AtomicBool>,
    events: EventLog,
}

impl DocumentSession {
    #[instrument(skip(reader, coordinator, config))]
    pub async fn open_with<R: DocumentReader + ?Sized>(
        reader: &R,
        path: &Path,
        coordinator: Arc<PersistenceCoordinator>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let loaded = reader.load(path).await.map_err(|source| EngineError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            pages = loaded.info.page_count,
            highlights = loaded.highlights.len(),
            "document opened"
        );
        Ok(Self::from_loaded(loaded, coordinator, config))
    }

    pub fn from_loaded(
        loaded: LoadedDocument,
        coordinator: Arc<PersistenceCoordinator>,
        config: EngineConfig,
    ) -> Self {
        let LoadedDocument {
            info,
            mut page_sizes,
            mut runs,
            bookmark_payload,
            highlights,
        } = loaded;
        let page_count = info.page_count;
        if page_sizes.len() != page_count {
            warn!(
                sizes = page_sizes.len(),
                page_count, "reader returned a page size count that does not match"
            );
            page_sizes.resize(page_count, PageSize::new(0.0, 0.0));
        }
        runs.resize_with(page_count, Vec::new);

        let events = EventLog::new();
        let mut bookmarks = bookmark_payload
            .as_deref()
            .map(BookmarkStore::from_metadata)
            .unwrap_or_default();
        // Drops bookmarks that point past the last page.
        bookmarks.remap_pages(&(0..page_count).collect::<Vec<_>>());
        let highlights = HighlightStore::from_saved(
            highlights
                .into_iter()
                .filter(|(page, _)| *page < page_count)
                .collect(),
        );

        Self {
            order: PageOrderIndex::new(page_count).with_events(events.clone(), info.id),
            info,
            page_sizes,
            runs,
            search: SearchEngine::new(),
            highlights,
            bookmarks,
            bookmarks_dirty: false,
            rotation: RotationAngle::Deg0,
            config,
            coordinator,
            saving: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn info(&self) -> &DocumentInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.info.path
    }

    pub fn page_count(&self) -> usize {
        self.info.page_count
    }

    pub fn page_size(&self, original_page: usize) -> Option<PageSize> {
        self.page_sizes.get(original_page).copied()
    }

    pub fn runs(&self, original_page: usize) -> &[TextRun] {
        self.runs.get(original_page).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn order(&self) -> &PageOrderIndex {
        &self.order
    }

    pub fn search(&self) -> &SearchEngine {
        &self.search
    }

    pub fn highlights(&self) -> &HighlightStore {
        &self.highlights
    }

    pub fn bookmarks(&self) -> &BookmarkStore {
        &self.bookmarks
    }

    pub fn rotation(&self) -> RotationAngle {
        self.rotation
    }

    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.highlights.has_unsaved() || self.order.has_changes() || self.bookmarks_dirty
    }

    pub fn apply(&mut self, command: Command) -> EngineResult<()> {
        let document = self.info.id;
        match command {
            Command::SelectPage { display_index } => {
                if !self.order.select(display_index) {
                    return Err(EngineError::PageOutOfRange {
                        index: display_index,
                        len: self.order.len(),
                    });
                }
            }
            Command::MovePageUp { display_index } => {
                self.order.move_up(display_index)?;
            }
            Command::MovePageDown { display_index } => {
                self.order.move_down(display_index)?;
            }
            Command::MovePage { from, to } => {
                self.order.move_to_position(from, to)?;
            }
            Command::SetOrder { order } => self.order.set_order(order)?,
            Command::ResetOrder => self.order.reset(self.page_count()),
            Command::Rotate { degrees } => {
                self.rotation = RotationAngle::snap(degrees);
                self.events.push(EngineEvent::HighlightsChanged {
                    document,
                    page: None,
                });
            }
            Command::Search { query } => {
                let navigation = self.search.recompute(&query, &self.runs, &self.order);
                self.events.push(EngineEvent::SearchUpdated {
                    document,
                    matches: self.search.matches().len(),
                });
                self.navigate(navigation);
            }
            Command::SearchNext => {
                let navigation = self.search.next(&self.order);
                self.navigate(navigation);
            }
            Command::SearchPrev => {
                let navigation = self.search.previous(&self.order);
                self.navigate(navigation);
            }
            Command::AddHighlight {
                display_index,
                rects,
                color,
            } => {
                let page = self.order.original_of(display_index)?;
                let color = color.unwrap_or(self.config.highlight.default_color);
                let degrees = f32::from(self.rotation.degrees());
                self.highlights.add(page, &rects, color, degrees)?;
                self.highlights_changed(Some(page));
            }
            Command::UndoHighlight { display_index } => {
                let page = self.order.original_of(display_index)?;
                if self.highlights.undo_last(page) {
                    self.highlights_changed(Some(page));
                }
            }
            Command::RedoHighlight { display_index } => {
                let page = self.order.original_of(display_index)?;
                if self.highlights.redo_last(page) {
                    self.highlights_changed(Some(page));
                }
            }
            Command::RemoveHighlight {
                display_index,
                mark,
            } => {
                let page = self.order.original_of(display_index)?;
                match self.highlights.remove(page, mark) {
                    Some(_) => self.highlights_changed(Some(page)),
                    None => debug!(page, mark, "no such highlight"),
                }
            }
            Command::ClearPageHighlights { display_index } => {
                let page = self.order.original_of(display_index)?;
                self.highlights.clear_page(page);
                self.highlights_changed(Some(page));
            }
            Command::ClearAllHighlights => {
                self.highlights.clear_all();
                self.highlights_changed(None);
            }
            Command::RevertHighlights => {
                self.highlights.revert_unsaved();
                self.highlights_changed(None);
            }
            Command::AddBookmark {
                display_index,
                title,
                note,
            } => {
                let page = self.order.original_of(display_index)?;
                self.bookmarks.add(BookmarkRecord::new(page, title, note));
                self.bookmarks_changed();
            }
            Command::RemoveBookmark { display_index } => {
                let page = self.order.original_of(display_index)?;
                if self.bookmarks.remove(page).is_some() {
                    self.bookmarks_changed();
                }
            }
        }
        Ok(())
    }

    /// Highlight marks for the page shown at `display_index`, in display space.
    pub fn highlight_bands(&self, display_index: usize) -> EngineResult<Vec<HighlightBand>> {
        let page = self.order.original_of(display_index)?;
        Ok(self.highlights.bands_for_page(
            page,
            f32::from(self.rotation.degrees()),
            self.config.merge,
        ))
    }

    pub fn search_bands(&self, display_index: usize) -> EngineResult<SearchBands> {
        let page = self.order.original_of(display_index)?;
        let Some(size) = self.page_size(page) else {
            return Ok(SearchBands::default());
        };
        let current = self.search.current_index();
        let mut bands = SearchBands::default();
        for (index, found) in self.search.matches_on_page(page) {
            let rects: Vec<NormalizedRect> = found
                .runs
                .iter()
                .map(|run| rotate_forward(to_normalized(run, size), self.rotation))
                .collect();
            let merged = merge_rects_with(&rects, self.config.merge);
            if Some(index) == current {
                bands.current = merged;
            } else {
                bands.others.push(merged);
            }
        }
        Ok(bands)
    }

    /// Writes the current state over the source file and rebases the
    /// session onto the new storage order.
    #[instrument(skip(self), fields(path = %self.info.path.display()))]
    pub async fn save_changes(&mut self) -> EngineResult<usize> {
        let _saving = SavingFlag::acquire(&self.saving)?;
        let payload = ExportPayload::capture(&self.order, &self.highlights, &self.bookmarks);
        let coordinator = Arc::clone(&self.coordinator);
        let source = self.info.path.clone();

        let result = self
            .run_save(move || coordinator.save_changes(&source, &payload))
            .await;
        let written = result?;
        self.rebase_after_save();
        Ok(written)
    }

    /// Writes the current state to `destination`, leaving the source and the
    /// page order as they are.
    #[instrument(skip(self), fields(destination = %destination.display()))]
    pub async fn export_to(&mut self, destination: &Path) -> EngineResult<usize> {
        let _saving = SavingFlag::acquire(&self.saving)?;
        let payload = ExportPayload::capture(&self.order, &self.highlights, &self.bookmarks);
        let coordinator = Arc::clone(&self.coordinator);
        let source = self.info.path.clone();
        let destination: PathBuf = destination.to_path_buf();

        let written = self
            .run_save(move || coordinator.export(&source, &destination, &payload))
            .await?;
        self.highlights.mark_saved();
        Ok(written)
    }

    async fn run_save<F>(&self, job: F) -> EngineResult<usize>
    where
        F: FnOnce() -> EngineResult<usize> + Send + 'static,
    {
        let document = self.info.id;
        self.events.push(EngineEvent::SaveStarted(document));
        let result = tokio::task::spawn_blocking(job)
            .await
            .map_err(|err| EngineError::Background(err.to_string()))
            .and_then(|inner| inner);
        if let Err(err) = &result {
            warn!(%err, "save failed");
        }
        self.events.push(EngineEvent::SaveFinished {
            document,
            success: result.is_ok(),
        });
        result
    }

    /// After an in-place save the file's storage order is the old display
    /// order. Every per-page store is moved onto the new indices.
    fn rebase_after_save(&mut self) {
        let saved_order = self.order.order().to_vec();
        let mut new_index_of = vec![0; saved_order.len()];
        for (new, &old) in saved_order.iter().enumerate() {
            new_index_of[old] = new;
        }

        self.page_sizes = saved_order.iter().map(|&old| self.page_sizes[old]).collect();
        let mut runs = std::mem::take(&mut self.runs);
        self.runs = saved_order
            .iter()
            .map(|&old| std::mem::take(&mut runs[old]))
            .collect();
        self.highlights.remap_pages(&new_index_of);
        self.bookmarks.remap_pages(&new_index_of);
        self.order.reset(saved_order.len());

        if !self.search.query().is_empty() {
            let query = self.search.query().to_owned();
            self.search.recompute(&query, &self.runs, &self.order);
            self.events.push(EngineEvent::SearchUpdated {
                document: self.info.id,
                matches: self.search.matches().len(),
            });
        }

        self.highlights.mark_saved();
        self.bookmarks_dirty = false;
        self.highlights_changed(None);
        debug!("session rebased onto saved order");
    }

    fn navigate(&mut self, navigation: Option<NavigationRequest>) {
        let Some(request) = navigation else {
            return;
        };
        self.order.select(request.display_index);
        self.events.push(EngineEvent::NavigateTo {
            document: self.info.id,
            display_index: request.display_index,
            scroll_to_match: request.scroll_to_match,
        });
    }

    fn highlights_changed(&self, page: Option<usize>) {
        self.events.push(EngineEvent::HighlightsChanged {
            document: self.info.id,
            page,
        });
    }

    fn bookmarks_changed(&mut self) {
        self.bookmarks_dirty = true;
        self.events.push(EngineEvent::BookmarksChanged(self.info.id));
    }
}

/// Holds the session's saving flag for the duration of one save.
struct SavingFlag {
    flag: Arc<AtomicBool>,
}

impl SavingFlag {
    fn acquire(flag: &Arc<AtomicBool>) -> EngineResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::SaveInProgress)?;
        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for SavingFlag {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
