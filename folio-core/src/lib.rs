pub mod bookmarks;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod geometry;
pub mod highlights;
pub mod merge;
pub mod page_order;
pub mod persistence;
pub mod search;
pub mod session;

use std::path::Path;

use once_cell::sync::Lazy;
use uuid::Uuid;

pub use bookmarks::{deserialize_bookmarks, serialize_bookmarks, BookmarkRecord, BookmarkStore};
pub use config::EngineConfig;
pub use document::{
    DocumentInfo, DocumentMetadata, DocumentReader, DocumentWriter, ExportRequest, LoadedDocument,
};
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, EventLog};
pub use geometry::{
    rotate_forward, rotate_inverse, to_normalized, NormalizedRect, PageSize, PointRect,
    RotationAngle, TextRun,
};
pub use highlights::{Argb, HighlightBand, HighlightMap, HighlightMark, HighlightStore};
pub use merge::{merge_rects, merge_rects_with, MergeTuning};
pub use page_order::PageOrderIndex;
pub use persistence::{ExportPayload, FileSystem, PersistenceCoordinator, StdFileSystem};
pub use search::{NavigationRequest, SearchEngine, SearchMatch};
pub use session::{Command, DocumentSession, SearchBands};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3d0f6a52-8c41-5b0e-9f27-1c6a4e8b7d90").expect("valid namespace UUID")
});

/// Stable identifier for the document at `path`, independent of how the path
/// was spelled.
pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&DOCUMENT_NAMESPACE, rendered.as_bytes())
}
