//! Contracts with the document reader and writer. The engine never parses or
//! writes the file format itself.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::geometry::{PageSize, TextRun};
use crate::highlights::{HighlightMap, HighlightMark};
use crate::DocumentId;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub path: PathBuf,
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

/// Everything the engine needs from a freshly opened document.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub info: DocumentInfo,
    /// Indexed by original page.
    pub page_sizes: Vec<PageSize>,
    /// Indexed by original page; may be empty when no text layer was read.
    pub runs: Vec<Vec<TextRun>>,
    /// Raw serialized bookmark list from the document's custom metadata.
    pub bookmark_payload: Option<String>,
    /// Highlights this engine wrote on an earlier save.
    pub highlights: BTreeMap<usize, Vec<HighlightMark>>,
}

#[async_trait::async_trait]
pub trait DocumentReader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<LoadedDocument>;
}

#[derive(Debug, Clone)]
pub struct ExportRequest<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    /// Original page indices in output order.
    pub page_order: &'a [usize],
    /// Highlights per original page, in normalized unrotated space.
    pub highlights: &'a HighlightMap,
    /// Custom string metadata to set on the output (key, value).
    pub custom_metadata: &'a [(String, String)],
}

/// Produces a new document from a source: copies pages in the requested
/// order, draws highlights as annotations, carries over descriptive metadata
/// and sets custom metadata fields.
///
/// Implementations must either write `destination` completely or leave no
/// file there.
pub trait DocumentWriter: Send + Sync {
    fn page_count(&self, source: &Path) -> Result<usize>;

    /// Returns the number of pages written.
    fn write(&self, request: &ExportRequest<'_>) -> Result<usize>;
}
