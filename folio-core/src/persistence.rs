//! Writes page order, highlights and bookmarks back into a document.
//!
//! In-place saves never edit the original directly:
//!
//! 1. export to `<source>.tmp`
//! 2. move the original to `<source>.backup`
//! 3. move the temp file over the original
//! 4. drop the backup, or on failure move it back
//!
//! At every step one of original, backup or temp is a complete document, and
//! the temp file is removed on every exit path.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::bookmarks::{serialize_bookmarks, BookmarkRecord, BookmarkStore};
use crate::config::{EngineConfig, SaveConfig};
use crate::document::{DocumentWriter, ExportRequest};
use crate::error::{EngineError, EngineResult};
use crate::highlights::{HighlightMap, HighlightStore};
use crate::page_order::PageOrderIndex;

/// The file operations used by the save sequence.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// An owned copy of everything an export writes, so the export can run off
/// the owning task.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPayload {
    pub page_order: Vec<usize>,
    pub highlights: HighlightMap,
    pub bookmarks: String,
}

impl ExportPayload {
    pub fn capture(
        order: &PageOrderIndex,
        highlights: &HighlightStore,
        bookmarks: &BookmarkStore,
    ) -> Self {
        Self {
            page_order: order.order().to_vec(),
            highlights: highlights.snapshot(),
            bookmarks: bookmarks_in_output_order(bookmarks, order.order()),
        }
    }
}

/// Serializes bookmarks against page positions in the exported file. A page
/// exported twice keeps its bookmark on the first copy; pages left out lose
/// theirs.
fn bookmarks_in_output_order(bookmarks: &BookmarkStore, page_order: &[usize]) -> String {
    let mut records: Vec<BookmarkRecord> = bookmarks
        .iter()
        .filter_map(|record| {
            let position = page_order.iter().position(|&page| page == record.page_index)?;
            Some(BookmarkRecord {
                page_index: position,
                ..record.clone()
            })
        })
        .collect();
    records.sort_by_key(|record| record.page_index);
    serialize_bookmarks(&records)
}

pub struct PersistenceCoordinator {
    writer: Arc<dyn DocumentWriter>,
    fs: Arc<dyn FileSystem>,
    save: SaveConfig,
    bookmark_key: String,
}

impl PersistenceCoordinator {
    /// Fails when the configured suffixes would make the temp or backup
    /// path collide with the source or with each other.
    pub fn new(writer: Arc<dyn DocumentWriter>, config: &EngineConfig) -> EngineResult<Self> {
        config.save.validate()?;
        Ok(Self {
            writer,
            fs: Arc::new(StdFileSystem),
            save: config.save.clone(),
            bookmark_key: config.bookmarks.metadata_key.clone(),
        })
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn temp_path(&self, source: &Path) -> PathBuf {
        sibling(source, &self.save.temp_suffix)
    }

    pub fn backup_path(&self, source: &Path) -> PathBuf {
        sibling(source, &self.save.backup_suffix)
    }

    /// Exports to `destination` and marks the highlights saved on success.
    /// The page order's change flag is left for the caller.
    pub fn export_combined(
        &self,
        source: &Path,
        destination: &Path,
        order: &PageOrderIndex,
        highlights: &mut HighlightStore,
        bookmarks: &BookmarkStore,
    ) -> EngineResult<usize> {
        let payload = ExportPayload::capture(order, highlights, bookmarks);
        let written = self.export(source, destination, &payload)?;
        highlights.mark_saved();
        Ok(written)
    }

    /// Validates the order against the source and hands the payload to the
    /// writer. No file is touched when validation fails.
    #[instrument(skip(self, payload), fields(pages = payload.page_order.len()))]
    pub fn export(
        &self,
        source: &Path,
        destination: &Path,
        payload: &ExportPayload,
    ) -> EngineResult<usize> {
        self.check_order(source, payload)?;
        self.write_export(source, destination, payload)
    }

    fn check_order(&self, source: &Path, payload: &ExportPayload) -> EngineResult<()> {
        let page_count = self
            .writer
            .page_count(source)
            .map_err(|source_err| EngineError::Read {
                path: source.to_path_buf(),
                source: source_err,
            })?;
        validate_order(&payload.page_order, page_count)
    }

    fn write_export(
        &self,
        source: &Path,
        destination: &Path,
        payload: &ExportPayload,
    ) -> EngineResult<usize> {
        let custom_metadata = [(self.bookmark_key.clone(), payload.bookmarks.clone())];
        let request = ExportRequest {
            source,
            destination,
            page_order: &payload.page_order,
            highlights: &payload.highlights,
            custom_metadata: &custom_metadata,
        };
        let written = self
            .writer
            .write(&request)
            .map_err(|err| EngineError::Write {
                path: destination.to_path_buf(),
                source: err,
            })?;
        info!(written, destination = %destination.display(), "export finished");
        Ok(written)
    }

    /// Overwrites `source` with an export of `payload` via temp file, backup
    /// and rename.
    #[instrument(skip(self, payload))]
    pub fn save_changes(&self, source: &Path, payload: &ExportPayload) -> EngineResult<usize> {
        self.check_order(source, payload)?;

        let temp = self.temp_path(source);
        let backup = self.backup_path(source);
        let _cleanup = RemoveOnDrop {
            fs: self.fs.as_ref(),
            path: temp.clone(),
        };

        if self.fs.exists(&temp) {
            debug!(path = %temp.display(), "removing stale temp file");
            self.fs
                .remove_file(&temp)
                .map_err(|err| EngineError::io(&temp, err))?;
        }

        let written = self.write_export(source, &temp, payload)?;

        if self.fs.exists(&backup) {
            debug!(path = %backup.display(), "removing stale backup");
            self.fs
                .remove_file(&backup)
                .map_err(|err| EngineError::io(&backup, err))?;
        }
        self.fs
            .rename(source, &backup)
            .map_err(|err| EngineError::io(source, err))?;
        debug!(backup = %backup.display(), "original moved aside");

        if let Err(err) = self.fs.rename(&temp, source) {
            warn!(%err, "replacing original failed, rolling back");
            let restored = match self.fs.rename(&backup, source) {
                Ok(()) => true,
                Err(rollback) => {
                    error!(
                        %rollback,
                        backup = %backup.display(),
                        "rollback failed; the original is kept as the backup file"
                    );
                    false
                }
            };
            return Err(EngineError::ReplaceFailed {
                path: source.to_path_buf(),
                restored,
                source: err,
            });
        }

        if let Err(err) = self.fs.remove_file(&backup) {
            warn!(%err, backup = %backup.display(), "failed to remove backup after save");
        }
        info!(written, path = %source.display(), "saved in place");
        Ok(written)
    }
}

fn validate_order(order: &[usize], page_count: usize) -> EngineResult<()> {
    if order.is_empty() {
        return Err(EngineError::InvalidPageOrder("no pages to export".to_owned()));
    }
    if let Some(&bad) = order.iter().find(|&&page| page >= page_count) {
        return Err(EngineError::PageOutOfRange {
            index: bad,
            len: page_count,
        });
    }
    Ok(())
}

/// `<path><suffix>`, keeping the full file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

struct RemoveOnDrop<'a> {
    fs: &'a dyn FileSystem,
    path: PathBuf,
}

impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        if self.fs.exists(&self.path) {
            if let Err(err) = self.fs.remove_file(&self.path) {
                warn!(%err, path = %self.path.display(), "failed to remove temp file");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{anyhow, Result};
    use tempfile::tempdir;

    use crate::geometry::NormalizedRect;
    use crate::highlights::Argb;

    /// Writes a text rendition of the request so tests can inspect it.
    #[derive(Default)]
    pub(crate) struct RecordingWriter {
        pub pages: usize,
        pub fail_after_partial_write: bool,
        pub writes: AtomicUsize,
    }

    impl RecordingWriter {
        pub(crate) fn with_pages(pages: usize) -> Self {
            Self {
                pages,
                ..Self::default()
            }
        }
    }

    impl DocumentWriter for RecordingWriter {
        fn page_count(&self, source: &Path) -> Result<usize> {
            if !source.exists() {
                return Err(anyhow!("missing source {:?}", source));
            }
            Ok(self.pages)
        }

        fn write(&self, request: &ExportRequest<'_>) -> Result<usize> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_after_partial_write {
                std::fs::write(request.destination, b"partial")?;
                return Err(anyhow!("disk full"));
            }
            let marks: usize = request.highlights.values().map(Vec::len).sum();
            let body = format!(
                "order={:?}\nmarks={}\nmeta={:?}\n",
                request.page_order, marks, request.custom_metadata
            );
            std::fs::write(request.destination, body)?;
            Ok(request.page_order.len())
        }
    }

    /// Fails any rename whose source ends with one of `suffixes`.
    pub(crate) struct FailingRename {
        pub suffixes: &'static [&'static str],
    }

    impl FileSystem for FailingRename {
        fn exists(&self, path: &Path) -> bool {
            path.exists()
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            let from_name = from.to_string_lossy();
            if self.suffixes.iter().any(|suffix| from_name.ends_with(suffix)) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            fs::rename(from, to)
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            fs::remove_file(path)
        }
    }

    fn payload(order: Vec<usize>) -> ExportPayload {
        let mut highlights = HighlightStore::new();
        highlights
            .add(
                0,
                &[NormalizedRect::new(0.1, 0.1, 0.2, 0.2)],
                Argb::YELLOW,
                0.0,
            )
            .unwrap();
        let mut bookmarks = BookmarkStore::new();
        bookmarks.add(BookmarkRecord::new(1, "Results", ""));
        ExportPayload {
            page_order: order,
            highlights: highlights.snapshot(),
            bookmarks: bookmarks.to_metadata(),
        }
    }

    fn coordinator(writer: Arc<RecordingWriter>) -> PersistenceCoordinator {
        PersistenceCoordinator::new(writer, &EngineConfig::default()).unwrap()
    }

    #[test]
    fn in_place_save_replaces_original_and_cleans_up() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("paper.pdf");
        std::fs::write(&source, b"original").unwrap();
        let coordinator = coordinator(Arc::new(RecordingWriter::with_pages(3)));
        std::fs::write(coordinator.backup_path(&source), b"stale backup").unwrap();

        let written = coordinator
            .save_changes(&source, &payload(vec![2, 0, 1]))
            .unwrap();

        assert_eq!(written, 3);
        let saved = std::fs::read_to_string(&source).unwrap();
        assert!(saved.starts_with("order=[2, 0, 1]\nmarks=1\n"), "{saved}");
        assert!(saved.contains("FolioBookmarks"));
        assert!(!coordinator.temp_path(&source).exists());
        assert!(!coordinator.backup_path(&source).exists());
    }

    #[test]
    fn failed_replace_rolls_back_to_original() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("paper.pdf");
        std::fs::write(&source, b"original bytes").unwrap();
        let coordinator = coordinator(Arc::new(RecordingWriter::with_pages(2)))
            .with_file_system(Arc::new(FailingRename { suffixes: &[".tmp"] }));

        let err = coordinator
            .save_changes(&source, &payload(vec![1, 0]))
            .unwrap_err();

        assert!(matches!(err, EngineError::ReplaceFailed { restored: true, .. }));
        assert_eq!(std::fs::read(&source).unwrap(), b"original bytes");
        assert!(!coordinator.temp_path(&source).exists());
        assert!(!coordinator.backup_path(&source).exists());
    }

    #[test]
    fn failed_rollback_keeps_original_as_backup() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("paper.pdf");
        std::fs::write(&source, b"original bytes").unwrap();
        let coordinator = coordinator(Arc::new(RecordingWriter::with_pages(2)))
            .with_file_system(Arc::new(FailingRename {
                suffixes: &[".tmp", ".backup"],
            }));

        let err = coordinator
            .save_changes(&source, &payload(vec![1, 0]))
            .unwrap_err();

        assert!(matches!(err, EngineError::ReplaceFailed { restored: false, .. }));
        assert!(!source.exists());
        assert_eq!(
            std::fs::read(coordinator.backup_path(&source)).unwrap(),
            b"original bytes"
        );
        assert!(!coordinator.temp_path(&source).exists());
    }

    #[test]
    fn colliding_suffixes_are_rejected() {
        let writer = Arc::new(RecordingWriter::with_pages(1));

        let mut config = EngineConfig::default();
        config.save.temp_suffix = String::new();
        let err = PersistenceCoordinator::new(writer.clone(), &config).err();
        assert!(matches!(err, Some(EngineError::InvalidConfig(_))));

        let mut config = EngineConfig::default();
        config.save.temp_suffix = ".bak".to_owned();
        config.save.backup_suffix = ".bak".to_owned();
        let err = PersistenceCoordinator::new(writer, &config).err();
        assert!(matches!(err, Some(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn invalid_order_leaves_stale_temp_alone() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("paper.pdf");
        std::fs::write(&source, b"original").unwrap();
        let writer = Arc::new(RecordingWriter::with_pages(2));
        let coordinator = coordinator(Arc::clone(&writer));
        let temp = coordinator.temp_path(&source);
        std::fs::write(&temp, b"leftover").unwrap();

        let err = coordinator
            .save_changes(&source, &payload(vec![0, 5]))
            .unwrap_err();

        assert!(matches!(err, EngineError::PageOutOfRange { index: 5, len: 2 }));
        assert_eq!(std::fs::read(&temp).unwrap(), b"leftover");
        assert_eq!(std::fs::read(&source).unwrap(), b"original");
        assert_eq!(writer.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_export_leaves_original_untouched() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("paper.pdf");
        std::fs::write(&source, b"original").unwrap();
        let writer = Arc::new(RecordingWriter {
            pages: 2,
            fail_after_partial_write: true,
            ..RecordingWriter::default()
        });
        let coordinator = coordinator(Arc::clone(&writer));

        let err = coordinator
            .save_changes(&source, &payload(vec![0, 1]))
            .unwrap_err();

        assert!(matches!(err, EngineError::Write { .. }));
        assert_eq!(std::fs::read(&source).unwrap(), b"original");
        assert!(!coordinator.temp_path(&source).exists());
        assert!(!coordinator.backup_path(&source).exists());
    }

    #[test]
    fn invalid_order_never_reaches_the_writer() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("paper.pdf");
        let destination = dir.path().join("out.pdf");
        std::fs::write(&source, b"original").unwrap();
        let writer = Arc::new(RecordingWriter::with_pages(2));
        let coordinator = coordinator(Arc::clone(&writer));

        let err = coordinator
            .export(&source, &destination, &payload(vec![0, 2]))
            .unwrap_err();
        assert!(matches!(err, EngineError::PageOutOfRange { index: 2, len: 2 }));

        let err = coordinator
            .export(&source, &destination, &payload(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPageOrder(_)));

        assert_eq!(writer.writes.load(Ordering::SeqCst), 0);
        assert!(!destination.exists());
    }

    #[test]
    fn export_combined_marks_highlights_saved() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("paper.pdf");
        let destination = dir.path().join("copy.pdf");
        std::fs::write(&source, b"original").unwrap();
        let coordinator = coordinator(Arc::new(RecordingWriter::with_pages(2)));

        let order = PageOrderIndex::new(2);
        let mut highlights = HighlightStore::new();
        highlights
            .add(1, &[NormalizedRect::new(0.0, 0.0, 0.5, 0.1)], Argb::YELLOW, 0.0)
            .unwrap();
        let bookmarks = BookmarkStore::new();

        let written = coordinator
            .export_combined(&source, &destination, &order, &mut highlights, &bookmarks)
            .unwrap();
        assert_eq!(written, 2);
        assert!(!highlights.has_unsaved());
        assert_eq!(std::fs::read(&source).unwrap(), b"original");
        assert!(std::fs::read_to_string(&destination)
            .unwrap()
            .contains("marks=1"));
    }

    #[test]
    fn captured_bookmarks_point_at_output_positions() {
        let mut order = PageOrderIndex::new(3);
        order.set_order(vec![2, 0, 1]).unwrap();
        let mut bookmarks = BookmarkStore::new();
        bookmarks.add(BookmarkRecord::new(0, "first", ""));
        bookmarks.add(BookmarkRecord::new(2, "last", ""));

        let payload = ExportPayload::capture(&order, &HighlightStore::new(), &bookmarks);
        assert_eq!(
            crate::bookmarks::deserialize_bookmarks(&payload.bookmarks),
            vec![
                BookmarkRecord::new(0, "last", ""),
                BookmarkRecord::new(1, "first", ""),
            ]
        );
        assert_eq!(payload.page_order, vec![2, 0, 1]);
    }

    #[test]
    fn missing_source_is_a_read_error() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("absent.pdf");
        let coordinator = coordinator(Arc::new(RecordingWriter::with_pages(1)));
        let err = coordinator
            .save_changes(&source, &payload(vec![0]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Read { .. }));
    }

    #[test]
    fn sibling_paths_keep_extension() {
        let coordinator = coordinator(Arc::new(RecordingWriter::with_pages(1)));
        let source = Path::new("/docs/report.v2.pdf");
        assert_eq!(
            coordinator.temp_path(source),
            PathBuf::from("/docs/report.v2.pdf.tmp")
        );
        assert_eq!(
            coordinator.backup_path(source),
            PathBuf::from("/docs/report.v2.pdf.backup")
        );
    }
}
