use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use tracing::{instrument, warn};

use folio_core::{DocumentReader, EngineConfig, LoadedDocument, TextRun};

use crate::reader::LopdfReader;

/// [`LopdfReader`] plus word-level text runs extracted by Pdfium.
pub struct PdfiumReader {
    pdfium: Arc<Pdfium>,
    base: LopdfReader,
}

impl PdfiumReader {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let pdfium = match bind_pdfium_from_build_hint() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
            base: LopdfReader::new(config),
        })
    }

    #[instrument(skip(self))]
    fn text_runs(&self, path: &Path) -> Result<Vec<Vec<TextRun>>> {
        let document = self
            .pdfium
            .load_pdf_from_file(path, None)
            .with_context(|| format!("failed to open {:?}", path))?;

        let mut pages = Vec::new();
        for (index, page) in document.pages().iter().enumerate() {
            let page_height = page.height().value;
            let text = match page.text() {
                Ok(text) => text,
                Err(err) => {
                    warn!(?err, page = index, "failed to extract text");
                    pages.push(Vec::new());
                    continue;
                }
            };
            let mut runs = Vec::new();
            for segment in text.segments().iter() {
                let bounds = segment.bounds();
                let left = bounds.left().value;
                let bottom = bounds.bottom().value;
                runs.extend(split_into_words(
                    &segment.text(),
                    left,
                    page_height - bottom,
                    bounds.right().value - left,
                    bounds.top().value - bottom,
                ));
            }
            pages.push(runs);
        }
        Ok(pages)
    }
}

#[async_trait]
impl DocumentReader for PdfiumReader {
    async fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let mut loaded = self.base.read(path)?;
        loaded.runs = self.text_runs(&loaded.info.path)?;
        if loaded.runs.len() != loaded.info.page_count {
            warn!(
                text_pages = loaded.runs.len(),
                pages = loaded.info.page_count,
                "text layer and page tree disagree on page count"
            );
        }
        Ok(loaded)
    }
}

/// Splits a text segment into one run per word, trailing whitespace kept
/// with its word. Widths are shared out by character count.
fn split_into_words(text: &str, x: f32, y: f32, width: f32, height: f32) -> Vec<TextRun> {
    let total = text.chars().count();
    if total == 0 {
        return Vec::new();
    }
    let per_char = width / total as f32;
    let mut runs = Vec::new();
    let mut offset = 0usize;
    for word in text.split_inclusive(char::is_whitespace) {
        let chars = word.chars().count();
        if !word.trim().is_empty() {
            runs.push(TextRun {
                text: word.to_owned(),
                x: x + offset as f32 * per_char,
                y,
                width: chars as f32 * per_char,
                height,
            });
        }
        offset += chars;
    }
    runs
}

fn bind_pdfium_from_build_hint() -> Option<Pdfium> {
    match option_env!("FOLIO_PDFIUM_LIBRARY_PATH") {
        Some(path) if !path.is_empty() => match Pdfium::bind_to_library(path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!(
                    "failed to load Pdfium from build-provided path {}: {}",
                    path, err
                );
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}
