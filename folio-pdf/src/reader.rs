use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lopdf::{Dictionary, Document, ObjectId};
use tracing::{debug, instrument};

use folio_core::{
    document_id_for_path, Argb, DocumentInfo, DocumentMetadata, DocumentReader, EngineConfig,
    HighlightMark, LoadedDocument, NormalizedRect, PageSize, PointRect,
};

use crate::objects::{
    annotation_entries, float_array, info_dictionary, is_tagged_highlight, media_box,
    resolve, resolve_dict, text_entry,
};

/// Reads page geometry, metadata, bookmarks and previously written
/// highlights. Extracts no text; see `PdfiumReader` for text runs.
#[derive(Debug, Clone)]
pub struct LopdfReader {
    bookmark_key: String,
}

impl LopdfReader {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            bookmark_key: config.bookmarks.metadata_key.clone(),
        }
    }

    #[instrument(skip(self))]
    pub fn read(&self, path: &Path) -> Result<LoadedDocument> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let doc = Document::load(&absolute)
            .with_context(|| format!("failed to open {:?}", absolute))?;

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let mut page_sizes = Vec::with_capacity(pages.len());
        let mut highlights = BTreeMap::new();
        for (index, &page_id) in pages.iter().enumerate() {
            let media = media_box(&doc, page_id);
            page_sizes.push(PageSize::new(media.width(), media.height()));
            let marks = tagged_highlights(&doc, page_id, &media);
            if !marks.is_empty() {
                highlights.insert(index, marks);
            }
        }

        let info = info_dictionary(&doc);
        let metadata = info
            .map(|info| read_metadata(&doc, info))
            .unwrap_or_default();
        let bookmark_payload =
            info.and_then(|info| text_entry(&doc, info, self.bookmark_key.as_bytes()));
        debug!(
            pages = pages.len(),
            highlighted_pages = highlights.len(),
            has_bookmarks = bookmark_payload.is_some(),
            "read document"
        );

        Ok(LoadedDocument {
            info: DocumentInfo {
                id: document_id_for_path(&absolute),
                path: absolute,
                page_count: pages.len(),
                metadata,
            },
            page_sizes,
            runs: Vec::new(),
            bookmark_payload,
            highlights,
        })
    }
}

#[async_trait]
impl DocumentReader for LopdfReader {
    async fn load(&self, path: &Path) -> Result<LoadedDocument> {
        self.read(path)
    }
}

fn read_metadata(doc: &Document, info: &Dictionary) -> DocumentMetadata {
    let keywords = text_entry(doc, info, b"Keywords")
        .map(|keywords| {
            keywords
                .split(',')
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    DocumentMetadata {
        title: text_entry(doc, info, b"Title"),
        author: text_entry(doc, info, b"Author"),
        subject: text_entry(doc, info, b"Subject"),
        keywords,
    }
}

fn tagged_highlights(doc: &Document, page_id: ObjectId, media: &PointRect) -> Vec<HighlightMark> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    annotation_entries(doc, page)
        .iter()
        .filter(|entry| is_tagged_highlight(doc, entry))
        .filter_map(|entry| resolve_dict(doc, entry))
        .filter_map(|annot| mark_from_annotation(doc, annot, media))
        .collect()
}

fn mark_from_annotation(
    doc: &Document,
    annot: &Dictionary,
    media: &PointRect,
) -> Option<HighlightMark> {
    let mut rects: Vec<NormalizedRect> = annot
        .get(b"QuadPoints")
        .ok()
        .and_then(|quads| float_array(doc, quads))
        .unwrap_or_default()
        .chunks_exact(8)
        .filter_map(|quad| {
            let xs = [quad[0], quad[2], quad[4], quad[6]];
            let ys = [quad[1], quad[3], quad[5], quad[7]];
            let points = PointRect::new(
                xs.iter().copied().fold(f32::INFINITY, f32::min),
                ys.iter().copied().fold(f32::INFINITY, f32::min),
                xs.iter().copied().fold(f32::NEG_INFINITY, f32::max),
                ys.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            );
            NormalizedRect::from_points(&points, media)
        })
        .collect();
    if rects.is_empty() {
        let bounds = float_array(doc, annot.get(b"Rect").ok()?)?;
        if bounds.len() != 4 {
            return None;
        }
        let points = PointRect::new(bounds[0], bounds[1], bounds[2], bounds[3]);
        rects.push(NormalizedRect::from_points(&points, media)?);
    }

    let rgb = annot
        .get(b"C")
        .ok()
        .and_then(|color| float_array(doc, color))
        .filter(|components| components.len() == 3)
        .unwrap_or_else(|| vec![1.0, 1.0, 0.0]);
    let alpha = annot
        .get(b"CA")
        .ok()
        .and_then(|ca| resolve(doc, ca).as_float().ok())
        .unwrap_or(1.0);
    let color = Argb::from_components(
        unit_to_byte(alpha),
        unit_to_byte(rgb[0]),
        unit_to_byte(rgb[1]),
        unit_to_byte(rgb[2]),
    );
    Some(HighlightMark { rects, color })
}

fn unit_to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}
