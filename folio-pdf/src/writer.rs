use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};
use uuid::Uuid;

use folio_core::{DocumentWriter, ExportRequest, HighlightMark, PointRect};

use crate::objects::{
    annotation_entries, encode_text_string, inherited, is_tagged_highlight, media_box,
    HIGHLIGHT_TAG, INHERITABLE,
};

/// Rewrites a document with a new page order, this crate's highlight
/// annotations and custom Info entries. Descriptive metadata is kept as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfWriter;

impl LopdfWriter {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentWriter for LopdfWriter {
    fn page_count(&self, source: &Path) -> Result<usize> {
        let doc =
            Document::load(source).with_context(|| format!("failed to open {:?}", source))?;
        Ok(doc.get_pages().len())
    }

    #[instrument(
        skip(self, request),
        fields(
            source = %request.source.display(),
            destination = %request.destination.display()
        )
    )]
    fn write(&self, request: &ExportRequest<'_>) -> Result<usize> {
        let mut doc = Document::load(request.source)
            .with_context(|| format!("failed to open {:?}", request.source))?;
        let written = rebuild(&mut doc, request)?;

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)
            .with_context(|| format!("failed to serialize {:?}", request.destination))?;
        write_atomically(request.destination, &buffer)?;
        debug!(pages = written, bytes = buffer.len(), "document written");
        Ok(written)
    }
}

/// Applies the request to `doc` in memory and returns the number of pages.
pub(crate) fn rebuild(doc: &mut Document, request: &ExportRequest<'_>) -> Result<usize> {
    let source_pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let pages_root = pages_root(doc)?;
    for &page_id in &source_pages {
        materialise_inherited(doc, page_id)?;
    }

    let mut copied = vec![false; source_pages.len()];
    let mut kids = Vec::with_capacity(request.page_order.len());
    for &original in request.page_order {
        let source_id = *source_pages.get(original).ok_or_else(|| {
            anyhow!(
                "page {original} is out of range for {} pages",
                source_pages.len()
            )
        })?;
        let page_id = if std::mem::replace(&mut copied[original], true) {
            let duplicate = doc.get_dictionary(source_id)?.clone();
            doc.add_object(Object::Dictionary(duplicate))
        } else {
            source_id
        };
        doc.get_dictionary_mut(page_id)?
            .set("Parent", Object::Reference(pages_root));

        let marks = request
            .highlights
            .get(&original)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        replace_highlights(doc, page_id, marks)?;
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len();
    let root = doc.get_dictionary_mut(pages_root)?;
    root.set("Kids", Object::Array(kids));
    root.set("Count", count as i64);

    set_custom_metadata(doc, request.custom_metadata)?;

    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();
    Ok(count)
}

fn pages_root(doc: &Document) -> Result<ObjectId> {
    let catalog = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .context("document has no catalog")?;
    let pages = doc
        .get_dictionary(catalog)?
        .get(b"Pages")
        .and_then(Object::as_reference)
        .context("catalog has no page tree")?;
    Ok(pages)
}

/// Copies inherited attributes onto the page so it keeps them once it hangs
/// directly off the root.
fn materialise_inherited(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let page = doc.get_dictionary(page_id)?;
    let missing: Vec<(&[u8], Object)> = INHERITABLE
        .iter()
        .filter(|key| !page.has(key))
        .filter_map(|&key| inherited(doc, page_id, key).map(|value| (key, value)))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    let page = doc.get_dictionary_mut(page_id)?;
    for (key, value) in missing {
        page.set(key, value);
    }
    Ok(())
}

/// Drops annotations written by an earlier save and adds one per mark.
fn replace_highlights(
    doc: &mut Document,
    page_id: ObjectId,
    marks: &[HighlightMark],
) -> Result<()> {
    let page = doc.get_dictionary(page_id)?;
    let mut annots: Vec<Object> = annotation_entries(doc, page)
        .into_iter()
        .filter(|entry| !is_tagged_highlight(doc, entry))
        .collect();
    let media = media_box(doc, page_id);

    for mark in marks {
        if let Some(annotation) = highlight_annotation(mark, &media, page_id) {
            let id = doc.add_object(Object::Dictionary(annotation));
            annots.push(Object::Reference(id));
        }
    }

    let page = doc.get_dictionary_mut(page_id)?;
    if annots.is_empty() {
        page.remove(b"Annots");
    } else {
        page.set("Annots", Object::Array(annots));
    }
    Ok(())
}

fn highlight_annotation(
    mark: &HighlightMark,
    media: &PointRect,
    page_id: ObjectId,
) -> Option<Dictionary> {
    let quads: Vec<PointRect> = mark
        .rects
        .iter()
        .map(|rect| rect.clamp().to_points(media))
        .collect();
    let bounds = quads.iter().copied().reduce(|a, b| a.union(&b))?;

    let mut quad_points = Vec::with_capacity(quads.len() * 8);
    for quad in &quads {
        quad_points.extend(
            [
                quad.x0, quad.y1, quad.x1, quad.y1, quad.x0, quad.y0, quad.x1, quad.y0,
            ]
            .map(Object::Real),
        );
    }

    let color = mark.color;
    let channel = |value: u8| Object::Real(f32::from(value) / 255.0);
    let name = format!("{HIGHLIGHT_TAG}{}", Uuid::new_v4());
    Some(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Highlight",
        "Rect" => vec![
            Object::Real(bounds.x0),
            Object::Real(bounds.y0),
            Object::Real(bounds.x1),
            Object::Real(bounds.y1),
        ],
        "QuadPoints" => quad_points,
        "C" => vec![channel(color.red()), channel(color.green()), channel(color.blue())],
        "CA" => Object::Real(f32::from(color.alpha()) / 255.0),
        // Print flag.
        "F" => 4,
        "P" => Object::Reference(page_id),
        "NM" => Object::String(name.into_bytes(), StringFormat::Literal),
    })
}

fn set_custom_metadata(doc: &mut Document, entries: &[(String, String)]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let info_id = match doc.trailer.get(b"Info").and_then(Object::as_reference) {
        Ok(id) => id,
        Err(_) => {
            let inline = doc
                .trailer
                .get(b"Info")
                .and_then(Object::as_dict)
                .cloned()
                .unwrap_or_else(|_| Dictionary::new());
            let id = doc.add_object(Object::Dictionary(inline));
            doc.trailer.set("Info", Object::Reference(id));
            id
        }
    };
    let info = doc.get_dictionary_mut(info_id)?;
    for (key, value) in entries {
        info.set(key.as_bytes().to_vec(), encode_text_string(value));
    }
    Ok(())
}

/// Output appears at `destination` complete or not at all.
fn write_atomically(destination: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create a temporary file in {:?}", dir))?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged
        .persist(destination)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to move output into place at {:?}", destination))?;
    Ok(())
}
