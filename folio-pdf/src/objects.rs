//! Small helpers over the lopdf object model shared by the reader and writer.

use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use tracing::warn;

use folio_core::PointRect;

/// Page attributes a page may inherit from its ancestors in the page tree.
pub(crate) const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// `/NM` prefix marking the highlight annotations this crate owns.
pub const HIGHLIGHT_TAG: &str = "folio-highlight-";

const MAX_TREE_DEPTH: usize = 64;

/// US Letter, used when a page has no usable media box.
const FALLBACK_MEDIA_BOX: PointRect = PointRect {
    x0: 0.0,
    y0: 0.0,
    x1: 612.0,
    y1: 792.0,
};

pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

pub(crate) fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, object).as_dict().ok()
}

/// Looks `key` up on the page, then on each ancestor.
pub(crate) fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    warn!(?page_id, "page tree deeper than {MAX_TREE_DEPTH} levels");
    None
}

pub(crate) fn float_array(doc: &Document, object: &Object) -> Option<Vec<f32>> {
    resolve(doc, object)
        .as_array()
        .ok()?
        .iter()
        .map(|item| resolve(doc, item).as_float().ok())
        .collect()
}

pub(crate) fn media_box(doc: &Document, page_id: ObjectId) -> PointRect {
    let parsed = inherited(doc, page_id, b"MediaBox")
        .and_then(|object| float_array(doc, &object))
        .filter(|values| values.len() == 4)
        .map(|v| PointRect::new(v[0], v[1], v[2], v[3]))
        .filter(|rect| rect.width() > 0.0 && rect.height() > 0.0);
    match parsed {
        Some(rect) => rect,
        None => {
            warn!(?page_id, "page has no usable MediaBox, assuming US Letter");
            FALLBACK_MEDIA_BOX
        }
    }
}

/// The page's `/Annots` entries, whether stored inline or behind a reference.
pub(crate) fn annotation_entries(doc: &Document, page: &Dictionary) -> Vec<Object> {
    page.get(b"Annots")
        .ok()
        .and_then(|annots| resolve(doc, annots).as_array().ok())
        .cloned()
        .unwrap_or_default()
}

pub(crate) fn is_tagged_highlight(doc: &Document, entry: &Object) -> bool {
    resolve_dict(doc, entry)
        .and_then(|annot| annot.get(b"NM").ok())
        .and_then(|name| name.as_str().ok())
        .is_some_and(|name| name.starts_with(HIGHLIGHT_TAG.as_bytes()))
}

/// Encodes a PDF text string: a plain literal for ASCII, UTF-16BE with a
/// byte order mark otherwise.
pub fn encode_text_string(value: &str) -> Object {
    if value.is_ascii() {
        return Object::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    // PDFDocEncoding agrees with Latin-1 for everything readers put in Info.
    bytes.iter().map(|&byte| char::from(byte)).collect()
}

pub(crate) fn text_entry(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    let value = resolve(doc, dict.get(key).ok()?);
    value.as_str().ok().map(decode_text_string)
}

pub(crate) fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    resolve_dict(doc, doc.trailer.get(b"Info").ok()?)
}
