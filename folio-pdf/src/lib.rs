//! PDF collaborators for the folio engine.
//!
//! [`LopdfReader`] and [`LopdfWriter`] work on the object graph directly and
//! cover geometry, metadata, annotations and page order. Text extraction
//! needs Pdfium and is only built with the `pdfium` feature.

mod objects;
#[cfg(feature = "pdfium")]
mod pdfium;
mod reader;
#[cfg(test)]
mod testing;
mod writer;

pub use objects::{decode_text_string, encode_text_string, HIGHLIGHT_TAG};
#[cfg(feature = "pdfium")]
pub use pdfium::PdfiumReader;
pub use reader::LopdfReader;
pub use writer::LopdfWriter;
