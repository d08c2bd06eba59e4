//! In-memory PDFs for tests.

use std::path::{Path, PathBuf};

use lopdf::{dictionary, Document, Object, ObjectId, Stream};

/// Three pages under a two-level page tree:
///
/// * page 0 inherits a 612x792 media box and resources from the root
/// * pages 1 and 2 sit under an intermediate node that supplies their
///   resources and carry their own 100x1000 and 200x1000 media boxes
pub(crate) fn sample_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let font = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => Object::Reference(font) },
    });

    let root_id = doc.new_object_id();
    let middle_id = doc.new_object_id();

    let page = |doc: &mut Document, parent: ObjectId, label: &str, media: Option<i64>| {
        let content = format!("BT /F1 12 Tf 20 20 Td ({label}) Tj ET");
        let contents = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let mut dict = dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(parent),
            "Contents" => Object::Reference(contents),
        };
        if let Some(width) = media {
            dict.set("MediaBox", vec![0.into(), 0.into(), width.into(), 1000.into()]);
        }
        doc.add_object(dict)
    };
    let first = page(&mut doc, root_id, "one", None);
    let second = page(&mut doc, middle_id, "two", Some(100));
    let third = page(&mut doc, middle_id, "three", Some(200));

    doc.objects.insert(
        middle_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Parent" => Object::Reference(root_id),
            "Kids" => vec![Object::Reference(second), Object::Reference(third)],
            "Count" => 2,
            "Resources" => Object::Reference(resources),
        }),
    );
    doc.objects.insert(
        root_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(first), Object::Reference(middle_id)],
            "Count" => 3,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => Object::Reference(resources),
        }),
    );

    let catalog = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(root_id),
    });
    let info = doc.add_object(dictionary! {
        "Title" => Object::string_literal("Sample"),
        "Author" => Object::string_literal("Folio Tests"),
        "Keywords" => Object::string_literal("alpha, beta"),
    });
    doc.trailer.set("Root", Object::Reference(catalog));
    doc.trailer.set("Info", Object::Reference(info));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("sample document serializes");
    buffer
}

pub(crate) fn write_sample(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("sample written");
    path
}
