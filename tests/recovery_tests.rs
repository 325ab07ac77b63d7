//! Recovery scan tests.
//!
//! Files whose cross-reference data is missing, truncated or wrong must
//! still open by scanning for object headers.


use pdf_anatomy::core::*;
use std::sync::{Arc, Mutex};
use test_utils::*;

fn without_tail(data: &[u8]) -> Vec<u8> {
    let pos = data
        .windows(b"startxref".len())
        .rposition(|w| w == b"startxref")
        .unwrap();
    data[..pos].to_vec()
}

// ============================================================================
// Broken cross-reference data
// ============================================================================

#[test]
fn test_truncated_startxref() {
    let data = simple_document(2).build();
    let intact = open_bytes(data.clone());
    let recovered = open_bytes(without_tail(&data));

    assert_eq!(recovered.root(), intact.root());
    assert_eq!(recovered.pages(), intact.pages());
    assert_eq!(recovered.object_numbers(), intact.object_numbers());
}

#[test]
fn test_startxref_beyond_end_of_file() {
    let mut data = without_tail(&simple_document(1).build());
    data.extend_from_slice(b"startxref\n999999\n%%EOF\n");

    let doc = open_bytes(data);
    assert_eq!(doc.root(), Some(1));
    assert_eq!(doc.pages(), &[10]);
}

#[test]
fn test_offset_mismatch_triggers_recovery() {
    let mut pdf = PdfBuilder::new();
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] >>")
        .object(3, "<< /Type /Page /Parent 2 0 R >>");

    // Object 1 points at object 2's header
    let table = pdf.len();
    let text = format!(
        "xref\n0 4\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 4 /Root 1 0 R >>\n",
        pdf.offset(2),
        pdf.offset(2),
        pdf.offset(3)
    );
    pdf.raw(text.as_bytes());
    pdf.startxref(table);

    let mut doc = open_bytes(pdf.build());
    assert_eq!(doc.pages(), &[3]);
    assert_eq!(doc.describe(1).unwrap().offset(), Some(pdf.offset(1)));
}

#[test]
fn test_garbage_instead_of_xref() {
    let mut data = without_tail(&simple_document(1).build());
    let garbage = data.len();
    data.extend_from_slice(b"garbage ] >> 17 R\n");
    data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", garbage).as_bytes());

    let doc = open_bytes(data);
    assert_eq!(doc.pages(), &[10]);
}

#[test]
fn test_catalog_adopted_without_trailer() {
    let mut pdf = PdfBuilder::new();
    pdf.object(4, "<< /Type /Pages /Kids [5 0 R] >>")
        .object(5, "<< /Type /Page /Parent 4 0 R >>")
        .object(7, "<< /Type /Catalog /Pages 4 0 R >>");

    let mut doc = open_bytes(pdf.build());
    assert_eq!(doc.root(), Some(7));
    assert_eq!(doc.pages(), &[5]);
    assert_eq!(doc.describe(7).unwrap().label.as_deref(), Some("/Root"));
}

// ============================================================================
// Scan behavior
// ============================================================================

#[test]
fn test_later_definition_wins() {
    let mut pdf = PdfBuilder::new();
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] >>")
        .object(3, "<< /Type /Page /Rotate 0 >>")
        .object(3, "<< /Type /Page /Rotate 180 >>");

    let mut doc = open_bytes(pdf.build());
    assert_eq!(doc.describe(3).unwrap().offset(), Some(pdf.offset(3)));
    assert!(doc.read_decoded_text(3).unwrap().contains("/Rotate 180"));
}

#[test]
fn test_broken_object_does_not_hide_the_rest() {
    let mut pdf = PdfBuilder::new();
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .raw_object(9, b"9 0 obj\n<< /Title (never closed\nendobj\n")
        .object(2, "<< /Type /Pages /Kids [3 0 R] >>")
        .object(3, "<< /Type /Page /Parent 2 0 R >>");

    let mut doc = open_bytes(pdf.build());
    assert_eq!(doc.pages(), &[3]);
    assert!(doc.describe(9).unwrap().error.is_some());
}

#[test]
fn test_deeply_nested_object_does_not_abort() {
    let deep = format!("4 0 obj\n{}\nendobj\n", "[".repeat(200_000));
    let mut pdf = PdfBuilder::new();
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] >>")
        .raw_object(4, deep.as_bytes())
        .object(3, "<< /Type /Page /Parent 2 0 R >>");

    let mut doc = open_bytes(pdf.build());
    assert_eq!(doc.pages(), &[3]);
    let error = doc.describe(4).unwrap().error.unwrap();
    assert!(error.contains("nesting too deep"));
}

#[test]
fn test_subsection_overflow_falls_back_to_scan() {
    let mut pdf = PdfBuilder::new();
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] >>")
        .object(3, "<< /Type /Page /Parent 2 0 R >>");
    let table = pdf.len();
    let text = format!(
        "xref\n4294967295 2\n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 4 /Root 1 0 R >>\n",
        pdf.offset(1),
        pdf.offset(2)
    );
    pdf.raw(text.as_bytes());
    pdf.startxref(table);

    let doc = open_bytes(pdf.build());
    assert_eq!(doc.root(), Some(1));
    assert_eq!(doc.pages(), &[3]);
}

#[test]
fn test_later_trailer_overrides() {
    let mut pdf = PdfBuilder::new();
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [] >>")
        .object(3, "<< /Title (Old) >>")
        .raw(b"trailer\n<< /Root 1 0 R /Info 3 0 R >>\n")
        .object(4, "<< /Title (New) >>")
        .raw(b"trailer\n<< /Info 4 0 R >>\n");

    let doc = open_bytes(pdf.build());
    assert_eq!(doc.root(), Some(1));
    assert_eq!(
        doc.trailer().get("Info"),
        Some(&PDFObject::Ref { num: 4, generation: 0 })
    );
}

#[test]
fn test_objects_in_streams_found_by_scan() {
    let mut pdf = PdfBuilder::new();
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object_stream(
        5,
        &[
            (2, "<< /Type /Pages /Kids [3 0 R] >>"),
            (3, "<< /Type /Page /Parent 2 0 R >>"),
        ],
    );

    let mut doc = open_bytes(pdf.build());
    assert_eq!(doc.pages(), &[3]);
    assert_eq!(doc.describe(2).unwrap().container(), Some((5, 0)));
}

// ============================================================================
// Progress reporting
// ============================================================================

fn collecting_options() -> (OpenOptions, Arc<Mutex<Vec<u8>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = OpenOptions::new().progress(move |percent| sink.lock().unwrap().push(percent));
    (options, seen)
}

#[test]
fn test_progress_during_recovery() {
    let (options, seen) = collecting_options();
    let data = without_tail(&simple_document(5).build());
    PDFDocument::from_bytes(data, options).unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert_eq!(seen.last(), Some(&100));
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_no_progress_without_recovery() {
    let (options, seen) = collecting_options();
    PDFDocument::from_bytes(simple_document(1).build(), options).unwrap();
    assert!(seen.lock().unwrap().is_empty());
}
