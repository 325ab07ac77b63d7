//! Progressive loading tests
//!
//! Documents opened from disk are read in fixed-size chunks with a bounded
//! cache; results must not depend on the chunk size.


use pdf_anatomy::core::*;
use std::io::Write;
use tempfile::NamedTempFile;
use test_utils::*;

fn write_temp(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

/// A document with an xref stream, an object stream and a Flate content
/// stream, so every reading path crosses chunk boundaries.
fn mixed_document() -> Vec<u8> {
    let content = "BT /F1 24 Tf 72 720 Td (Hello, chunks) Tj ET\n".repeat(20);

    let mut pdf = PdfBuilder::new();
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object_stream(
        5,
        &[
            (2, "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >>"),
            (3, "<< /Type /Page /Parent 2 0 R /Contents 6 0 R >>"),
            (4, "<< /Type /Page /Parent 2 0 R >>"),
        ],
    );
    pdf.stream_object(6, "/Filter /FlateDecode", &zlib(content.as_bytes()));
    let rows = [
        (1, Row::Direct(pdf.offset(1))),
        (2, Row::Contained(5, 0)),
        (3, Row::Contained(5, 1)),
        (4, Row::Contained(5, 2)),
        (5, Row::Direct(pdf.offset(5))),
        (6, Row::Direct(pdf.offset(6))),
    ];
    let xref = pdf.xref_stream(7, &rows, "/Root 1 0 R", true);
    pdf.startxref(xref);
    pdf.build()
}

// ============================================================================
// FileChunkedStream
// ============================================================================

#[test]
fn test_file_chunked_stream_reads_across_chunks() {
    let data = mixed_document();
    let file = write_temp(&data);

    let mut stream = FileChunkedStream::open(file.path(), Some(16), Some(2)).unwrap();
    assert_eq!(stream.path(), file.path());
    assert_eq!(stream.length(), data.len());

    let bytes = stream.get_bytes(100).unwrap();
    assert_eq!(bytes, &data[..100]);
    assert!(stream.chunk_loads() >= 7);

    stream.set_pos(data.len() - 5).unwrap();
    assert_eq!(stream.get_bytes(100).unwrap(), &data[data.len() - 5..]);
}

#[test]
fn test_sub_stream_over_file() {
    let data = mixed_document();
    let file = write_temp(&data);

    let stream = FileChunkedStream::open(file.path(), Some(32), Some(4)).unwrap();
    let mut sub = stream.make_sub_stream(10, 50).unwrap();
    assert_eq!(sub.length(), 50);
    assert_eq!(sub.get_bytes(50).unwrap(), &data[10..60]);
}

// ============================================================================
// Documents from disk
// ============================================================================

#[test]
fn test_results_independent_of_chunk_size() {
    let data = mixed_document();
    let file = write_temp(&data);
    let mut reference = open_bytes(data.clone());
    let expected = reference.read_decoded_text(6).unwrap();

    for (chunk_size, cached) in [(7, 1), (64, 2), (1024, 3), (65536, 10)] {
        let options = OpenOptions::new()
            .chunk_size(chunk_size)
            .max_cached_chunks(cached);
        let mut doc = PDFDocument::open_with(file.path(), options).unwrap();

        assert_eq!(doc.pages(), &[3, 4], "chunk size {}", chunk_size);
        assert_eq!(doc.object_numbers(), reference.object_numbers());
        assert_eq!(doc.read_decoded_text(6).unwrap(), expected);
        assert!(expected.contains("(Hello, chunks) Tj"));
        doc.close();
    }
}

#[test]
fn test_recovery_from_disk() {
    let mut data = simple_document(4).build();
    let tail = data
        .windows(b"startxref".len())
        .rposition(|w| w == b"startxref")
        .unwrap();
    data.truncate(tail);
    let file = write_temp(&data);

    let options = OpenOptions::new().chunk_size(32).max_cached_chunks(2);
    let doc = PDFDocument::open_with(file.path(), options).unwrap();
    assert_eq!(doc.pages(), &[10, 11, 12, 13]);
}

#[test]
fn test_open_default_options() {
    let file = write_temp(&simple_document(2).build());
    let doc = PDFDocument::open(file.path()).unwrap();
    assert_eq!(doc.page_count(), 2);
}
