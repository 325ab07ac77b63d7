/// Benchmarks for document opening and object inspection
///
/// Run with: cargo bench
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use pdf_anatomy::{OpenOptions, PDFDocument};

#[path = "../tests/test_utils.rs"]
mod test_utils;

use test_utils::simple_document;

const PAGE_COUNTS: [u32; 3] = [10, 100, 1000];

/// Benchmark opening through the cross-reference table
fn benchmark_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_opening");

    for pages in PAGE_COUNTS {
        let data = simple_document(pages).build();
        group.throughput(Throughput::Bytes(data.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(pages), &data, |b, data| {
            b.iter(|| PDFDocument::from_bytes(black_box(data.clone()), OpenOptions::default()));
        });
    }

    group.finish();
}

/// Benchmark opening by scanning the whole file
fn benchmark_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("recovery_scan");

    for pages in PAGE_COUNTS {
        let mut data = simple_document(pages).build();
        if let Some(tail) = data.windows(9).rposition(|w| w == b"startxref") {
            data.truncate(tail);
        }
        group.throughput(Throughput::Bytes(data.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(pages), &data, |b, data| {
            b.iter(|| PDFDocument::from_bytes(black_box(data.clone()), OpenOptions::default()));
        });
    }

    group.finish();
}

/// Benchmark describing and rendering every object
fn benchmark_object_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_walk");

    for pages in PAGE_COUNTS {
        let data = simple_document(pages).build();

        group.bench_with_input(BenchmarkId::from_parameter(pages), &data, |b, data| {
            b.iter(|| {
                let Ok(mut doc) = PDFDocument::from_bytes(data.clone(), OpenOptions::default())
                else {
                    return;
                };
                for num in doc.object_numbers() {
                    let _ = black_box(doc.describe(num));
                    let _ = black_box(doc.read_decoded_text(num));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_open, benchmark_recovery, benchmark_object_walk);
criterion_main!(benches);
