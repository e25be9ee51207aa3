use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::io::{Cursor, Write};
use tempfile::NamedTempFile;
use xlsxstream::{Event, ReaderOptions, SheetEvent, WorkbookReader};

#[path = "../tests/common/mod.rs"]
mod common;

use common::{excel_ordered_parts, metadata_first, numbered_sheet_xml, package};

const SHARED: [&str; 1] = ["<t>Name</t>"];

fn count_rows<R: std::io::Read>(mut reader: WorkbookReader<R>) -> usize {
    let mut rows = 0;
    while let Some(event) = reader.next_event().unwrap() {
        if let Event::Worksheet(sheet) = event {
            for event in sheet.process() {
                if let SheetEvent::Row(row) = event.unwrap() {
                    black_box(&row);
                    rows += 1;
                }
            }
        }
    }
    rows
}

fn benchmark_live_vs_deferred(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    group.sample_size(10); // Reduce samples for large benchmarks

    for size in [1000u32, 10000].iter() {
        let deferred = package(&excel_ordered_parts(
            &[("Data", numbered_sheet_xml(*size))],
            &SHARED,
        ));
        let live = package(&metadata_first(excel_ordered_parts(
            &[("Data", numbered_sheet_xml(*size))],
            &SHARED,
        )));

        group.bench_with_input(BenchmarkId::new("live", size), &live, |b, bytes| {
            b.iter(|| count_rows(WorkbookReader::new(Cursor::new(bytes.as_slice()))));
        });
        group.bench_with_input(BenchmarkId::new("deferred", size), &deferred, |b, bytes| {
            b.iter(|| count_rows(WorkbookReader::new(Cursor::new(bytes.as_slice()))));
        });
    }

    group.finish();
}

fn benchmark_formatting(c: &mut Criterion) {
    let bytes = package(&metadata_first(excel_ordered_parts(
        &[("Data", numbered_sheet_xml(5000))],
        &SHARED,
    )));

    c.bench_function("unformatted_5000_rows", |b| {
        b.iter(|| {
            let options = ReaderOptions::default().with_formatting(false);
            count_rows(WorkbookReader::with_options(
                Cursor::new(bytes.as_slice()),
                options,
            ))
        });
    });
}

fn benchmark_file(c: &mut Criterion) {
    let mut temp = NamedTempFile::new().unwrap();
    temp.write_all(&package(&excel_ordered_parts(
        &[("Data", numbered_sheet_xml(5000))],
        &SHARED,
    )))
    .unwrap();
    temp.flush().unwrap();

    c.bench_function("open_file_5000_rows", |b| {
        b.iter(|| count_rows(WorkbookReader::open(temp.path()).unwrap()));
    });
}

criterion_group!(
    benches,
    benchmark_live_vs_deferred,
    benchmark_formatting,
    benchmark_file
);
criterion_main!(benches);
