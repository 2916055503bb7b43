//! Benchmarks for the COPY row codec.

use carto_sync::codec::{RowBatch, WireFormat, decode_rows, estimate_size};
use carto_sync::geometry::Coord;
use carto_sync::schema::from_local;
use carto_sync::{ColumnInfo, DataFrame, Geometry, Series};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

const ROWS: usize = 10_000;

fn sample_frame() -> DataFrame {
    DataFrame::new(vec![
        Series::from_i64("id", (0..ROWS as i64).map(Some)),
        Series::from_text(
            "name",
            (0..ROWS).map(|i| if i % 10 == 0 { None } else { Some(format!("place|{}", i)) }),
        ),
        Series::from_f64("score", (0..ROWS).map(|i| Some(i as f64 * 0.25))),
        Series::from_geometry(
            "geom",
            (0..ROWS).map(|i| Some(Geometry::Point(Coord::new(i as f64 / 100.0, -3.7)))),
        ),
    ])
    .expect("valid frame")
}

/// Benchmark encoding a whole frame into COPY rows.
fn bench_encode(c: &mut Criterion) {
    let frame = Arc::new(sample_frame());
    let columns: Arc<[ColumnInfo]> = from_local(&frame).into();

    c.bench_function("encode_10k_rows", |b| {
        b.iter(|| {
            let batch = RowBatch::new(frame.clone(), columns.clone()).expect("batch");
            let bytes: usize = batch.map(|row| row.expect("row").len()).sum();
            black_box(bytes)
        })
    });

    c.bench_function("estimate_size_1k_sample", |b| {
        b.iter(|| black_box(estimate_size(&frame, &columns, 1000).expect("estimate")))
    });
}

/// Benchmark decoding a COPY TO response.
fn bench_decode(c: &mut Criterion) {
    let frame = sample_frame();
    let columns = from_local(&frame);
    let header: Vec<&str> = columns.iter().map(|c| c.local_name.as_str()).collect();
    let mut csv = header.join(",");
    csv.push('\n');
    for i in 0..ROWS {
        csv.push_str(&format!(
            "{},place {},{},SRID=4326;POINT({} -3.7)\n",
            i,
            i,
            i as f64 * 0.25,
            i as f64 / 100.0
        ));
    }

    c.bench_function("decode_10k_rows", |b| {
        b.iter(|| {
            black_box(decode_rows(csv.as_bytes(), &columns, WireFormat::CopyTo).expect("decode"))
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
