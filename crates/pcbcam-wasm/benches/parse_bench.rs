//! Criterion benchmarks for Gerber and Excellon parsing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn parse_bench(c: &mut Criterion) {
    let gerber_data = include_bytes!("../tests/fixtures/sample/board-F_Cu.gbr");
    let drill_data = include_bytes!("../tests/fixtures/minimal/drill.drl");

    let mut group = c.benchmark_group("parse");
    group.sample_size(20);

    group.bench_function("gerber_parse", |b| {
        b.iter(|| black_box(pcbcam_wasm::gerber::parse(black_box(gerber_data.as_slice()))))
    });

    group.bench_function("excellon_parse", |b| {
        b.iter(|| black_box(pcbcam_wasm::excellon::parse(black_box(drill_data.as_slice()))))
    });

    group.finish();
}

criterion_group!(benches, parse_bench);
criterion_main!(benches);
