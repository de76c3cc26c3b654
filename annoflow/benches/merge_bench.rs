//! Benchmarks for the annotation sort-merge join.

use annoflow::merge::{join_sorted, AnnotationRecord, AnnotationTable};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn records(prefix: &str, count: u64) -> Vec<AnnotationRecord> {
    (0..count)
        .map(|i| {
            AnnotationRecord::new(
                i % 5 + 1,
                vec![
                    format!("{prefix}{:08}", i / 5),
                    (i % 5 + 1).to_string(),
                    "subject".to_string(),
                    "1e-30".to_string(),
                ],
            )
        })
        .collect()
}

fn header() -> Vec<String> {
    ["sequence_id", "hit_rank", "subject", "evalue"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn join_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("join_sorted");
    for size in [1_000_u64, 10_000, 100_000] {
        let left = AnnotationTable::new(header(), records("a", size));
        let right = AnnotationTable::new(header(), records("b", size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                black_box(join_sorted(
                    left.records().to_vec(),
                    right.records().to_vec(),
                ))
            });
        });
    }
    group.finish();
}

fn sort_benchmark(c: &mut Criterion) {
    let mut unsorted = records("s", 50_000);
    unsorted.reverse();
    c.bench_function("table_sort_50k", |b| {
        b.iter(|| black_box(AnnotationTable::new(header(), unsorted.clone())));
    });
}

criterion_group!(benches, join_benchmark, sort_benchmark);
criterion_main!(benches);
