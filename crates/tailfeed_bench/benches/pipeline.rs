//! Tail pipeline benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tailfeed_bench::{generate_batches, generate_tail};
use tailfeed_engine::{BatchCoalescer, BoundedRowQueue, CursorReader, MockCursorSource, StateReconciler, TailConfig};

/// Benchmark grouping rows into batches.
fn bench_coalesce(c: &mut Criterion) {
    let mut group = c.benchmark_group("coalesce");

    for antennas in [10, 100, 1000].iter() {
        let rows = generate_tail(*antennas, 10);
        group.throughput(Throughput::Elements(rows.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(antennas), &rows, |b, rows| {
            b.iter(|| {
                let mut coalescer = BatchCoalescer::new();
                let mut emitted = 0;
                for row in rows.iter().cloned() {
                    if coalescer.push(row).is_some() {
                        emitted += 1;
                    }
                }
                black_box(emitted);
            });
        });
    }
    group.finish();
}

/// Benchmark applying batches to the reconciled state.
fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");
    let config = TailConfig::default();

    for antennas in [10, 100, 1000].iter() {
        let batches = generate_batches(*antennas, 10);
        group.throughput(Throughput::Elements(batches.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(antennas), &batches, |b, batches| {
            b.iter(|| {
                let mut reconciler = StateReconciler::new(&config);
                for batch in batches {
                    black_box(reconciler.apply(batch));
                }
            });
        });
    }
    group.finish();
}

/// Benchmark pulling rows from a cursor into a bounded queue.
fn bench_reader(c: &mut Criterion) {
    let mut group = c.benchmark_group("reader");
    let config = TailConfig::default();

    for antennas in [100, 1000].iter() {
        let rows = generate_tail(*antennas, 10);
        group.throughput(Throughput::Elements(rows.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(antennas), &rows, |b, rows| {
            b.iter(|| {
                let source = MockCursorSource::new();
                source.push_rows(rows.clone()).end_when_drained();
                let mut reader = CursorReader::open(source, &config).unwrap();
                let mut queue = BoundedRowQueue::new(config.queue_capacity);
                let mut total = 0;
                while !reader.is_exhausted() {
                    total += reader.pull(config.queue_capacity, &mut queue).unwrap();
                    while queue.pop().is_some() {}
                }
                black_box(total);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_coalesce, bench_reconcile, bench_reader);
criterion_main!(benches);
