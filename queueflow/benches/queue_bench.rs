//! Benchmarks for queue throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use queueflow::queue::{BoundedQueue, PartitionedQueue, Queue};
use std::time::Duration;

const BATCH: u64 = 1_000;
const TIMEOUT: Duration = Duration::from_millis(100);

fn bounded_benchmark(c: &mut Criterion) {
    let queue = BoundedQueue::new(0);
    c.bench_function("bounded_put_get", |b| {
        b.iter(|| {
            for i in 0..BATCH {
                let _ = queue.put(black_box(i), TIMEOUT);
            }
            for _ in 0..BATCH {
                let _ = black_box(queue.get(TIMEOUT));
            }
        });
    });
}

fn partitioned_benchmark(c: &mut Criterion) {
    let queue = PartitionedQueue::new(
        0,
        |v: &u64| v % 16,
        |values: Vec<u64>| values.into_iter().sum(),
    );
    c.bench_function("partitioned_put_get", |b| {
        b.iter(|| {
            for i in 0..BATCH {
                let _ = queue.put(black_box(i), TIMEOUT);
            }
            while let Ok(value) = queue.get(TIMEOUT) {
                black_box(value);
            }
        });
    });
}

criterion_group!(benches, bounded_benchmark, partitioned_benchmark);
criterion_main!(benches);
