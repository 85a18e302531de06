use std::hint::black_box;

use canvas_sync::{Delta, DeltaBuffer, Record};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use serde_json::json;

fn shape(i: usize, v: usize) -> Record {
    Record::shape(format!("shape:{i}"), json!({ "x": v, "y": v * 2, "w": 40, "h": 30 }))
}

/// A drag gesture: one add followed by many updates of the same shape.
fn bench_drag_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("Delta fold");
    group.throughput(Throughput::Elements(120));

    group.bench_function("drag_120_updates", |b| {
        b.iter(|| {
            let mut buffer = DeltaBuffer::new();
            buffer.absorb(Delta::new().with_added(shape(0, 0)));
            for v in 1..120 {
                buffer.absorb(Delta::new().with_updated(shape(0, v)));
            }
            black_box(buffer.take_snapshot())
        })
    });

    group.finish();
}

/// Many distinct shapes touched in one window, a third of them deleted.
fn bench_wide_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("Delta fold");
    group.throughput(Throughput::Elements(1_000));

    let notifications: Vec<Delta> = (0..1_000)
        .map(|i| match i % 3 {
            0 => Delta::new().with_added(shape(i, i)),
            1 => Delta::new().with_updated(shape(i - 1, i)),
            _ => Delta::new().with_removed(shape(i - 2, i)),
        })
        .collect();

    group.bench_function("mixed_1000_notifications", |b| {
        b.iter_batched(
            || notifications.clone(),
            |batch| {
                let mut buffer = DeltaBuffer::new();
                for delta in batch {
                    buffer.absorb(black_box(delta));
                }
                black_box(buffer.take_snapshot())
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_drag_fold, bench_wide_window);
criterion_main!(benches);
