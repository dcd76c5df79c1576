#![allow(missing_docs)]

use cereal::{CerealWriter, Cerealizable, ExternalSorter, SortConfig};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::io::Cursor;

#[derive(Cerealizable, Clone, Debug)]
struct Event {
    timestamp: i64,
    source: String,
    value: Option<f64>,
}

fn generate_input(count: usize) -> Vec<u8> {
    let mut rng = fastrand::Rng::with_seed(1);
    let mut writer = CerealWriter::new(Vec::new());
    for i in 0..count {
        let event = Event {
            timestamp: rng.i64(..),
            source: format!("sensor-{}", i % 64),
            value: rng.bool().then(|| rng.f64()),
        };
        writer.write(&event).expect("Failed to frame event");
    }
    writer.into_inner()
}

fn bench_sort(c: &mut Criterion) {
    let input = generate_input(100_000);
    let workspace = tempfile::TempDir::new().expect("Failed to create workspace");

    let mut group = c.benchmark_group("External Sort");
    group.sample_size(10);

    for block_size in [256 * 1024u64, 64 * 1024 * 1024] {
        group.bench_function(format!("block_{}k", block_size / 1024), |b| {
            b.iter_batched(
                || Cursor::new(input.clone()),
                |source| {
                    let mut sorter =
                        ExternalSorter::new(|x: &Event, y: &Event| x.timestamp.cmp(&y.timestamp))
                            .with_config(
                                SortConfig::default()
                                    .with_block_size(block_size)
                                    .with_workspace(workspace.path()),
                            );
                    let mut output = Vec::with_capacity(input.len());
                    let stats = sorter.sort(source, &mut output).expect("Sort failed");
                    black_box((stats, output));
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sort);
criterion_main!(benches);
