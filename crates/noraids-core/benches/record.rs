use std::hint::black_box;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use noraids_core::{DetectorConfig, TrackerRegistry};

fn bench_record_single_key(c: &mut Criterion) {
    let config = DetectorConfig::new(30, Duration::from_secs(3600)).unwrap();
    c.bench_function("record_single_key_slow_stream", |b| {
        let mut registry = TrackerRegistry::new(config);
        // 30 joins 130s apart span more than an hour, so the window never saturates
        let mut now = 1_771_632_000_000u64;
        b.iter(|| {
            now += 130_000;
            black_box(registry.record(black_box("rustaceans"), now));
        });
    });
}

fn bench_record_many_keys(c: &mut Criterion) {
    let config = DetectorConfig::default();
    let keys: Vec<String> = (0..1000).map(|i| format!("group{i}")).collect();
    c.bench_function("record_1000_keys_round_robin", |b| {
        let mut registry = TrackerRegistry::new(config);
        let mut now = 1_771_632_000_000u64;
        let mut i = 0usize;
        b.iter(|| {
            now += 5_000;
            i = (i + 1) % keys.len();
            black_box(registry.record(&keys[i], now));
        });
    });
}

criterion_group!(benches, bench_record_single_key, bench_record_many_keys);
criterion_main!(benches);
