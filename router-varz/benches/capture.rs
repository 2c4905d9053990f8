use std::{hint::black_box, sync::Arc, time::Duration};

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use quanta::Clock;
use router_varz::{
    ExpDecaySample, HttpMetric, MetricSettings, StaticRegistry, TopAppsEntry, VarzBuilder,
    DEFAULT_DECAY_ALPHA, DEFAULT_RESERVOIR_SIZE,
};

fn capture_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture");

    group.bench_function("metric request", |b| {
        let metric = HttpMetric::new(&MetricSettings::default());
        b.iter(|| metric.capture_request())
    });
    group.bench_function("metric response", |b| {
        let metric = HttpMetric::new(&MetricSettings::default());
        b.iter(|| metric.capture_response(black_box(Some(200)), Duration::from_micros(250)))
    });
    group.bench_function("varz backend request (untagged)", |b| {
        let varz = VarzBuilder::new().build(StaticRegistry::new()).expect("valid settings");
        let backend: [(&str, &str); 0] = [];
        b.iter(|| varz.capture_backend_request(black_box(&backend)))
    });
    group.bench_function("varz backend request (tagged)", |b| {
        let varz = VarzBuilder::new().build(StaticRegistry::new()).expect("valid settings");
        let backend = [("component", "dea"), ("framework", "rails"), ("runtime", "ruby19")];
        b.iter(|| varz.capture_backend_request(black_box(&backend)))
    });
    group.bench_function("varz backend response (tagged)", |b| {
        let varz = VarzBuilder::new().build(StaticRegistry::new()).expect("valid settings");
        let backend = [("component", "dea"), ("framework", "rails"), ("runtime", "ruby19")];
        b.iter(|| {
            varz.capture_backend_response(black_box(&backend), Some(200), Duration::from_millis(3))
        })
    });

    group.finish();
}

fn reservoir_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("reservoir");

    group.bench_function("update (filling)", |b| {
        b.iter_batched_ref(
            || {
                ExpDecaySample::new(
                    DEFAULT_RESERVOIR_SIZE.try_into().expect("non-zero reservoir size"),
                    DEFAULT_DECAY_ALPHA,
                    Clock::new(),
                )
            },
            |sample| {
                for i in 0..DEFAULT_RESERVOIR_SIZE as u64 {
                    sample.update(i);
                }
            },
            BatchSize::SmallInput,
        )
    });
    group.bench_function("update (full)", |b| {
        let sample = ExpDecaySample::new(
            DEFAULT_RESERVOIR_SIZE.try_into().expect("non-zero reservoir size"),
            DEFAULT_DECAY_ALPHA,
            Clock::new(),
        );
        for i in 0..DEFAULT_RESERVOIR_SIZE as u64 * 4 {
            sample.update(i);
        }
        b.iter(|| sample.update(black_box(42_000)))
    });
    group.bench_function("snapshot", |b| {
        let sample = ExpDecaySample::new(
            DEFAULT_RESERVOIR_SIZE.try_into().expect("non-zero reservoir size"),
            DEFAULT_DECAY_ALPHA,
            Clock::new(),
        );
        for i in 0..DEFAULT_RESERVOIR_SIZE as u64 {
            sample.update(i);
        }
        b.iter(|| sample.snapshot().quantile(0.99))
    });

    group.finish();
}

fn render_benchmark(c: &mut Criterion) {
    c.bench_function("render", |b| {
        let registry = Arc::new(StaticRegistry::new());
        registry.set_top_apps((0..10).map(|i| TopAppsEntry::new(format!("app-{i}"), i)).collect());

        let varz = VarzBuilder::new().build(Arc::clone(&registry)).expect("valid settings");
        for component in ["cloud_controller", "uaa", "dea", "router", "health_manager"] {
            let backend = [("component", component), ("runtime", "ruby19")];
            for _ in 0..DEFAULT_RESERVOIR_SIZE {
                varz.capture_backend_request(&backend);
                varz.capture_backend_response(&backend, Some(200), Duration::from_millis(2));
            }
        }

        b.iter(|| varz.render().expect("varz document serializes"))
    });
}

criterion_group!(benches, capture_benchmark, reservoir_benchmark, render_benchmark);
criterion_main!(benches);
