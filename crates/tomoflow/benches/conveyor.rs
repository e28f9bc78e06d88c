//! Conveyor Benchmarks
//!
//! Benchmarks cover:
//! - Full host runs across chunk capacities
//! - Write pool width under a slow writer
//! - Try-center sweeps

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tomoflow::testing::{mock_stage, InMemorySource, MemorySink};
use tomoflow::{PipelineScheduler, ReconConfig, SampleType, SourceReader, TryCenterPlan};
use tomoflow_device::HostBackend;

fn config(rows: usize, chunk_rows: usize, write_threads: usize) -> Arc<ReconConfig> {
    Arc::new(
        ReconConfig::builder()
            .projections(64, 4, 4)
            .geometry(64, 32)
            .rows(rows, chunk_rows)
            .sample_type(SampleType::U16)
            .threads(2, write_threads)
            .queue_capacity(4)
            .build()
            .expect("bench config"),
    )
}

fn run(config: &Arc<ReconConfig>, sink: Arc<MemorySink>) {
    let backend = HostBackend::new();
    let stage = mock_stage(&backend, config).expect("mock stage");
    let reader = SourceReader::new(
        Arc::new(InMemorySource::for_config(config)),
        Arc::clone(config),
    );
    PipelineScheduler::new(backend, Arc::clone(config), stage, sink)
        .expect("scheduler")
        .run(&reader)
        .expect("run");
}

fn bench_chunk_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_capacity");
    group.sample_size(20);

    for chunk_rows in [2, 8, 32] {
        let config = config(128, chunk_rows, 2);
        group.throughput(Throughput::Elements(config.total_rows() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk_rows), &config, |b, config| {
            b.iter(|| run(config, Arc::new(MemorySink::for_config(config))))
        });
    }
    group.finish();
}

fn bench_write_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_pool");
    group.sample_size(10);

    for writers in [1, 2, 4] {
        let config = config(64, 8, writers);
        group.bench_with_input(BenchmarkId::from_parameter(writers), &config, |b, config| {
            b.iter(|| {
                let sink = MemorySink::for_config(config).with_delay(Duration::from_millis(1));
                run(config, Arc::new(sink))
            })
        });
    }
    group.finish();
}

fn bench_try_center(c: &mut Criterion) {
    let mut group = c.benchmark_group("try_center");
    group.sample_size(10);

    let config = config(64, 8, 2);
    let candidates = 40;
    let plan = TryCenterPlan::new(
        vec![10, 30],
        (0..candidates).map(|i| i as f32 * 0.5 - 10.0).collect(),
        (0..candidates).map(|i| 22.0 + i as f32 * 0.5).collect(),
    )
    .expect("plan");

    group.throughput(Throughput::Elements((plan.slice_ids.len() * candidates) as u64));
    group.bench_function("sweep", |b| {
        b.iter(|| {
            let backend = HostBackend::new();
            let stage = mock_stage(&backend, &config).expect("mock stage");
            let reader = SourceReader::new(
                Arc::new(InMemorySource::for_config(&config)),
                Arc::clone(&config),
            );
            let sink = Arc::new(MemorySink::for_config(&config));
            PipelineScheduler::new(backend, Arc::clone(&config), stage, sink)
                .expect("scheduler")
                .run_try_center(&reader, &plan)
                .expect("try-center")
        })
    });
    group.finish();
}

criterion_group!(benches, bench_chunk_capacity, bench_write_pool, bench_try_center);
criterion_main!(benches);
