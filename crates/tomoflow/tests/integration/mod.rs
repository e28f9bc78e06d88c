//! Integration tests for the chunk conveyor.
//!
//! Every run uses the host backend, the mock kernel and the in-memory
//! source/sink from `tomoflow::testing`. Projection samples carry the index
//! of their detector row, so a written slice shows exactly which row it was
//! reconstructed from.
//!
//! Run with: cargo test -p tomoflow --test integration

mod cancellation;
mod end_to_end;
mod failures;
mod ordering;
mod try_center;

use std::sync::Arc;
use std::time::Duration;

use tomoflow::testing::{mock_stage, InMemorySource, MemorySink, MockStage};
use tomoflow::{PipelineScheduler, ReconConfig, RunReport, SampleType, SourceReader};
use tomoflow_core::ReconConfigBuilder;
use tomoflow_device::HostBackend;

pub type HostScheduler = PipelineScheduler<HostBackend, MockStage, MemorySink>;

/// Route `tracing` output to the test harness. `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Small geometry: 3 projections of 4 columns, 3x3 slices, u16 samples.
pub fn builder() -> ReconConfigBuilder {
    ReconConfig::builder()
        .projections(3, 1, 1)
        .geometry(4, 3)
        .sample_type(SampleType::U16)
        .threads(2, 2)
        .queue_capacity(4)
}

/// Config with the given chunk layout.
pub fn config(chunk_rows: usize, valid_rows: Vec<usize>) -> Arc<ReconConfig> {
    Arc::new(builder().chunks(chunk_rows, valid_rows).build().unwrap())
}

/// Backend that sleeps up to 200µs before every stream operation.
pub fn jittery_backend() -> HostBackend {
    HostBackend::with_jitter(Duration::from_micros(200))
}

/// Scheduler over `backend` writing into `sink`.
pub fn scheduler(
    backend: HostBackend,
    config: &Arc<ReconConfig>,
    sink: &Arc<MemorySink>,
) -> HostScheduler {
    let stage = mock_stage(&backend, config).unwrap();
    PipelineScheduler::new(backend, Arc::clone(config), stage, Arc::clone(sink)).unwrap()
}

/// Reader over a tagged in-memory source.
pub fn tagged_reader(config: &Arc<ReconConfig>) -> SourceReader<InMemorySource> {
    SourceReader::new(
        Arc::new(InMemorySource::for_config(config)),
        Arc::clone(config),
    )
}

/// Run a full reconstruction of `config` and return the report and sink.
pub fn run_tagged(
    backend: HostBackend,
    config: &Arc<ReconConfig>,
) -> (RunReport, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::for_config(config));
    let report = scheduler(backend, config, &sink)
        .run(&tagged_reader(config))
        .unwrap();
    (report, sink)
}

/// Assert that every output row holds the tag of its source row and nothing
/// else was written.
pub fn assert_volume(config: &ReconConfig, sink: &MemorySink) {
    let offset = config.row_offset();
    let expected: Vec<usize> = (offset..offset + config.total_rows()).collect();
    assert_eq!(sink.written_rows(), expected);
    for row in expected {
        let values = sink.row_values(row).unwrap();
        assert_eq!(values.len(), config.recon_size * config.recon_size);
        assert!(
            values.iter().all(|&v| v == InMemorySource::tag(row)),
            "row {} holds {:?}",
            row,
            values
        );
    }
    assert_eq!(sink.overwrites(), 0);
}
