//! Fail-fast behaviour and error attribution.

use std::sync::Arc;

use tomoflow::testing::{mock_stage_with, InMemorySource, MemorySink, MockKernel, VecReader};
use tomoflow::{ChunkItem, PipelineScheduler, ReconConfig, SourceReader, Stage};
use tomoflow_core::split_rows;
use tomoflow_device::HostBackend;

use super::{config, init_tracing, jittery_backend, scheduler, tagged_reader};

fn item(config: &ReconConfig, id: usize, valid_rows: usize) -> ChunkItem {
    let row = config.input_row_bytes();
    ChunkItem {
        id,
        valid_rows,
        data: vec![1; config.n_proj * valid_rows * row],
        dark: vec![0; config.n_dark * valid_rows * row],
        flat: vec![1; config.n_flat * valid_rows * row],
    }
}

#[test]
fn test_writer_failure_names_chunk() {
    init_tracing();
    let config = config(4, split_rows(24, 4));
    let sink = Arc::new(MemorySink::for_config(&config).failing_on_chunk(2));
    let err = scheduler(jittery_backend(), &config, &sink)
        .run(&tagged_reader(&config))
        .unwrap_err();

    assert_eq!(err.stage(), Some((Stage::Egest, 2)));
    assert_eq!(err.category(), "io_error");
    assert!(sink.writes().iter().all(|w| w.chunk_id != 2));
}

#[test]
fn test_reader_failure_names_chunk() {
    let config = config(4, split_rows(16, 4));
    let sink = Arc::new(MemorySink::for_config(&config));
    let source = InMemorySource::for_config(&config).failing_at_row(5);
    let reader = SourceReader::new(Arc::new(source), Arc::clone(&config));

    let err = scheduler(jittery_backend(), &config, &sink)
        .run(&reader)
        .unwrap_err();

    assert_eq!(err.stage(), Some((Stage::Ingest, 1)));
    assert_eq!(err.category(), "io_error");
    // Chunk 0 may or may not have been written, nothing after it.
    assert!(sink.writes().iter().all(|w| w.chunk_id == 0));
}

#[test]
fn test_kernel_failure_names_chunk() {
    let config = config(4, split_rows(16, 4));
    let backend = jittery_backend();
    let stage = mock_stage_with(&backend, &config, MockKernel::failing_on_call(1)).unwrap();
    let sink = Arc::new(MemorySink::for_config(&config));

    let err = PipelineScheduler::new(backend, Arc::clone(&config), stage, Arc::clone(&sink))
        .unwrap()
        .run(&tagged_reader(&config))
        .unwrap_err();

    assert_eq!(err.stage(), Some((Stage::Compute, 1)));
    assert_eq!(err.category(), "device_error");
    assert!(sink.writes().iter().all(|w| w.chunk_id == 0));
}

#[test]
fn test_wrong_valid_rows_rejected() {
    let config = config(4, vec![4, 2]);
    let sink = Arc::new(MemorySink::for_config(&config));
    let reader = VecReader::new(vec![item(&config, 0, 4), item(&config, 1, 4)]);

    let err = scheduler(HostBackend::new(), &config, &sink)
        .run(&reader)
        .unwrap_err();

    assert_eq!(err.stage(), Some((Stage::Ingest, 1)));
    assert_eq!(err.category(), "invalid_chunk");
}

#[test]
fn test_duplicate_and_out_of_range_ids_rejected() {
    let config = config(4, vec![4, 4]);

    let reader = VecReader::new(vec![item(&config, 0, 4), item(&config, 0, 4)]);
    let sink = Arc::new(MemorySink::for_config(&config));
    let err = scheduler(HostBackend::new(), &config, &sink)
        .run(&reader)
        .unwrap_err();
    assert_eq!(err.category(), "invalid_chunk");
    assert!(err.to_string().contains("twice"));

    let reader = VecReader::new(vec![item(&config, 7, 4)]);
    let err = scheduler(HostBackend::new(), &config, &sink)
        .run(&reader)
        .unwrap_err();
    assert_eq!(err.stage(), Some((Stage::Ingest, 0)));
    assert_eq!(err.category(), "invalid_chunk");
}

#[test]
fn test_payload_size_checked() {
    let config = config(4, vec![4]);
    let mut bad = item(&config, 0, 4);
    bad.dark.pop();
    let sink = Arc::new(MemorySink::for_config(&config));

    let err = scheduler(HostBackend::new(), &config, &sink)
        .run(&VecReader::new(vec![bad]))
        .unwrap_err();
    assert!(err.to_string().contains("dark payload"));
}

#[test]
fn test_reader_stopping_early() {
    let config = config(4, vec![4, 4, 4]);
    let sink = Arc::new(MemorySink::for_config(&config));

    let reader = VecReader::new(vec![item(&config, 0, 4)]);
    let err = scheduler(HostBackend::new(), &config, &sink)
        .run(&reader)
        .unwrap_err();
    assert_eq!(err.stage(), Some((Stage::Ingest, 1)));
    assert_eq!(err.category(), "invalid_chunk");

    let reader = VecReader::new(vec![item(&config, 0, 4)]).then_fail("disk unplugged");
    let err = scheduler(HostBackend::new(), &config, &sink)
        .run(&reader)
        .unwrap_err();
    assert_eq!(err.stage(), Some((Stage::Ingest, 1)));
    assert!(err.to_string().contains("disk unplugged"));
}

#[test]
fn test_extra_items_are_ignored() {
    let config = config(4, vec![4]);
    let sink = Arc::new(MemorySink::for_config(&config));
    let reader = VecReader::new(vec![item(&config, 0, 4), item(&config, 1, 4)]);

    let report = scheduler(HostBackend::new(), &config, &sink)
        .run(&reader)
        .unwrap();
    assert_eq!(report.chunks, 1);
}
