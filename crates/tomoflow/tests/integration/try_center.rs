//! Try-center runs over the host backend.

use std::sync::Arc;

use tomoflow::testing::{MemorySink, VecReader};
use tomoflow::{ChunkItem, ReconConfig, Stage, TryCenterPlan};
use tomoflow_device::layout::read_element;
use tomoflow_device::HostBackend;

use super::{builder, init_tracing, scheduler, tagged_reader};

fn try_config() -> Arc<ReconConfig> {
    Arc::new(builder().rows(8, 4).threads(1, 2).build().unwrap())
}

fn plan() -> TryCenterPlan {
    TryCenterPlan::new(
        vec![2, 5],
        (0..6).map(|i| i as f32).collect(),
        (10..16).map(|c| c as f32).collect(),
    )
    .unwrap()
}

#[test]
fn test_one_artifact_per_slice_and_center() {
    init_tracing();
    let config = try_config();
    let sink = Arc::new(MemorySink::for_config(&config));

    let report = scheduler(HostBackend::new(), &config, &sink)
        .run_try_center(&tagged_reader(&config), &plan())
        .unwrap();

    // Six candidates in chunks of four: [4, 2] per slice.
    assert_eq!(report.chunks, 4);
    assert_eq!(report.rows_written, 12);

    let mut records = sink.try_results();
    assert_eq!(records.len(), 12);
    records.sort_by(|a, b| {
        (a.slice_id, a.center)
            .partial_cmp(&(b.slice_id, b.center))
            .unwrap()
    });

    let es = config.precision.size();
    for (i, record) in records.iter().enumerate() {
        let slice_id = if i < 6 { 2 } else { 5 };
        let center = 10.0 + (i % 6) as f32;
        assert_eq!(record.slice_id, slice_id);
        assert_eq!(record.center, center);
        assert_eq!(record.data.len(), config.recon_row_bytes());

        // Tag of the slice plus the candidate's shift.
        let expected = (slice_id + 1) as f32 + (center - 10.0);
        assert!(
            record
                .data
                .chunks_exact(es)
                .all(|b| read_element(b, config.precision) == expected),
            "slice {} center {}",
            slice_id,
            center
        );
    }
    assert!(sink.writes().is_empty());
}

#[test]
fn test_single_row_read_failure() {
    let config = try_config();
    let sink = Arc::new(MemorySink::for_config(&config));
    // No single item configured: read_single fails.
    let reader = VecReader::new(Vec::new());

    let err = scheduler(HostBackend::new(), &config, &sink)
        .run_try_center(&reader, &plan())
        .unwrap_err();

    assert_eq!(err.stage(), Some((Stage::Ingest, 2)));
    assert!(sink.try_results().is_empty());
}

#[test]
fn test_single_row_shape_checked() {
    let config = try_config();
    let sink = Arc::new(MemorySink::for_config(&config));
    let row = config.input_row_bytes();
    let reader = VecReader::new(Vec::new()).with_single(ChunkItem {
        id: 0,
        valid_rows: 2,
        data: vec![0; 2 * config.n_proj * row],
        dark: vec![0; 2 * config.n_dark * row],
        flat: vec![0; 2 * config.n_flat * row],
    });

    let err = scheduler(HostBackend::new(), &config, &sink)
        .run_try_center(&reader, &plan())
        .unwrap_err();
    assert_eq!(err.category(), "invalid_chunk");
}

#[test]
fn test_mismatched_plan_rejected() {
    let config = try_config();
    let sink = Arc::new(MemorySink::for_config(&config));
    let plan = TryCenterPlan {
        slice_ids: vec![0],
        shifts: vec![0.0, 1.0],
        centers: vec![10.0],
    };

    let err = scheduler(HostBackend::new(), &config, &sink)
        .run_try_center(&tagged_reader(&config), &plan)
        .unwrap_err();
    assert_eq!(err.category(), "invalid_config");
}
