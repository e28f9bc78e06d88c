//! Content-tagged full runs.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tomoflow::testing::{mock_stage, DarkFlatCorrector, InMemorySource, MemorySink};
use tomoflow::{PipelineScheduler, Precision, SourceReader};
use tomoflow_core::split_rows;
use tomoflow_device::HostBackend;

use super::{assert_volume, builder, config, init_tracing, jittery_backend, run_tagged};

#[test]
fn test_every_row_lands_in_place() {
    init_tracing();
    let config = config(4, split_rows(32, 4));
    let (report, sink) = run_tagged(jittery_backend(), &config);

    assert_eq!(report.chunks, 8);
    assert_eq!(report.rows_written, 32);
    assert_eq!(report.bytes_copied_out, 32 * config.recon_row_bytes());
    assert_volume(&config, &sink);

    let mut chunks: Vec<_> = sink.writes().iter().map(|w| w.chunk_id).collect();
    chunks.sort_unstable();
    assert_eq!(chunks, (0..8).collect::<Vec<_>>());
}

#[test]
fn test_short_last_chunk() {
    let config = config(4, vec![4, 4, 4, 1]);
    let (report, sink) = run_tagged(jittery_backend(), &config);

    assert_eq!(report.chunks, 4);
    assert_eq!(report.rows_written, 13);
    assert_volume(&config, &sink);

    let last = sink.writes().into_iter().find(|w| w.chunk_id == 3).unwrap();
    assert_eq!((last.row_start, last.row_end), (12, 13));
    // Rows 13..16 of the last generation hold chunk 1's leftovers and must
    // never reach the writer.
    assert!(sink.row(13).is_none());
}

#[test]
fn test_zero_chunks() {
    let config = config(4, Vec::new());
    let (report, sink) = run_tagged(HostBackend::new(), &config);

    assert_eq!(report.chunks, 0);
    assert_eq!(report.rows_written, 0);
    assert!(sink.writes().is_empty());
    assert!(sink.written_rows().is_empty());
}

#[test]
fn test_output_addressing() {
    let config = Arc::new(
        builder()
            .chunks(2, vec![2, 2, 1])
            .addressing(8, 1)
            .build()
            .unwrap(),
    );
    let (_, sink) = run_tagged(jittery_backend(), &config);

    assert_volume(&config, &sink);
    let mut writes = sink.writes();
    writes.sort_by_key(|w| w.chunk_id);
    let ranges: Vec<_> = writes.iter().map(|w| (w.row_start, w.row_end)).collect();
    assert_eq!(ranges, vec![(4, 6), (6, 8), (8, 9)]);
    assert!(writes.iter().all(|w| w.global_row_offset == 8));
}

#[test]
fn test_half_precision() {
    let config = Arc::new(
        builder()
            .rows(10, 4)
            .precision(Precision::Float16)
            .build()
            .unwrap(),
    );
    let (report, sink) = run_tagged(jittery_backend(), &config);

    assert_eq!(report.rows_written, 10);
    assert_volume(&config, &sink);
}

#[test]
fn test_dark_flat_correction() {
    let config = Arc::new(builder().projections(3, 2, 3).rows(6, 2).build().unwrap());
    let backend = HostBackend::new();
    let stage = mock_stage(&backend, &config)
        .unwrap()
        .with_corrector(DarkFlatCorrector::new(config.n_dark, config.n_flat));
    let sink = Arc::new(MemorySink::for_config(&config));
    let source = InMemorySource::for_config(&config).with_fields(1.0, 3.0);
    let reader = SourceReader::new(Arc::new(source), Arc::clone(&config));

    PipelineScheduler::new(backend, Arc::clone(&config), stage, Arc::clone(&sink))
        .unwrap()
        .run(&reader)
        .unwrap();

    // (row + 1 - 1) / (3 - 1)
    for row in 0..6 {
        let values = sink.row_values(row).unwrap();
        assert!(values.iter().all(|&v| v == row as f32 / 2.0), "row {}", row);
    }
}

#[test]
fn test_scheduler_is_reusable() {
    let config = config(2, vec![2, 2, 2]);
    let sink = Arc::new(MemorySink::for_config(&config));
    let mut scheduler = super::scheduler(HostBackend::new(), &config, &sink);

    scheduler.run(&super::tagged_reader(&config)).unwrap();
    scheduler.run(&super::tagged_reader(&config)).unwrap();

    assert_eq!(sink.writes().len(), 6);
    assert_eq!(sink.overwrites(), 6);
}

#[test]
fn test_write_pool_saturation() {
    let config = Arc::new(
        builder()
            .chunks(2, vec![2; 12])
            .threads(1, 2)
            .build()
            .unwrap(),
    );
    let sink = Arc::new(MemorySink::for_config(&config).with_delay(Duration::from_millis(5)));
    let report = super::scheduler(jittery_backend(), &config, &sink)
        .run(&super::tagged_reader(&config))
        .unwrap();

    assert!(sink.max_concurrent() <= 2);
    assert!(report.write_pool.peak_busy <= 2);
    assert_eq!(report.write_pool.jobs_completed, 12);
    assert_volume(&config, &sink);
}

fn layout_strategy() -> impl Strategy<Value = (usize, Vec<usize>)> {
    prop_oneof![Just(2usize), Just(4usize)].prop_flat_map(|cap| {
        (
            Just(cap),
            prop::collection::vec(1..=cap, 0..8).prop_map(move |mut rows| {
                // Only the last chunk may be short.
                let n = rows.len();
                for r in rows.iter_mut().take(n.saturating_sub(1)) {
                    *r = cap;
                }
                rows
            }),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 16,
        max_shrink_iters: 20,
        ..ProptestConfig::default()
    })]

    /// Property: for any chunk layout and pool sizes, every row is written
    /// once with the tag of its source row.
    #[test]
    fn prop_any_layout_reconstructs_in_place(
        (cap, rows) in layout_strategy(),
        read in 1usize..4,
        write in 1usize..4,
        queue in 1usize..4,
    ) {
        let config = Arc::new(
            builder()
                .chunks(cap, rows.clone())
                .threads(read, write)
                .queue_capacity(queue)
                .build()
                .unwrap(),
        );
        let (report, sink) = run_tagged(jittery_backend(), &config);
        prop_assert_eq!(report.chunks, rows.len());
        prop_assert_eq!(report.rows_written, rows.iter().sum::<usize>());
        assert_volume(&config, &sink);
        prop_assert!(report.write_pool.peak_busy <= write);
    }
}
