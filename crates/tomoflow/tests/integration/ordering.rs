//! Iteration trace, generation parity and happens-before.

use std::sync::Arc;
use std::time::Duration;

use tomoflow::testing::{check_happens_before, MemorySink};
use tomoflow::{EventLog, PipelineEvent, Stage};
use tomoflow_core::split_rows;
use tomoflow_device::{HostBackend, StreamRole};

use super::{config, jittery_backend, scheduler, tagged_reader};

fn logged_run(backend: HostBackend, valid_rows: Vec<usize>) -> (Arc<EventLog>, Arc<MemorySink>) {
    let config = config(4, valid_rows);
    let sink = Arc::new(MemorySink::for_config(&config));
    let log = Arc::new(EventLog::new());
    scheduler(backend, &config, &sink)
        .with_observer(log.clone())
        .run(&tagged_reader(&config))
        .unwrap();
    (log, sink)
}

#[test]
fn test_three_chunk_trace() {
    let (log, _) = logged_run(HostBackend::new(), vec![4, 4, 4]);

    let trace: Vec<_> = (0..5).map(|k| log.iteration(k)).collect();
    assert_eq!(
        trace,
        vec![
            vec![(Stage::Ingest, 0)],
            vec![(Stage::Compute, 0), (Stage::Ingest, 1)],
            vec![(Stage::Compute, 1), (Stage::Egest, 0), (Stage::Ingest, 2)],
            vec![(Stage::Compute, 2), (Stage::Egest, 1)],
            vec![(Stage::Egest, 2)],
        ]
    );
    assert!(log.iteration(5).is_empty());
}

#[test]
fn test_each_chunk_once_in_order() {
    let (log, _) = logged_run(jittery_backend(), split_rows(40, 4));

    let expected: Vec<usize> = (0..10).collect();
    assert_eq!(log.issued(Stage::Ingest), expected);
    assert_eq!(log.issued(Stage::Compute), expected);
    assert_eq!(log.issued(Stage::Egest), expected);
}

#[test]
fn test_generation_parity() {
    let (log, _) = logged_run(jittery_backend(), split_rows(24, 4));

    for event in log.events() {
        if let PipelineEvent::StageIssued {
            chunk, generation, ..
        } = event
        {
            assert_eq!(generation.index(), chunk % 2, "{}", event);
        }
    }
}

#[test]
fn test_happens_before_under_jitter() {
    for _ in 0..3 {
        let (log, _) = logged_run(
            HostBackend::with_jitter(Duration::from_micros(500)),
            vec![4, 4, 4, 4, 4, 2],
        );
        check_happens_before(&log.events(), 6).unwrap();
    }
}

#[test]
fn test_write_dispatch_follows_transfer_out_sync() {
    let (log, _) = logged_run(jittery_backend(), vec![4, 4]);
    let events = log.events();

    for (i, event) in events.iter().enumerate() {
        if let PipelineEvent::WriteDispatched { .. } = event {
            let previous = events[..i]
                .iter()
                .rev()
                .find(|e| matches!(e, PipelineEvent::StreamSynced { .. }));
            assert!(matches!(
                previous,
                Some(PipelineEvent::StreamSynced {
                    role: StreamRole::TransferOut,
                    ..
                })
            ));
        }
    }
}

#[test]
fn test_zero_chunks_only_syncs() {
    let (log, _) = logged_run(HostBackend::new(), Vec::new());
    let events = log.events();

    assert_eq!(events.len(), 6);
    assert!(events
        .iter()
        .all(|e| matches!(e, PipelineEvent::StreamSynced { .. })));
}
