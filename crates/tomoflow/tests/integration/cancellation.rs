//! Cooperative cancellation.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tomoflow::testing::{InMemorySource, MemorySink};
use tomoflow::{CancellationToken, PipelineEvent, PipelineObserver, SourceReader, Stage};
use tomoflow_core::split_rows;
use tomoflow_device::HostBackend;

use super::{builder, config, scheduler, tagged_reader};

/// Cancels the run once compute is issued for a given chunk.
struct CancelAt {
    token: CancellationToken,
    chunk: usize,
}

impl PipelineObserver for CancelAt {
    fn on_event(&self, event: &PipelineEvent) {
        if let PipelineEvent::StageIssued {
            stage: Stage::Compute,
            chunk,
            ..
        } = event
        {
            if *chunk == self.chunk {
                self.token.cancel();
            }
        }
    }
}

#[test]
fn test_cancelled_before_start() {
    let config = config(4, vec![4, 4]);
    let sink = Arc::new(MemorySink::for_config(&config));
    let token = CancellationToken::new();
    token.cancel();

    let err = scheduler(HostBackend::new(), &config, &sink)
        .with_cancel(token)
        .run(&tagged_reader(&config))
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(sink.writes().is_empty());
}

#[test]
fn test_cancel_between_iterations() {
    let config = config(4, split_rows(40, 4));
    let sink = Arc::new(MemorySink::for_config(&config));
    let token = CancellationToken::new();
    let observer = Arc::new(CancelAt {
        token: token.clone(),
        chunk: 3,
    });

    let err = scheduler(HostBackend::new(), &config, &sink)
        .with_cancel(token)
        .with_observer(observer)
        .run(&tagged_reader(&config))
        .unwrap_err();

    assert!(err.is_cancelled());
    // The iteration that computed chunk 3 can still dispatch chunk 2.
    assert!(sink.writes().iter().all(|w| w.chunk_id <= 2));
}

#[test]
fn test_cancel_from_another_thread() {
    let config = Arc::new(
        builder()
            .chunks(2, vec![2; 50])
            .threads(1, 1)
            .build()
            .unwrap(),
    );
    let sink = Arc::new(MemorySink::for_config(&config).with_delay(Duration::from_millis(10)));
    let source = InMemorySource::for_config(&config).with_delay(Duration::from_millis(1));
    let reader = SourceReader::new(Arc::new(source), Arc::clone(&config));

    let mut scheduler = scheduler(HostBackend::new(), &config, &sink);
    let token = scheduler.cancel_token().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        token.cancel();
    });

    let err = scheduler.run(&reader).unwrap_err();
    canceller.join().unwrap();

    assert!(err.is_cancelled());
    assert!(sink.writes().len() < 50);
}

#[test]
fn test_token_is_sticky() {
    let config = config(4, vec![4]);
    let sink = Arc::new(MemorySink::for_config(&config));
    let mut scheduler = scheduler(HostBackend::new(), &config, &sink);
    scheduler.cancel_token().cancel();

    assert!(scheduler.run(&tagged_reader(&config)).unwrap_err().is_cancelled());
    assert!(scheduler.run(&tagged_reader(&config)).unwrap_err().is_cancelled());
}
