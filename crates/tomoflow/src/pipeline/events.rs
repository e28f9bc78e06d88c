//! Observable pipeline events.
//!
//! The scheduler reports what it issues and when each stream drains. Every
//! event is traced at `trace` level; an optional [`PipelineObserver`] also
//! receives them, which is how ordering tests reconstruct happens-before.

use std::fmt;

use parking_lot::Mutex;
use tomoflow_core::{Generation, Stage};
use tomoflow_device::StreamRole;

/// Something the scheduler did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Work for `chunk` was enqueued (or, for ingest, staged and enqueued).
    StageIssued {
        iteration: usize,
        stage: Stage,
        chunk: usize,
        generation: Generation,
    },
    /// A stream finished everything enqueued on it so far.
    StreamSynced { iteration: usize, role: StreamRole },
    /// A write slot was claimed for `chunk`.
    SlotAcquired { slot: usize, chunk: usize },
    /// The write job for `chunk` was handed to `slot`.
    WriteDispatched { slot: usize, chunk: usize },
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::StageIssued {
                iteration,
                stage,
                chunk,
                generation,
            } => write!(f, "k={} {}({}) on {}", iteration, stage, chunk, generation),
            PipelineEvent::StreamSynced { iteration, role } => {
                write!(f, "k={} sync {}", iteration, role)
            }
            PipelineEvent::SlotAcquired { slot, chunk } => {
                write!(f, "slot {} acquired for {}", slot, chunk)
            }
            PipelineEvent::WriteDispatched { slot, chunk } => {
                write!(f, "write({}) dispatched to slot {}", chunk, slot)
            }
        }
    }
}

/// Receives pipeline events on the scheduler thread.
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// Observer that records every event.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<PipelineEvent>>,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the recorded events.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }

    /// Chunks issued for `stage`, in issue order.
    pub fn issued(&self, stage: Stage) -> Vec<usize> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StageIssued { stage: s, chunk, .. } if *s == stage => Some(*chunk),
                _ => None,
            })
            .collect()
    }

    /// `(stage, chunk)` pairs issued during iteration `k`.
    pub fn iteration(&self, k: usize) -> Vec<(Stage, usize)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StageIssued {
                    iteration,
                    stage,
                    chunk,
                    ..
                } if *iteration == k => Some((*stage, *chunk)),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl PipelineObserver for EventLog {
    fn on_event(&self, event: &PipelineEvent) {
        self.events.lock().push(*event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filters() {
        let log = EventLog::new();
        log.on_event(&PipelineEvent::StageIssued {
            iteration: 0,
            stage: Stage::Ingest,
            chunk: 0,
            generation: Generation::of(0),
        });
        log.on_event(&PipelineEvent::StreamSynced {
            iteration: 0,
            role: StreamRole::TransferIn,
        });
        log.on_event(&PipelineEvent::StageIssued {
            iteration: 1,
            stage: Stage::Compute,
            chunk: 0,
            generation: Generation::of(0),
        });

        assert_eq!(log.issued(Stage::Ingest), vec![0]);
        assert_eq!(log.iteration(1), vec![(Stage::Compute, 0)]);
        assert_eq!(log.events().len(), 3);
        log.clear();
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_display() {
        let event = PipelineEvent::StageIssued {
            iteration: 3,
            stage: Stage::Egest,
            chunk: 1,
            generation: Generation::of(1),
        };
        assert_eq!(event.to_string(), "k=3 egest(1) on g1");
    }
}
