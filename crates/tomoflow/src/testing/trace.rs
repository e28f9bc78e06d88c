//! Happens-before checks over a recorded event log.

use std::collections::BTreeMap;

use tomoflow_core::Stage;
use tomoflow_device::StreamRole;

use crate::pipeline::PipelineEvent;

#[derive(Debug, Default, Clone, Copy)]
struct ChunkTrace {
    ingest: Option<usize>,
    uploaded: bool,
    compute: Option<usize>,
    computed: bool,
    egest: Option<usize>,
    copied_out: bool,
    written: bool,
}

/// Check a full-volume event log for `total` chunks.
///
/// Verifies that every chunk passes each stage exactly once with the two
/// iteration lag on generation `chunk % 2`, and that each stage only starts
/// after the stream of the previous stage was synchronized.
pub fn check_happens_before(events: &[PipelineEvent], total: usize) -> Result<(), String> {
    let mut chunks: BTreeMap<usize, ChunkTrace> = BTreeMap::new();

    for event in events {
        match *event {
            PipelineEvent::StageIssued {
                iteration,
                stage,
                chunk,
                generation,
            } => {
                if generation.index() != chunk % 2 {
                    return Err(format!("{}: wrong generation", event));
                }
                let trace = chunks.entry(chunk).or_default();
                match stage {
                    Stage::Ingest => {
                        if trace.ingest.replace(iteration).is_some() {
                            return Err(format!("{}: ingested twice", event));
                        }
                    }
                    Stage::Compute => {
                        if !trace.uploaded {
                            return Err(format!("{}: before transfer-in sync", event));
                        }
                        if trace.ingest.map(|k| k + 1) != Some(iteration) {
                            return Err(format!("{}: not one iteration after ingest", event));
                        }
                        if trace.compute.replace(iteration).is_some() {
                            return Err(format!("{}: computed twice", event));
                        }
                    }
                    Stage::Egest => {
                        if !trace.computed {
                            return Err(format!("{}: before compute sync", event));
                        }
                        if trace.compute.map(|k| k + 1) != Some(iteration) {
                            return Err(format!("{}: not one iteration after compute", event));
                        }
                        if trace.egest.replace(iteration).is_some() {
                            return Err(format!("{}: egested twice", event));
                        }
                    }
                }
            }
            PipelineEvent::StreamSynced { iteration, role } => {
                for trace in chunks.values_mut() {
                    match role {
                        StreamRole::TransferIn if trace.ingest == Some(iteration) => {
                            trace.uploaded = true
                        }
                        StreamRole::Compute if trace.compute == Some(iteration) => {
                            trace.computed = true
                        }
                        StreamRole::TransferOut if trace.egest == Some(iteration) => {
                            trace.copied_out = true
                        }
                        _ => {}
                    }
                }
            }
            PipelineEvent::SlotAcquired { .. } => {}
            PipelineEvent::WriteDispatched { chunk, .. } => {
                let trace = chunks.entry(chunk).or_default();
                if !trace.copied_out {
                    return Err(format!("{}: before transfer-out sync", event));
                }
                if std::mem::replace(&mut trace.written, true) {
                    return Err(format!("{}: written twice", event));
                }
            }
        }
    }

    if chunks.len() != total {
        return Err(format!("{} chunks seen, expected {}", chunks.len(), total));
    }
    for (chunk, trace) in &chunks {
        if !trace.written {
            return Err(format!("chunk {} never written", chunk));
        }
    }
    Ok(())
}
