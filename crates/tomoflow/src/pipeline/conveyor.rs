//! The conveyor loop.
//!
//! For `total` chunks the loop runs `total + 2` iterations. At iteration `k`
//! chunk `k` is ingested, chunk `k-1` computed and chunk `k-2` egested, each
//! on generation `chunk % 2`:
//!
//! ```text
//!  k   ingest  compute  egest
//!  0     0
//!  1     1       0
//!  2     2       1        0
//!  3             2        1
//!  4                      2
//! ```
//!
//! Within an iteration the order is fixed: compute, egest copy-out, ingest,
//! transfer-out sync, write dispatch, transfer-in sync, compute sync.

use tomoflow_core::{CancellationToken, Generation, Result, Stage};

/// Which stages fire at one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Firing {
    pub compute: Option<usize>,
    pub egest: Option<usize>,
    pub ingest: Option<usize>,
}

impl Firing {
    /// Stages that fire at iteration `k` of a run over `total` chunks.
    pub fn plan(k: usize, total: usize) -> Self {
        Self {
            compute: (k >= 1 && k <= total).then(|| k - 1),
            egest: (k >= 2 && k - 2 < total).then(|| k - 2),
            ingest: (k < total).then_some(k),
        }
    }

    /// Iterations of a run over `total` chunks, fill and drain included.
    pub fn iterations(total: usize) -> usize {
        total + 2
    }

    /// True if nothing fires.
    pub fn is_idle(&self) -> bool {
        self.compute.is_none() && self.egest.is_none() && self.ingest.is_none()
    }
}

/// The per-stage actions a scheduler plugs into the conveyor.
///
/// Positions are pipeline positions; `chunk_id` maps a position to the chunk
/// it carries for error attribution.
pub trait ConveyorStages {
    /// Enqueue compute of the chunk at `position` on generation `g`.
    fn compute(&mut self, k: usize, position: usize, g: Generation) -> Result<()>;

    /// Claim a write slot and enqueue the copy-out of `position`.
    fn egest(&mut self, k: usize, position: usize, g: Generation) -> Result<()>;

    /// Pull the next chunk, stage it and enqueue its copy-in.
    fn ingest(&mut self, k: usize, position: usize, g: Generation) -> Result<()>;

    /// Wait for the transfer-out stream.
    fn sync_transfer_out(&mut self, k: usize) -> Result<()>;

    /// Hand the copied-out chunk at `position` to its write slot.
    fn dispatch_write(&mut self, k: usize, position: usize) -> Result<()>;

    /// Wait for the transfer-in stream.
    fn sync_transfer_in(&mut self, k: usize) -> Result<()>;

    /// Wait for the compute stream.
    fn sync_compute(&mut self, k: usize) -> Result<()>;

    /// Called after every completed iteration.
    fn end_iteration(&mut self, _k: usize) {}

    /// Wait for outstanding writes after the last iteration.
    fn finish(&mut self) -> Result<()>;

    /// Quiesce streams and workers after a failure.
    fn teardown(&mut self);

    /// Chunk id carried by `position`.
    fn chunk_id(&self, position: usize) -> usize {
        position
    }
}

/// Drive `stages` through a full run over `total` chunks.
///
/// On success every write has completed when this returns. On failure
/// `teardown` runs before the error is returned.
pub fn run<S: ConveyorStages>(
    total: usize,
    stages: &mut S,
    cancel: &CancellationToken,
) -> Result<()> {
    match drive(total, stages, cancel) {
        Ok(()) => stages.finish(),
        Err(err) => {
            if err.is_cancelled() {
                tracing::warn!("conveyor cancelled, tearing down");
            } else {
                tracing::warn!(error = %err, "conveyor failed, tearing down");
            }
            stages.teardown();
            Err(err)
        }
    }
}

fn drive<S: ConveyorStages>(total: usize, stages: &mut S, cancel: &CancellationToken) -> Result<()> {
    for k in 0..Firing::iterations(total) {
        cancel.check()?;
        let plan = Firing::plan(k, total);
        let attribute = |stages: &S, stage: Stage, position: usize| {
            let chunk = stages.chunk_id(position);
            move |err: tomoflow_core::Error| err.in_stage(stage, chunk)
        };

        if let Some(p) = plan.compute {
            stages
                .compute(k, p, Generation::of(p))
                .map_err(attribute(stages, Stage::Compute, p))?;
        }
        if let Some(p) = plan.egest {
            stages
                .egest(k, p, Generation::of(p))
                .map_err(attribute(stages, Stage::Egest, p))?;
        }
        if let Some(p) = plan.ingest {
            stages
                .ingest(k, p, Generation::of(p))
                .map_err(attribute(stages, Stage::Ingest, p))?;
        }

        let out = stages.sync_transfer_out(k);
        if let Some(p) = plan.egest {
            out.map_err(attribute(stages, Stage::Egest, p))?;
            stages
                .dispatch_write(k, p)
                .map_err(attribute(stages, Stage::Egest, p))?;
        } else {
            out?;
        }

        let input = stages.sync_transfer_in(k);
        match plan.ingest {
            Some(p) => input.map_err(attribute(stages, Stage::Ingest, p))?,
            None => input?,
        }
        let compute = stages.sync_compute(k);
        match plan.compute {
            Some(p) => compute.map_err(attribute(stages, Stage::Compute, p))?,
            None => compute?,
        }

        stages.end_iteration(k);
    }
    Ok(())
}
