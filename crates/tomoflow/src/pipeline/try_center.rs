//! Try-center runs.
//!
//! One detector row is reconstructed under many candidate rotation centers.
//! The row is uploaded and corrected once per slice; each conveyor chunk then
//! reconstructs that same slab with a different block of shifts, and egest
//! writes one artifact per candidate.

use std::sync::Arc;
use std::time::Instant;

use tomoflow_core::{
    work_queue, ChunkItem, Error, Generation, ReconConfig, Result, Stage, TryCenterPlan,
};
use tomoflow_device::{Backend, ComputeStage, HostMemory, StreamRole};

use super::context::{Counters, RunResources, StageContext};
use super::conveyor::{self, ConveyorStages};
use super::scheduler::{PipelineScheduler, RunReport};
use crate::io::{ChunkReader, ChunkWriter};

impl<B: Backend, C: ComputeStage<B>, W: ChunkWriter> PipelineScheduler<B, C, W> {
    /// Reconstruct every slice of `plan` once per candidate center.
    ///
    /// The writer receives `write_try_result` for each (slice, candidate).
    pub fn run_try_center<R: ChunkReader>(
        &mut self,
        reader: &R,
        plan: &TryCenterPlan,
    ) -> Result<RunReport> {
        plan.validate()?;
        let started = Instant::now();
        let chunk_rows = self.config.chunk_rows;
        let valid = plan.chunk_valid_rows(chunk_rows);
        tracing::info!(
            slices = plan.slice_ids.len(),
            candidates = plan.len(),
            chunks_per_slice = valid.len(),
            "try-center started"
        );

        let res = RunResources::allocate(&self.backend, &self.config)?;
        let mut totals = Counters::default();

        for &slice_id in &plan.slice_ids {
            self.cancel.check()?;
            let staged = self
                .upload_slice(reader, &res, slice_id)
                .map_err(|e| e.in_stage(Stage::Ingest, slice_id))?;

            let mut stages = TryStages {
                ctx: StageContext::new(
                    &self.backend,
                    &res,
                    &self.cancel,
                    self.observer.as_deref(),
                ),
                compute: &mut self.compute,
                writer: &self.writer,
                plan,
                valid: &valid,
                chunk_rows,
                slice_id,
            };
            conveyor::run(valid.len(), &mut stages, &self.cancel)?;

            let counters = stages.ctx.counters;
            totals.chunks += counters.chunks;
            totals.rows_written += counters.rows_written;
            totals.bytes_copied_out += counters.bytes_copied_out;
            totals.bytes_staged += staged;
            tracing::info!(slice = slice_id, candidates = plan.len(), "try-center slice done");
        }

        let mut report = RunReport::from_counters(totals, started.elapsed());
        report.write_pool = res.write_pool.stats();
        tracing::info!(
            slices = plan.slice_ids.len(),
            artifacts = report.rows_written,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "try-center finished"
        );
        Ok(report)
    }

    /// Read row `slice_id`, tile it over generation 0, upload and correct it.
    ///
    /// Returns the payload bytes staged.
    fn upload_slice<R: ChunkReader>(
        &mut self,
        reader: &R,
        res: &RunResources<B>,
        slice_id: usize,
    ) -> Result<usize> {
        let (tx, rx) = work_queue::<ChunkItem>(1);
        reader.read_single(&tx, slice_id, &self.cancel)?;
        drop(tx);
        let item = rx.recv(&self.cancel)?;
        validate_single(&self.config, &item)?;

        let g = Generation::of(0);
        let staged = res.gens.tile(g, &item)?;
        res.gens.copy_in_async(
            &self.backend,
            g,
            self.config.chunk_rows,
            res.streams.transfer_in(),
        )?;
        res.streams.sync(&self.backend, StreamRole::TransferIn)?;

        self.compute
            .correct(&self.backend, res.gens.inputs(g), res.streams.compute())
            .map_err(|e| e.in_stage(Stage::Compute, slice_id))?;
        res.streams
            .sync(&self.backend, StreamRole::Compute)
            .map_err(|e| Error::from(e).in_stage(Stage::Compute, slice_id))?;
        Ok(staged)
    }
}

fn validate_single(config: &ReconConfig, item: &ChunkItem) -> Result<()> {
    if item.valid_rows != 1 {
        return Err(Error::invalid_chunk(
            item.id,
            format!("single-row read returned {} rows", item.valid_rows),
        ));
    }
    let row_bytes = config.input_row_bytes();
    let payloads = [
        ("data", item.data.len(), config.n_proj),
        ("dark", item.dark.len(), config.n_dark),
        ("flat", item.flat.len(), config.n_flat),
    ];
    for (name, actual, count) in payloads {
        if actual != count * row_bytes {
            return Err(Error::invalid_chunk(
                item.id,
                format!("{} payload is {} bytes, expected {}", name, actual, count * row_bytes),
            ));
        }
    }
    Ok(())
}

/// Stage actions of one try-center slice. Ingest is a no-op: the slab was
/// uploaded before the conveyor started and is only read from then on.
struct TryStages<'a, B: Backend, C, W> {
    ctx: StageContext<'a, B>,
    compute: &'a mut C,
    writer: &'a Arc<W>,
    plan: &'a TryCenterPlan,
    valid: &'a [usize],
    chunk_rows: usize,
    slice_id: usize,
}

impl<B: Backend, C: ComputeStage<B>, W: ChunkWriter> ConveyorStages for TryStages<'_, B, C, W> {
    fn compute(&mut self, k: usize, chunk: usize, g: Generation) -> Result<()> {
        let shifts = self.plan.padded_shifts(chunk, self.chunk_rows);
        self.compute.reconstruct(
            self.ctx.backend,
            self.ctx.res.gens.recon(g),
            &shifts,
            self.ctx.res.streams.compute(),
        )?;
        self.ctx.issued(k, Stage::Compute, chunk, g);
        Ok(())
    }

    fn egest(&mut self, k: usize, chunk: usize, g: Generation) -> Result<()> {
        self.ctx.copy_out(k, chunk, g, self.valid[chunk])
    }

    fn ingest(&mut self, _k: usize, _chunk: usize, _g: Generation) -> Result<()> {
        Ok(())
    }

    fn sync_transfer_out(&mut self, k: usize) -> Result<()> {
        self.ctx.sync(k, StreamRole::TransferOut)
    }

    fn dispatch_write(&mut self, _k: usize, chunk: usize) -> Result<()> {
        let pending = self.ctx.take_pending(chunk)?;
        let centers = (0..pending.rows)
            .map(|row| self.plan.center(chunk, row, self.chunk_rows))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| Error::invalid_chunk(chunk, "candidate without a center"))?;
        let row_bytes = self.ctx.res.gens.recon_row_bytes();
        let landing = self.ctx.res.landing[pending.slot].clone();
        let writer = Arc::clone(self.writer);
        let slice_id = self.slice_id;

        self.ctx.dispatch(
            pending,
            Box::new(move || {
                landing.with_bytes(|bytes| {
                    for (row, center) in centers.iter().enumerate() {
                        let slice = &bytes[row * row_bytes..(row + 1) * row_bytes];
                        writer.write_try_result(slice, *center, slice_id)?;
                    }
                    Ok(())
                })
            }),
        )
    }

    fn sync_transfer_in(&mut self, k: usize) -> Result<()> {
        self.ctx.sync(k, StreamRole::TransferIn)
    }

    fn sync_compute(&mut self, k: usize) -> Result<()> {
        self.ctx.sync(k, StreamRole::Compute)
    }

    fn finish(&mut self) -> Result<()> {
        self.ctx.finish()
    }

    fn teardown(&mut self) {
        self.ctx.teardown();
    }
}
