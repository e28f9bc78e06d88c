//! Full-volume scheduler.
//!
//! Streams every chunk of the configuration through the conveyor: a named
//! ingest thread runs the reader into a bounded queue, and the calling thread
//! drives ingest, compute and egest over two buffer generations.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tomoflow_core::{
    work_queue, CancellationToken, ChunkItem, Error, Generation, PoolStats, ReconConfig, Result,
    Stage, WorkReceiver, WorkerPool,
};
use tomoflow_device::{Backend, ComputeStage, HostMemory, StreamRole};

use super::context::{Counters, RunResources, StageContext};
use super::conveyor::{self, ConveyorStages};
use super::events::PipelineObserver;
use super::progress::ConveyorProgress;
use crate::io::{ChunkReader, ChunkWriter};

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Chunks reconstructed and written.
    pub chunks: usize,
    /// Output rows written.
    pub rows_written: usize,
    /// Payload bytes copied into pinned staging.
    pub bytes_staged: usize,
    /// Bytes copied device-to-host.
    pub bytes_copied_out: usize,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
    /// Write pool counters.
    pub write_pool: PoolStats,
    /// Read pool counters.
    pub read_pool: PoolStats,
}

impl RunReport {
    pub(super) fn from_counters(counters: Counters, elapsed: Duration) -> Self {
        Self {
            chunks: counters.chunks,
            rows_written: counters.rows_written,
            bytes_staged: counters.bytes_staged,
            bytes_copied_out: counters.bytes_copied_out,
            elapsed,
            ..Self::default()
        }
    }

    /// Output rows per second.
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows_written as f64 / secs
        } else {
            0.0
        }
    }
}

/// Conveyor scheduler for a full reconstruction.
///
/// Owns the backend and the compute stage; streams, generation buffers and
/// pools are allocated per [`run`](Self::run) and released when it returns.
pub struct PipelineScheduler<B: Backend, C: ComputeStage<B>, W: ChunkWriter> {
    pub(super) backend: B,
    pub(super) config: Arc<ReconConfig>,
    pub(super) compute: C,
    pub(super) writer: Arc<W>,
    pub(super) observer: Option<Arc<dyn PipelineObserver>>,
    pub(super) cancel: CancellationToken,
}

impl<B: Backend, C: ComputeStage<B>, W: ChunkWriter> PipelineScheduler<B, C, W> {
    /// Create a scheduler. The compute stage must be built for the
    /// configured chunk capacity.
    pub fn new(backend: B, config: Arc<ReconConfig>, compute: C, writer: Arc<W>) -> Result<Self> {
        config.validate()?;
        if compute.chunk_rows() != config.chunk_rows {
            return Err(Error::config(format!(
                "compute stage built for {} rows, configuration uses {}",
                compute.chunk_rows(),
                config.chunk_rows
            )));
        }
        Ok(Self {
            backend,
            config,
            compute,
            writer,
            observer: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Report pipeline events to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Use `cancel` instead of a private token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops a running conveyor.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn compute(&self) -> &C {
        &self.compute
    }

    pub fn writer(&self) -> &Arc<W> {
        &self.writer
    }

    /// Reconstruct every configured chunk.
    ///
    /// Returns once every write has finished. On failure the error names the
    /// stage and chunk; streams and pools are drained before returning.
    pub fn run<R: ChunkReader>(&mut self, reader: &R) -> Result<RunReport> {
        let started = Instant::now();
        let total = self.config.total_chunks();
        tracing::info!(
            chunks = total,
            rows = self.config.total_rows(),
            chunk_rows = self.config.chunk_rows,
            backend = self.backend.name(),
            precision = self.config.precision.name(),
            "reconstruction started"
        );

        let res = RunResources::allocate(&self.backend, &self.config)?;
        let read_pool = WorkerPool::new("tomoflow-read", self.config.max_read_threads)?;
        let (tx, rx) = work_queue::<ChunkItem>(self.config.queue_capacity);
        let ingest_cancel = self.cancel.child_token();
        let progress = ConveyorProgress::new(total, self.config.show_progress);

        let backend = &self.backend;
        let config: &ReconConfig = &self.config;
        let compute = &mut self.compute;
        let writer = &self.writer;
        let observer = self.observer.as_deref();
        let cancel = &self.cancel;

        let (outcome, counters) = thread::scope(|scope| {
            let read_pool = &read_pool;
            let ingest_cancel = &ingest_cancel;
            let spawned = thread::Builder::new()
                .name("tomoflow-ingest".to_string())
                .spawn_scoped(scope, move || reader.read_into_queue(&tx, read_pool, ingest_cancel));
            let ingest = match spawned {
                Ok(handle) => handle,
                Err(err) => return (Err(Error::Io(err)), Counters::default()),
            };

            let mut stages = FullStages {
                ctx: StageContext::new(backend, &res, cancel, observer),
                config,
                compute,
                writer,
                queue: rx,
                progress: &progress,
                ids: vec![None; total],
                seen: vec![false; total],
                shifts: vec![0.0; config.chunk_rows],
            };
            let outcome = conveyor::run(total, &mut stages, cancel);
            let counters = stages.ctx.counters;
            // Dropping the stages closes the queue, which unblocks the reader.
            drop(stages);
            if outcome.is_err() {
                ingest_cancel.cancel();
            }

            let read_result = ingest
                .join()
                .unwrap_or_else(|panic| Err(Error::WorkerPanicked(panic_message(&*panic))));
            (resolve(outcome, read_result), counters)
        });

        let mut report = RunReport::from_counters(counters, started.elapsed());
        report.write_pool = res.write_pool.stats();
        report.read_pool = read_pool.stats();

        match outcome {
            Ok(()) => {
                progress.finish(format!("{} chunks", report.chunks));
                tracing::info!(
                    chunks = report.chunks,
                    rows = report.rows_written,
                    staged_bytes = report.bytes_staged,
                    copied_out_bytes = report.bytes_copied_out,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    peak_writers = report.write_pool.peak_busy,
                    "reconstruction finished"
                );
                Ok(report)
            }
            Err(err) => {
                progress.abandon();
                if !err.is_cancelled() {
                    tracing::warn!(error = %err, category = err.category(), "reconstruction failed");
                }
                Err(err)
            }
        }
    }
}

/// Combine the conveyor outcome with the reader's.
///
/// A queue that closed early means the reader stopped; its own error is the
/// one worth reporting.
fn resolve(conveyor: Result<()>, reader: Result<()>) -> Result<()> {
    match conveyor {
        Err(Error::Stage {
            stage: Stage::Ingest,
            chunk,
            source,
        }) if matches!(*source, Error::QueueClosed) => match reader {
            Err(err) => Err(err.in_stage(Stage::Ingest, chunk)),
            Ok(()) => Err(Error::invalid_chunk(chunk, "reader finished before sending it")
                .in_stage(Stage::Ingest, chunk)),
        },
        Err(err) => Err(err),
        Ok(()) => {
            if let Err(err) = reader {
                tracing::warn!(error = %err, "reader failed after the last chunk, ignoring");
            }
            Ok(())
        }
    }
}

pub(super) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Stage actions of a full-volume run.
struct FullStages<'a, B: Backend, C, W> {
    ctx: StageContext<'a, B>,
    config: &'a ReconConfig,
    compute: &'a mut C,
    writer: &'a Arc<W>,
    queue: WorkReceiver<ChunkItem>,
    progress: &'a ConveyorProgress,
    /// Chunk id carried by each pipeline position.
    ids: Vec<Option<usize>>,
    seen: Vec<bool>,
    shifts: Vec<f32>,
}

impl<B: Backend, C: ComputeStage<B>, W: ChunkWriter> FullStages<'_, B, C, W> {
    /// Reject items that do not match the configuration.
    fn validate(&self, item: &ChunkItem) -> Result<()> {
        let expected = self.config.valid_rows(item.id).ok_or_else(|| {
            Error::invalid_chunk(
                item.id,
                format!("id out of range for {} chunks", self.config.total_chunks()),
            )
        })?;
        if self.seen[item.id] {
            return Err(Error::invalid_chunk(item.id, "delivered twice"));
        }
        if item.valid_rows != expected {
            return Err(Error::invalid_chunk(
                item.id,
                format!("{} valid rows, expected {}", item.valid_rows, expected),
            ));
        }

        let row_bytes = self.config.input_row_bytes();
        let payloads = [
            ("data", item.data.len(), self.config.n_proj),
            ("dark", item.dark.len(), self.config.n_dark),
            ("flat", item.flat.len(), self.config.n_flat),
        ];
        for (name, actual, count) in payloads {
            let wanted = count * expected * row_bytes;
            if actual != wanted {
                return Err(Error::invalid_chunk(
                    item.id,
                    format!("{} payload is {} bytes, expected {}", name, actual, wanted),
                ));
            }
        }
        Ok(())
    }
}

impl<B: Backend, C: ComputeStage<B>, W: ChunkWriter> ConveyorStages for FullStages<'_, B, C, W> {
    fn compute(&mut self, k: usize, position: usize, g: Generation) -> Result<()> {
        let stream = self.ctx.res.streams.compute();
        let backend = self.ctx.backend;
        self.compute
            .correct(backend, self.ctx.res.gens.inputs(g), stream)?;
        self.compute
            .reconstruct(backend, self.ctx.res.gens.recon(g), &self.shifts, stream)?;
        self.ctx.issued(k, Stage::Compute, self.chunk_id(position), g);
        Ok(())
    }

    fn egest(&mut self, k: usize, position: usize, g: Generation) -> Result<()> {
        let chunk = self.chunk_id(position);
        let rows = self
            .config
            .valid_rows(chunk)
            .ok_or_else(|| Error::invalid_chunk(chunk, "no such chunk"))?;
        self.ctx.copy_out(k, chunk, g, rows)
    }

    fn ingest(&mut self, k: usize, position: usize, g: Generation) -> Result<()> {
        let item = self.queue.recv(self.ctx.cancel)?;
        self.validate(&item)?;
        self.seen[item.id] = true;
        self.ids[position] = Some(item.id);

        self.ctx.counters.bytes_staged += self.ctx.res.gens.stage(g, &item)?;
        self.ctx.res.gens.copy_in_async(
            self.ctx.backend,
            g,
            item.valid_rows,
            self.ctx.res.streams.transfer_in(),
        )?;
        self.ctx.issued(k, Stage::Ingest, item.id, g);
        Ok(())
    }

    fn sync_transfer_out(&mut self, k: usize) -> Result<()> {
        self.ctx.sync(k, StreamRole::TransferOut)
    }

    fn dispatch_write(&mut self, _k: usize, position: usize) -> Result<()> {
        let pending = self.ctx.take_pending(self.chunk_id(position))?;
        let rows = self.config.output_rows(pending.chunk);
        let len = pending.rows * self.ctx.res.gens.recon_row_bytes();
        let landing = self.ctx.res.landing[pending.slot].clone();
        let writer = Arc::clone(self.writer);
        let chunk = pending.chunk;
        let start_row = self.config.start_row;

        self.ctx.dispatch(
            pending,
            Box::new(move || {
                landing.with_bytes(|bytes| {
                    writer.write_chunk(&bytes[..len], rows.start, rows.end, chunk, start_row)
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

    fn end_iteration(&mut self, _k: usize) {
        self.progress.advance(self.queue.len());
    }

    fn finish(&mut self) -> Result<()> {
        self.ctx.finish()
    }

    fn teardown(&mut self) {
        self.ctx.teardown();
    }

    fn chunk_id(&self, position: usize) -> usize {
        self.ids.get(position).copied().flatten().unwrap_or(position)
    }
}
