//! Resources and egest plumbing shared by the full and try-center stages.

use tomoflow_core::{
    CancellationToken, Generation, JobContext, Job, ReconConfig, Result, Stage, WorkerPool,
};
use tomoflow_device::{Backend, BufferGenerations, StreamRole, StreamSet};

use super::events::{PipelineEvent, PipelineObserver};

/// Streams, buffers and the write pool of one run.
///
/// Everything is allocated up front and released on drop.
pub(crate) struct RunResources<B: Backend> {
    pub streams: StreamSet<B>,
    pub gens: BufferGenerations<B>,
    pub write_pool: WorkerPool,
    /// One pinned landing area per write slot.
    pub landing: Vec<B::HostBuffer>,
}

impl<B: Backend> RunResources<B> {
    pub fn allocate(backend: &B, config: &ReconConfig) -> Result<Self> {
        let streams = StreamSet::new(backend)?;
        let gens = BufferGenerations::new(backend, config)?;
        let write_pool = WorkerPool::new("tomoflow-write", config.max_write_threads)?;
        let landing = (0..write_pool.size())
            .map(|_| backend.alloc_pinned(config.recon_generation_bytes()))
            .collect::<tomoflow_device::Result<Vec<_>>>()?;

        tracing::debug!(
            write_slots = landing.len(),
            landing_bytes = landing.len() * config.recon_generation_bytes(),
            "run resources allocated"
        );
        Ok(Self {
            streams,
            gens,
            write_pool,
            landing,
        })
    }
}

/// A copy-out waiting for its transfer-out sync before the write job starts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingWrite {
    pub slot: usize,
    pub chunk: usize,
    pub rows: usize,
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub chunks: usize,
    pub rows_written: usize,
    pub bytes_staged: usize,
    pub bytes_copied_out: usize,
}

/// Borrowed view of a run shared by both stage implementations.
pub(crate) struct StageContext<'a, B: Backend> {
    pub backend: &'a B,
    pub res: &'a RunResources<B>,
    pub cancel: &'a CancellationToken,
    pub observer: Option<&'a dyn PipelineObserver>,
    pub pending: Option<PendingWrite>,
    pub counters: Counters,
}

impl<'a, B: Backend> StageContext<'a, B> {
    pub fn new(
        backend: &'a B,
        res: &'a RunResources<B>,
        cancel: &'a CancellationToken,
        observer: Option<&'a dyn PipelineObserver>,
    ) -> Self {
        Self {
            backend,
            res,
            cancel,
            observer,
            pending: None,
            counters: Counters::default(),
        }
    }

    pub fn emit(&self, event: PipelineEvent) {
        tracing::trace!(%event, "pipeline event");
        if let Some(observer) = self.observer {
            observer.on_event(&event);
        }
    }

    pub fn issued(&self, k: usize, stage: Stage, chunk: usize, g: Generation) {
        self.emit(PipelineEvent::StageIssued {
            iteration: k,
            stage,
            chunk,
            generation: g,
        });
    }

    /// Drain `role` and record it.
    pub fn sync(&self, k: usize, role: StreamRole) -> Result<()> {
        self.res.streams.sync(self.backend, role)?;
        self.emit(PipelineEvent::StreamSynced { iteration: k, role });
        Ok(())
    }

    /// Claim an idle write slot and enqueue the copy-out of `rows` rows of
    /// reconstruction generation `g` into its landing area.
    pub fn copy_out(&mut self, k: usize, chunk: usize, g: Generation, rows: usize) -> Result<()> {
        let slot = self.res.write_pool.find_idle(self.cancel)?;
        self.emit(PipelineEvent::SlotAcquired { slot, chunk });

        let bytes = self.res.gens.copy_out_async(
            self.backend,
            g,
            &self.res.landing[slot],
            rows,
            self.res.streams.transfer_out(),
        )?;
        self.counters.bytes_copied_out += bytes;
        self.pending = Some(PendingWrite { slot, chunk, rows });
        self.issued(k, Stage::Egest, chunk, g);
        Ok(())
    }

    /// Take the copy-out issued this iteration.
    pub fn take_pending(&mut self, chunk: usize) -> Result<PendingWrite> {
        self.pending
            .take()
            .ok_or_else(|| tomoflow_core::Error::invalid_chunk(chunk, "no copy-out to write"))
    }

    /// Hand `job` to the slot of `pending`.
    pub fn dispatch(&mut self, pending: PendingWrite, job: Job) -> Result<()> {
        self.res.write_pool.dispatch(
            pending.slot,
            JobContext::new(Stage::Egest, pending.chunk),
            job,
        )?;
        self.counters.chunks += 1;
        self.counters.rows_written += pending.rows;
        self.emit(PipelineEvent::WriteDispatched {
            slot: pending.slot,
            chunk: pending.chunk,
        });
        Ok(())
    }

    /// Wait for every write job, surfacing the first failure.
    pub fn finish(&mut self) -> Result<()> {
        self.res.write_pool.join_all()
    }

    /// Quiesce streams and writers after a failure. Errors are only logged.
    pub fn teardown(&mut self) {
        self.pending = None;
        if let Err(err) = self.res.streams.sync_all(self.backend) {
            tracing::warn!(error = %err, "stream error during teardown");
        }
        if let Err(err) = self.res.write_pool.join_all() {
            tracing::warn!(error = %err, "write error during teardown");
        }
    }
}
