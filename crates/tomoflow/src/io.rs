//! Reader and writer contracts.
//!
//! A [`ChunkReader`] feeds the ingest queue from its own thread; a
//! [`ChunkWriter`] is called from write-pool jobs. File formats live behind
//! these traits. [`SourceReader`] is a reference reader that assembles chunks
//! from a random-access [`ProjectionSource`], splitting each chunk's
//! projections over the read pool.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use tomoflow_core::{
    CancellationToken, ChunkItem, Error, JobContext, ReconConfig, Result, Stage, WorkSender,
    WorkerPool,
};

/// Produces chunk payloads for the scheduler.
pub trait ChunkReader: Send + Sync {
    /// Send every chunk of the run, in id order. Runs on the ingest thread;
    /// `pool` may be used to parallelize reads.
    fn read_into_queue(
        &self,
        queue: &WorkSender<ChunkItem>,
        pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Send a one-row item holding detector row `slice_id`.
    fn read_single(
        &self,
        queue: &WorkSender<ChunkItem>,
        slice_id: usize,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Consumes reconstructed rows. Called concurrently from write-pool jobs.
pub trait ChunkWriter: Send + Sync + 'static {
    /// Persist rows `row_start..row_end` of the output volume.
    ///
    /// `rows` holds `row_end - row_start` reconstructed slices.
    /// `global_row_offset` is the configured first detector row.
    fn write_chunk(
        &self,
        rows: &[u8],
        row_start: usize,
        row_end: usize,
        chunk_id: usize,
        global_row_offset: usize,
    ) -> Result<()>;

    /// Persist one try-center slice reconstructed with rotation `center`.
    fn write_try_result(&self, slice: &[u8], center: f32, slice_id: usize) -> Result<()>;
}

/// Random-access raw projection storage.
///
/// Row ranges are in reconstruction coordinates (already binned). Buffers
/// are row-major raw samples.
pub trait ProjectionSource: Send + Sync + 'static {
    /// Read projections `projs` of detector rows `rows` as `(projs, rows, width)`.
    fn read_projections(&self, projs: Range<usize>, rows: Range<usize>, out: &mut [u8])
        -> Result<()>;

    /// Read every dark field of `rows` as `(n_dark, rows, width)`.
    fn read_darks(&self, rows: Range<usize>, out: &mut [u8]) -> Result<()>;

    /// Read every flat field of `rows` as `(n_flat, rows, width)`.
    fn read_flats(&self, rows: Range<usize>, out: &mut [u8]) -> Result<()>;
}

/// Split `0..total` into at most `parts` contiguous non-empty ranges.
pub fn split_range(total: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.clamp(1, total.max(1));
    let base = total / parts;
    let extra = total % parts;
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .filter(|r| !r.is_empty())
        .collect()
}

/// Reader that assembles chunks from a [`ProjectionSource`].
pub struct SourceReader<S: ProjectionSource> {
    source: Arc<S>,
    config: Arc<ReconConfig>,
}

impl<S: ProjectionSource> SourceReader<S> {
    /// Create a reader for the chunks described by `config`.
    pub fn new(source: Arc<S>, config: Arc<ReconConfig>) -> Self {
        Self { source, config }
    }

    /// Read detector `rows` into a chunk item, projections in parallel on `pool`.
    fn read_rows(
        &self,
        id: usize,
        rows: Range<usize>,
        pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> Result<ChunkItem> {
        let valid_rows = rows.len();
        let slab_bytes = valid_rows * self.config.input_row_bytes();
        let pieces = split_range(self.config.n_proj, pool.size());
        let results: Arc<Mutex<Vec<Option<Vec<u8>>>>> =
            Arc::new(Mutex::new(vec![None; pieces.len()]));

        for (index, projs) in pieces.iter().cloned().enumerate() {
            let source = Arc::clone(&self.source);
            let results = Arc::clone(&results);
            let rows = rows.clone();
            pool.execute(
                JobContext::new(Stage::Ingest, id),
                Box::new(move || {
                    let mut buf = vec![0u8; projs.len() * slab_bytes];
                    source.read_projections(projs, rows, &mut buf)?;
                    results.lock()[index] = Some(buf);
                    Ok(())
                }),
                cancel,
            )?;
        }

        let mut dark = vec![0u8; self.config.n_dark * slab_bytes];
        let mut flat = vec![0u8; self.config.n_flat * slab_bytes];
        self.source.read_darks(rows.clone(), &mut dark)?;
        self.source.read_flats(rows, &mut flat)?;
        pool.join_all()?;

        let mut data = Vec::with_capacity(self.config.n_proj * slab_bytes);
        for piece in results.lock().iter_mut() {
            let piece = piece
                .take()
                .ok_or_else(|| Error::invalid_chunk(id, "projection piece missing"))?;
            data.extend_from_slice(&piece);
        }

        Ok(ChunkItem {
            id,
            valid_rows,
            data,
            dark,
            flat,
        })
    }
}

impl<S: ProjectionSource> ChunkReader for SourceReader<S> {
    fn read_into_queue(
        &self,
        queue: &WorkSender<ChunkItem>,
        pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for id in 0..self.config.total_chunks() {
            cancel.check()?;
            let rows = self.config.output_rows(id);
            let item = self
                .read_rows(id, rows, pool, cancel)
                .map_err(|e| e.in_stage(Stage::Ingest, id))?;
            tracing::trace!(chunk = id, bytes = item.payload_bytes(), "chunk read");
            queue.send(item, cancel)?;
        }
        tracing::debug!(chunks = self.config.total_chunks(), "reader finished");
        Ok(())
    }

    fn read_single(
        &self,
        queue: &WorkSender<ChunkItem>,
        slice_id: usize,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let slab_bytes = self.config.input_row_bytes();
        let rows = slice_id..slice_id + 1;
        let mut data = vec![0u8; self.config.n_proj * slab_bytes];
        let mut dark = vec![0u8; self.config.n_dark * slab_bytes];
        let mut flat = vec![0u8; self.config.n_flat * slab_bytes];
        self.source
            .read_projections(0..self.config.n_proj, rows.clone(), &mut data)?;
        self.source.read_darks(rows.clone(), &mut dark)?;
        self.source.read_flats(rows, &mut flat)?;

        let item = ChunkItem {
            id: 0,
            valid_rows: 1,
            data,
            dark,
            flat,
        };
        queue.send(item, cancel)
    }
}
