//! In-memory writer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tomoflow_core::{Error, Precision, Result};
use tomoflow_device::layout::read_element;

use crate::io::ChunkWriter;

/// One `write_chunk` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub chunk_id: usize,
    pub row_start: usize,
    pub row_end: usize,
    pub global_row_offset: usize,
}

/// One `write_try_result` call.
#[derive(Debug, Clone, PartialEq)]
pub struct TryRecord {
    pub slice_id: usize,
    pub center: f32,
    pub data: Vec<u8>,
}

/// Writer that keeps the output volume in memory, row by row.
///
/// Tracks how many writes run at once so tests can check the pool bound.
#[derive(Debug)]
pub struct MemorySink {
    row_bytes: usize,
    precision: Precision,
    rows: Mutex<BTreeMap<usize, Vec<u8>>>,
    writes: Mutex<Vec<WriteRecord>>,
    tries: Mutex<Vec<TryRecord>>,
    overwrites: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fail_on_chunk: Option<usize>,
    delay: Option<Duration>,
}

impl MemorySink {
    /// Sink for slices of `row_bytes` bytes in `precision`.
    pub fn new(row_bytes: usize, precision: Precision) -> Self {
        Self {
            row_bytes,
            precision,
            rows: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
            tries: Mutex::new(Vec::new()),
            overwrites: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            fail_on_chunk: None,
            delay: None,
        }
    }

    /// Sink matching the output slices of `config`.
    pub fn for_config(config: &tomoflow_core::ReconConfig) -> Self {
        Self::new(config.recon_row_bytes(), config.precision)
    }

    /// Fail the write of chunk `id`.
    pub fn failing_on_chunk(mut self, id: usize) -> Self {
        self.fail_on_chunk = Some(id);
        self
    }

    /// Sleep inside every write.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Bytes of output row `row`, if written.
    pub fn row(&self, row: usize) -> Option<Vec<u8>> {
        self.rows.lock().get(&row).cloned()
    }

    /// Output row `row` decoded as floats.
    pub fn row_values(&self, row: usize) -> Option<Vec<f32>> {
        let es = self.precision.size();
        self.row(row)
            .map(|bytes| bytes.chunks_exact(es).map(|b| read_element(b, self.precision)).collect())
    }

    /// Indices of every written row, ascending.
    pub fn written_rows(&self) -> Vec<usize> {
        self.rows.lock().keys().copied().collect()
    }

    /// Every `write_chunk` call, in completion order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    /// Every `write_try_result` call, in completion order.
    pub fn try_results(&self) -> Vec<TryRecord> {
        self.tries.lock().clone()
    }

    /// Rows written more than once.
    pub fn overwrites(&self) -> usize {
        self.overwrites.load(Ordering::SeqCst)
    }

    /// Most writes observed in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn store(&self, rows: &[u8], row_start: usize, row_end: usize, chunk_id: usize) -> Result<()> {
        if self.fail_on_chunk == Some(chunk_id) {
            return Err(Error::io(format!("injected write failure on chunk {}", chunk_id)));
        }
        let count = row_end.saturating_sub(row_start);
        if rows.len() != count * self.row_bytes {
            return Err(Error::invalid_chunk(
                chunk_id,
                format!("{} bytes for {} rows", rows.len(), count),
            ));
        }
        let mut volume = self.rows.lock();
        for (offset, slice) in rows.chunks_exact(self.row_bytes).enumerate() {
            if volume.insert(row_start + offset, slice.to_vec()).is_some() {
                self.overwrites.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

impl ChunkWriter for MemorySink {
    fn write_chunk(
        &self,
        rows: &[u8],
        row_start: usize,
        row_end: usize,
        chunk_id: usize,
        global_row_offset: usize,
    ) -> Result<()> {
        self.enter();
        let outcome = self.store(rows, row_start, row_end, chunk_id);
        if outcome.is_ok() {
            self.writes.lock().push(WriteRecord {
                chunk_id,
                row_start,
                row_end,
                global_row_offset,
            });
        }
        self.leave();
        outcome
    }

    fn write_try_result(&self, slice: &[u8], center: f32, slice_id: usize) -> Result<()> {
        self.enter();
        self.tries.lock().push(TryRecord {
            slice_id,
            center,
            data: slice.to_vec(),
        });
        self.leave();
        Ok(())
    }
}
