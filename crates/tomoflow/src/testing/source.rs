//! Synthetic readers.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use half::f16;
use parking_lot::Mutex;
use tomoflow_core::{
    CancellationToken, ChunkItem, Error, Result, SampleType, WorkSender, WorkerPool,
};

use crate::io::{ChunkReader, ProjectionSource};

/// Encode `value` as one raw sample.
pub fn encode_sample(value: f32, sample_type: SampleType) -> Vec<u8> {
    match sample_type {
        SampleType::U8 => vec![value as u8],
        SampleType::U16 => (value as u16).to_ne_bytes().to_vec(),
        SampleType::F16 => f16::from_f32(value).to_ne_bytes().to_vec(),
        SampleType::F32 => value.to_ne_bytes().to_vec(),
    }
}

/// Projection source whose samples tag their detector row.
///
/// Every projection sample of row `r` is `r + 1`; dark and flat fields are
/// constants. Reads can be slowed down or made to fail on a given row.
#[derive(Debug)]
pub struct InMemorySource {
    width: usize,
    n_dark: usize,
    n_flat: usize,
    sample_type: SampleType,
    dark_value: f32,
    flat_value: f32,
    fail_at_row: Option<usize>,
    delay: Option<Duration>,
    reads: AtomicUsize,
}

impl InMemorySource {
    /// Source with a zero dark field and a unit flat field.
    pub fn new(width: usize, n_dark: usize, n_flat: usize, sample_type: SampleType) -> Self {
        Self {
            width,
            n_dark,
            n_flat,
            sample_type,
            dark_value: 0.0,
            flat_value: 1.0,
            fail_at_row: None,
            delay: None,
            reads: AtomicUsize::new(0),
        }
    }

    /// Source matching the shapes of `config`.
    pub fn for_config(config: &tomoflow_core::ReconConfig) -> Self {
        Self::new(config.width, config.n_dark, config.n_flat, config.sample_type)
    }

    pub fn with_fields(mut self, dark: f32, flat: f32) -> Self {
        self.dark_value = dark;
        self.flat_value = flat;
        self
    }

    /// Fail any projection read that touches `row`.
    pub fn failing_at_row(mut self, row: usize) -> Self {
        self.fail_at_row = Some(row);
        self
    }

    /// Sleep before every projection read.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Projection reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Value of every projection sample of detector row `row`.
    pub fn tag(row: usize) -> f32 {
        (row + 1) as f32
    }

    fn fill(&self, out: &mut [u8], count: usize, rows: &Range<usize>, value: impl Fn(usize) -> f32) {
        let ss = self.sample_type.size();
        let mut chunks = out.chunks_exact_mut(ss);
        for _ in 0..count {
            for row in rows.clone() {
                let sample = encode_sample(value(row), self.sample_type);
                for slot in chunks.by_ref().take(self.width) {
                    slot.copy_from_slice(&sample);
                }
            }
        }
    }

    fn check_len(&self, out: &[u8], count: usize, rows: &Range<usize>) -> Result<()> {
        let wanted = count * rows.len() * self.width * self.sample_type.size();
        if out.len() != wanted {
            return Err(Error::io(format!(
                "output buffer is {} bytes, expected {}",
                out.len(),
                wanted
            )));
        }
        Ok(())
    }
}

impl ProjectionSource for InMemorySource {
    fn read_projections(&self, projs: Range<usize>, rows: Range<usize>, out: &mut [u8]) -> Result<()> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if let Some(row) = self.fail_at_row {
            if rows.contains(&row) {
                return Err(Error::io(format!("injected read failure at row {}", row)));
            }
        }
        self.check_len(out, projs.len(), &rows)?;
        self.fill(out, projs.len(), &rows, Self::tag);
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_darks(&self, rows: Range<usize>, out: &mut [u8]) -> Result<()> {
        self.check_len(out, self.n_dark, &rows)?;
        let value = self.dark_value;
        self.fill(out, self.n_dark, &rows, |_| value);
        Ok(())
    }

    fn read_flats(&self, rows: Range<usize>, out: &mut [u8]) -> Result<()> {
        self.check_len(out, self.n_flat, &rows)?;
        let value = self.flat_value;
        self.fill(out, self.n_flat, &rows, |_| value);
        Ok(())
    }
}

/// Reader that replays a fixed list of items.
#[derive(Debug, Default)]
pub struct VecReader {
    items: Mutex<Vec<ChunkItem>>,
    fail_after: Option<String>,
    single: Option<ChunkItem>,
}

impl VecReader {
    /// Send `items` in the given order.
    pub fn new(items: Vec<ChunkItem>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Self::default()
        }
    }

    /// Fail with an I/O error once every item has been sent.
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.fail_after = Some(message.into());
        self
    }

    /// Item returned by `read_single`.
    pub fn with_single(mut self, item: ChunkItem) -> Self {
        self.single = Some(item);
        self
    }
}

impl ChunkReader for VecReader {
    fn read_into_queue(
        &self,
        queue: &WorkSender<ChunkItem>,
        _pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let items = std::mem::take(&mut *self.items.lock());
        for item in items {
            queue.send(item, cancel)?;
        }
        match &self.fail_after {
            Some(message) => Err(Error::io(message.clone())),
            None => Ok(()),
        }
    }

    fn read_single(
        &self,
        queue: &WorkSender<ChunkItem>,
        slice_id: usize,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let item = self
            .single
            .clone()
            .ok_or_else(|| Error::io(format!("no single item for slice {}", slice_id)))?;
        queue.send(item, cancel)
    }
}
