//! Double-buffered staging and reconstruction buffers.
//!
//! ```text
//!              generation 0            generation 1
//!  data   [pinned] → [device]      [pinned] → [device]
//!  dark   [pinned] → [device]      [pinned] → [device]
//!  flat   [pinned] → [device]      [pinned] → [device]
//!  recon             [device]                [device]
//! ```
//!
//! Chunk `i` always uses generation `i % 2`. Nothing here locks a
//! generation: exclusive use is guaranteed by the two-iteration lag between
//! stages and by stream synchronization in the scheduler.

use std::fmt;

use tomoflow_core::{ChunkItem, Generation, ReconConfig};

use crate::backend::{Backend, HostMemory};
use crate::error::{DeviceError, Result};

/// Named generation arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    /// Projections, `(n_proj, chunk_rows, width)`.
    Data,
    /// Dark fields, `(n_dark, chunk_rows, width)`.
    Dark,
    /// Flat fields, `(n_flat, chunk_rows, width)`.
    Flat,
    /// Reconstructed slices, `(chunk_rows, n, n)`. Device only.
    Recon,
}

impl ArrayKind {
    /// Arrays that are staged from the host.
    pub const INPUTS: [ArrayKind; 3] = [ArrayKind::Data, ArrayKind::Dark, ArrayKind::Flat];

    /// Get array name as string.
    pub fn name(self) -> &'static str {
        match self {
            ArrayKind::Data => "data",
            ArrayKind::Dark => "dark",
            ArrayKind::Flat => "flat",
            ArrayKind::Recon => "recon",
        }
    }

    fn input_index(self) -> Option<usize> {
        match self {
            ArrayKind::Data => Some(0),
            ArrayKind::Dark => Some(1),
            ArrayKind::Flat => Some(2),
            ArrayKind::Recon => None,
        }
    }
}

impl fmt::Display for ArrayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Device-side input arrays of one generation.
pub struct InputBuffers<'a, B: Backend> {
    pub data: &'a B::DeviceBuffer,
    pub dark: &'a B::DeviceBuffer,
    pub flat: &'a B::DeviceBuffer,
}

impl<B: Backend> Clone for InputBuffers<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend> Copy for InputBuffers<'_, B> {}

/// Copy the `valid_rows` rows of each of `count` leading slabs from a packed
/// payload into the first rows of a `(count, chunk_rows, ·)` buffer.
///
/// Rows `valid_rows..chunk_rows` of `dst` are left untouched.
pub fn stage_rows(
    dst: &mut [u8],
    src: &[u8],
    count: usize,
    valid_rows: usize,
    chunk_rows: usize,
    row_bytes: usize,
) -> Result<()> {
    if valid_rows > chunk_rows {
        return Err(DeviceError::SizeMismatch {
            expected: chunk_rows,
            actual: valid_rows,
        });
    }
    let run = valid_rows * row_bytes;
    if src.len() != count * run {
        return Err(DeviceError::SizeMismatch {
            expected: count * run,
            actual: src.len(),
        });
    }
    DeviceError::check_fits(dst.len(), count * chunk_rows * row_bytes)?;

    for slab in 0..count {
        let to = slab * chunk_rows * row_bytes;
        dst[to..to + run].copy_from_slice(&src[slab * run..(slab + 1) * run]);
    }
    Ok(())
}

/// Repeat the single row of each of `count` slabs over all `chunk_rows` rows.
pub fn tile_rows(
    dst: &mut [u8],
    src: &[u8],
    count: usize,
    chunk_rows: usize,
    row_bytes: usize,
) -> Result<()> {
    if src.len() != count * row_bytes {
        return Err(DeviceError::SizeMismatch {
            expected: count * row_bytes,
            actual: src.len(),
        });
    }
    DeviceError::check_fits(dst.len(), count * chunk_rows * row_bytes)?;

    for slab in 0..count {
        let row = &src[slab * row_bytes..(slab + 1) * row_bytes];
        for r in 0..chunk_rows {
            let to = (slab * chunk_rows + r) * row_bytes;
            dst[to..to + row_bytes].copy_from_slice(row);
        }
    }
    Ok(())
}

struct InputArray<B: Backend> {
    kind: ArrayKind,
    count: usize,
    bytes: usize,
    host: [B::HostBuffer; 2],
    device: [B::DeviceBuffer; 2],
}

impl<B: Backend> InputArray<B> {
    fn new(backend: &B, kind: ArrayKind, count: usize, bytes: usize) -> Result<Self> {
        Ok(Self {
            kind,
            count,
            bytes,
            host: [backend.alloc_pinned(bytes)?, backend.alloc_pinned(bytes)?],
            device: [backend.alloc_device(bytes)?, backend.alloc_device(bytes)?],
        })
    }

    /// Bytes from the start of the array up to the end of the last slab's
    /// valid rows.
    fn valid_prefix(&self, valid_rows: usize, chunk_rows: usize, row_bytes: usize) -> usize {
        let rows = self.count.saturating_sub(1) * chunk_rows + valid_rows.min(chunk_rows);
        (rows * row_bytes).min(self.bytes)
    }
}

/// Pinned and device buffers for both generations of every array.
pub struct BufferGenerations<B: Backend> {
    chunk_rows: usize,
    row_bytes: usize,
    recon_row_bytes: usize,
    inputs: [InputArray<B>; 3],
    recon: [B::DeviceBuffer; 2],
}

impl<B: Backend> BufferGenerations<B> {
    /// Allocate buffers sized for a full chunk of `config`.
    pub fn new(backend: &B, config: &ReconConfig) -> Result<Self> {
        let recon_bytes = config.recon_generation_bytes();
        let generations = Self {
            chunk_rows: config.chunk_rows,
            row_bytes: config.input_row_bytes(),
            recon_row_bytes: config.recon_row_bytes(),
            inputs: [
                InputArray::new(backend, ArrayKind::Data, config.n_proj, config.data_generation_bytes())?,
                InputArray::new(backend, ArrayKind::Dark, config.n_dark, config.dark_generation_bytes())?,
                InputArray::new(backend, ArrayKind::Flat, config.n_flat, config.flat_generation_bytes())?,
            ],
            recon: [backend.alloc_device(recon_bytes)?, backend.alloc_device(recon_bytes)?],
        };

        tracing::debug!(
            backend = backend.name(),
            pinned_bytes = generations.pinned_bytes(),
            device_bytes = generations.device_bytes(),
            "allocated buffer generations"
        );
        Ok(generations)
    }

    fn input(&self, kind: ArrayKind) -> Option<&InputArray<B>> {
        kind.input_index().map(|i| &self.inputs[i])
    }

    /// Pinned host buffer of `kind` in generation `g`. `None` for `Recon`.
    pub fn host_gen(&self, kind: ArrayKind, g: Generation) -> Option<&B::HostBuffer> {
        self.input(kind).map(|array| &array.host[g.index()])
    }

    /// Device buffer of `kind` in generation `g`.
    pub fn device_gen(&self, kind: ArrayKind, g: Generation) -> &B::DeviceBuffer {
        match self.input(kind) {
            Some(array) => &array.device[g.index()],
            None => &self.recon[g.index()],
        }
    }

    /// Device input arrays of generation `g`.
    pub fn inputs(&self, g: Generation) -> InputBuffers<'_, B> {
        InputBuffers {
            data: &self.inputs[0].device[g.index()],
            dark: &self.inputs[1].device[g.index()],
            flat: &self.inputs[2].device[g.index()],
        }
    }

    /// Reconstruction buffer of generation `g`.
    pub fn recon(&self, g: Generation) -> &B::DeviceBuffer {
        &self.recon[g.index()]
    }

    /// Copy the valid rows of `item` into pinned generation `g`.
    ///
    /// Returns the number of payload bytes staged.
    pub fn stage(&self, g: Generation, item: &ChunkItem) -> Result<usize> {
        let payloads = [&item.data, &item.dark, &item.flat];
        for (array, payload) in self.inputs.iter().zip(payloads) {
            array.host[g.index()].with_bytes_mut(|dst| {
                stage_rows(
                    dst,
                    payload,
                    array.count,
                    item.valid_rows,
                    self.chunk_rows,
                    self.row_bytes,
                )
            })?;
        }
        Ok(item.payload_bytes())
    }

    /// Tile the single row of `item` over every row of pinned generation `g`.
    pub fn tile(&self, g: Generation, item: &ChunkItem) -> Result<usize> {
        let payloads = [&item.data, &item.dark, &item.flat];
        for (array, payload) in self.inputs.iter().zip(payloads) {
            array.host[g.index()].with_bytes_mut(|dst| {
                tile_rows(dst, payload, array.count, self.chunk_rows, self.row_bytes)
            })?;
        }
        Ok(item.payload_bytes())
    }

    /// Enqueue host-to-device copies of every input array of generation `g`.
    ///
    /// Each copy stops after the `valid_rows` rows of the last slab; rows past
    /// that keep whatever the device buffer held. Returns the bytes enqueued.
    pub fn copy_in_async(
        &self,
        backend: &B,
        g: Generation,
        valid_rows: usize,
        stream: &B::Stream,
    ) -> Result<usize> {
        let mut total = 0;
        for array in &self.inputs {
            let bytes = array.valid_prefix(valid_rows, self.chunk_rows, self.row_bytes);
            backend.copy_in_async(&array.device[g.index()], &array.host[g.index()], bytes, stream)?;
            total += bytes;
        }
        tracing::trace!(generation = %g, bytes = total, "copy-in enqueued");
        Ok(total)
    }

    /// Enqueue a device-to-host copy of the first `rows` reconstructed slices
    /// of generation `g` into `landing`.
    pub fn copy_out_async(
        &self,
        backend: &B,
        g: Generation,
        landing: &B::HostBuffer,
        rows: usize,
        stream: &B::Stream,
    ) -> Result<usize> {
        let bytes = rows * self.recon_row_bytes;
        DeviceError::check_fits(landing.len(), bytes)?;
        backend.copy_out_async(landing, &self.recon[g.index()], bytes, stream)?;
        tracing::trace!(generation = %g, bytes, "copy-out enqueued");
        Ok(bytes)
    }

    /// Bytes of one reconstructed slice.
    pub fn recon_row_bytes(&self) -> usize {
        self.recon_row_bytes
    }

    /// Total pinned host memory held.
    pub fn pinned_bytes(&self) -> usize {
        self.inputs.iter().map(|a| 2 * a.bytes).sum()
    }

    /// Total device memory held.
    pub fn device_bytes(&self) -> usize {
        self.pinned_bytes() + 2 * self.recon_row_bytes * self.chunk_rows
    }

    /// Names and per-generation sizes of the input arrays.
    pub fn input_sizes(&self) -> impl Iterator<Item = (ArrayKind, usize)> + '_ {
        self.inputs.iter().map(|a| (a.kind, a.bytes))
    }
}
