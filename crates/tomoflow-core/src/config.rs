//! Run configuration.
//!
//! A [`ReconConfig`] is built once, validated, and then shared read-only by
//! every component of a run. Nothing in the conveyor mutates it.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Precision, SampleType};

/// Default capacity of the ingest queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Upper bound for the default pool sizes.
const MAX_DEFAULT_THREADS: usize = 4;

/// Configuration consumed by the schedulers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconConfig {
    /// Number of projection angles.
    pub n_proj: usize,

    /// Number of dark fields.
    #[serde(default = "default_fields")]
    pub n_dark: usize,

    /// Number of flat fields.
    #[serde(default = "default_fields")]
    pub n_flat: usize,

    /// Detector columns.
    pub width: usize,

    /// Edge length of a reconstructed slice.
    pub recon_size: usize,

    /// Chunk capacity in rows (`ncz`). Must be even.
    pub chunk_rows: usize,

    /// Valid rows of every chunk, in chunk-id order.
    pub chunk_valid_rows: Vec<usize>,

    /// Raw sample type of data, dark and flat payloads.
    #[serde(default)]
    pub sample_type: SampleType,

    /// Reconstruction precision.
    #[serde(default)]
    pub precision: Precision,

    /// Read pool size.
    #[serde(default = "default_threads")]
    pub max_read_threads: usize,

    /// Write pool size.
    #[serde(default = "default_threads")]
    pub max_write_threads: usize,

    /// Capacity of the ingest queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// First detector row of the reconstructed region.
    #[serde(default)]
    pub start_row: usize,

    /// Binning exponent (rows are binned by `2^binning`).
    #[serde(default)]
    pub binning: u32,

    /// Draw a progress bar while running.
    #[serde(default)]
    pub show_progress: bool,
}

fn default_fields() -> usize {
    1
}

fn default_threads() -> usize {
    num_cpus::get().clamp(1, MAX_DEFAULT_THREADS)
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Split `total_rows` into chunks of `chunk_rows`, the last one possibly shorter.
pub fn split_rows(total_rows: usize, chunk_rows: usize) -> Vec<usize> {
    if chunk_rows == 0 {
        return Vec::new();
    }
    let full = total_rows / chunk_rows;
    let mut rows = vec![chunk_rows; full];
    if total_rows % chunk_rows != 0 {
        rows.push(total_rows % chunk_rows);
    }
    rows
}

impl ReconConfig {
    /// Start building a configuration.
    pub fn builder() -> ReconConfigBuilder {
        ReconConfigBuilder::default()
    }

    /// Check every invariant the schedulers rely on.
    pub fn validate(&self) -> Result<()> {
        if self.n_proj == 0 {
            return Err(Error::config("n_proj must be positive"));
        }
        if self.n_dark == 0 || self.n_flat == 0 {
            return Err(Error::config("at least one dark and one flat field required"));
        }
        if self.width == 0 || self.recon_size == 0 {
            return Err(Error::config("width and recon_size must be positive"));
        }
        if self.chunk_rows == 0 || self.chunk_rows % 2 != 0 {
            return Err(Error::config(format!(
                "chunk_rows must be a positive even number, got {}",
                self.chunk_rows
            )));
        }
        if self.max_read_threads == 0 || self.max_write_threads == 0 {
            return Err(Error::config("pool sizes must be positive"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be positive"));
        }
        if self.binning >= usize::BITS {
            return Err(Error::config(format!(
                "binning must be below {}, got {}",
                usize::BITS,
                self.binning
            )));
        }
        for (id, &rows) in self.chunk_valid_rows.iter().enumerate() {
            if rows == 0 || rows > self.chunk_rows {
                return Err(Error::config(format!(
                    "chunk {} has {} valid rows, expected 1..={}",
                    id, rows, self.chunk_rows
                )));
            }
        }
        Ok(())
    }

    /// Number of chunks along the stacking axis.
    pub fn total_chunks(&self) -> usize {
        self.chunk_valid_rows.len()
    }

    /// Valid rows of chunk `id`.
    pub fn valid_rows(&self, id: usize) -> Option<usize> {
        self.chunk_valid_rows.get(id).copied()
    }

    /// Total rows over all chunks.
    pub fn total_rows(&self) -> usize {
        self.chunk_valid_rows.iter().sum()
    }

    /// Rows of the reconstructed region covered by chunk `id`, relative to
    /// the first chunk.
    pub fn chunk_rows_range(&self, id: usize) -> Range<usize> {
        let start = id * self.chunk_rows;
        start..start + self.valid_rows(id).unwrap_or(0)
    }

    /// First output row of the volume: `start_row` reduced by binning.
    pub fn row_offset(&self) -> usize {
        self.start_row.checked_shr(self.binning).unwrap_or(0)
    }

    /// Destination rows of chunk `id` in the output volume.
    pub fn output_rows(&self, id: usize) -> Range<usize> {
        let offset = self.row_offset();
        let local = self.chunk_rows_range(id);
        local.start + offset..local.end + offset
    }

    /// Bytes of one detector row of raw samples.
    pub fn input_row_bytes(&self) -> usize {
        self.width * self.sample_type.size()
    }

    /// Bytes of one generation of the data staging buffer.
    pub fn data_generation_bytes(&self) -> usize {
        self.n_proj * self.chunk_rows * self.input_row_bytes()
    }

    /// Bytes of one generation of the dark staging buffer.
    pub fn dark_generation_bytes(&self) -> usize {
        self.n_dark * self.chunk_rows * self.input_row_bytes()
    }

    /// Bytes of one generation of the flat staging buffer.
    pub fn flat_generation_bytes(&self) -> usize {
        self.n_flat * self.chunk_rows * self.input_row_bytes()
    }

    /// Bytes of one reconstructed slice.
    pub fn recon_row_bytes(&self) -> usize {
        self.recon_size * self.recon_size * self.precision.size()
    }

    /// Bytes of one reconstruction buffer (a full chunk of slices).
    pub fn recon_generation_bytes(&self) -> usize {
        self.chunk_rows * self.recon_row_bytes()
    }
}

/// Builder for [`ReconConfig`].
#[derive(Debug, Clone)]
pub struct ReconConfigBuilder {
    config: ReconConfig,
}

impl Default for ReconConfigBuilder {
    fn default() -> Self {
        Self {
            config: ReconConfig {
                n_proj: 0,
                n_dark: default_fields(),
                n_flat: default_fields(),
                width: 0,
                recon_size: 0,
                chunk_rows: 0,
                chunk_valid_rows: Vec::new(),
                sample_type: SampleType::default(),
                precision: Precision::default(),
                max_read_threads: default_threads(),
                max_write_threads: default_threads(),
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
                start_row: 0,
                binning: 0,
                show_progress: false,
            },
        }
    }
}

impl ReconConfigBuilder {
    /// Set projection, dark and flat counts.
    pub fn projections(mut self, n_proj: usize, n_dark: usize, n_flat: usize) -> Self {
        self.config.n_proj = n_proj;
        self.config.n_dark = n_dark;
        self.config.n_flat = n_flat;
        self
    }

    /// Set detector width and reconstructed slice size.
    pub fn geometry(mut self, width: usize, recon_size: usize) -> Self {
        self.config.width = width;
        self.config.recon_size = recon_size;
        self
    }

    /// Split `total_rows` into chunks of `chunk_rows`.
    pub fn rows(mut self, total_rows: usize, chunk_rows: usize) -> Self {
        self.config.chunk_rows = chunk_rows;
        self.config.chunk_valid_rows = split_rows(total_rows, chunk_rows);
        self
    }

    /// Set chunk capacity and explicit per-chunk valid rows.
    pub fn chunks(mut self, chunk_rows: usize, valid_rows: Vec<usize>) -> Self {
        self.config.chunk_rows = chunk_rows;
        self.config.chunk_valid_rows = valid_rows;
        self
    }

    /// Set the raw sample type.
    pub fn sample_type(mut self, sample_type: SampleType) -> Self {
        self.config.sample_type = sample_type;
        self
    }

    /// Set the reconstruction precision.
    pub fn precision(mut self, precision: Precision) -> Self {
        self.config.precision = precision;
        self
    }

    /// Set read and write pool sizes.
    pub fn threads(mut self, read: usize, write: usize) -> Self {
        self.config.max_read_threads = read;
        self.config.max_write_threads = write;
        self
    }

    /// Set the ingest queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set row offset and binning used for output addressing.
    pub fn addressing(mut self, start_row: usize, binning: u32) -> Self {
        self.config.start_row = start_row;
        self.config.binning = binning;
        self
    }

    /// Enable or disable the progress bar.
    pub fn show_progress(mut self, show: bool) -> Self {
        self.config.show_progress = show;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<ReconConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Candidate centers for the try-center mode.
///
/// `shifts[i]` is handed to the kernel for reconstruction row `i`, and
/// `centers[i]` is the value reported to the writer for that row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryCenterPlan {
    /// Slices to reconstruct, one conveyor run each.
    pub slice_ids: Vec<usize>,
    /// Horizontal shift per candidate.
    pub shifts: Vec<f32>,
    /// Center value per candidate.
    pub centers: Vec<f32>,
}

impl TryCenterPlan {
    /// Create a plan; `shifts` and `centers` must have equal length.
    pub fn new(slice_ids: Vec<usize>, shifts: Vec<f32>, centers: Vec<f32>) -> Result<Self> {
        let plan = Self {
            slice_ids,
            shifts,
            centers,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Check that every shift has a center.
    pub fn validate(&self) -> Result<()> {
        if self.shifts.len() != self.centers.len() {
            return Err(Error::config(format!(
                "{} shifts but {} centers",
                self.shifts.len(),
                self.centers.len()
            )));
        }
        Ok(())
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.shifts.len()
    }

    /// True if there are no candidates.
    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty()
    }

    /// Valid rows of every candidate chunk.
    pub fn chunk_valid_rows(&self, chunk_rows: usize) -> Vec<usize> {
        split_rows(self.len(), chunk_rows)
    }

    /// Shifts of chunk `chunk`, zero-padded to `chunk_rows`.
    pub fn padded_shifts(&self, chunk: usize, chunk_rows: usize) -> Vec<f32> {
        let start = (chunk * chunk_rows).min(self.len());
        let end = (start + chunk_rows).min(self.len());
        let mut shifts = self.shifts[start..end].to_vec();
        shifts.resize(chunk_rows, 0.0);
        shifts
    }

    /// Center reported for row `row` of chunk `chunk`.
    pub fn center(&self, chunk: usize, row: usize, chunk_rows: usize) -> Option<f32> {
        self.centers.get(chunk * chunk_rows + row).copied()
    }
}
