//! Core type definitions for the chunk conveyor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of reusable buffer generations (double buffering).
pub const GENERATIONS: usize = 2;

/// Pipeline stage a chunk is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Queue pull, pinned staging and host-to-device copy.
    Ingest,
    /// Correction and reconstruction on the compute stream.
    Compute,
    /// Device-to-host copy and the asynchronous write job.
    Egest,
}

impl Stage {
    /// Get stage name as string.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Compute => "compute",
            Stage::Egest => "egest",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which of the two reusable buffer instances a chunk uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u8);

impl Generation {
    /// Generation used by the chunk at pipeline position `position`.
    pub fn of(position: usize) -> Self {
        Generation((position % GENERATIONS) as u8)
    }

    /// Index into a generation array.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Both generations in order.
    pub fn all() -> [Generation; GENERATIONS] {
        [Generation(0), Generation(1)]
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Element type of raw projection samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    /// 8-bit unsigned detector counts.
    U8,
    /// 16-bit unsigned detector counts.
    #[default]
    U16,
    /// Half precision float.
    F16,
    /// Single precision float.
    F32,
}

impl SampleType {
    /// Size of one sample in bytes.
    pub fn size(self) -> usize {
        match self {
            SampleType::U8 => 1,
            SampleType::U16 | SampleType::F16 => 2,
            SampleType::F32 => 4,
        }
    }
}

/// Numeric precision of the reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Precision {
    /// Half precision (`float16`).
    #[serde(rename = "float16")]
    Float16,
    /// Single precision (`float32`).
    #[default]
    #[serde(rename = "float32")]
    Float32,
}

impl Precision {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Precision::Float16 => 2,
            Precision::Float32 => 4,
        }
    }

    /// Get precision name as string.
    pub fn name(self) -> &'static str {
        match self {
            Precision::Float16 => "float16",
            Precision::Float32 => "float32",
        }
    }
}

/// One slab of raw projections handed from the reader to the scheduler.
///
/// Payloads hold only the valid rows: `data` is `(n_proj, valid_rows, width)`,
/// `dark` is `(n_dark, valid_rows, width)` and `flat` is
/// `(n_flat, valid_rows, width)`, row-major, raw sample bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkItem {
    /// Index of the slab along the stacking axis.
    pub id: usize,
    /// Number of rows actually present in this chunk.
    pub valid_rows: usize,
    /// Projection samples.
    pub data: Vec<u8>,
    /// Dark-field samples.
    pub dark: Vec<u8>,
    /// Flat-field samples.
    pub flat: Vec<u8>,
}

impl ChunkItem {
    /// Total payload size in bytes.
    pub fn payload_bytes(&self) -> usize {
        self.data.len() + self.dark.len() + self.flat.len()
    }
}

impl fmt::Debug for ChunkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkItem")
            .field("id", &self.id)
            .field("valid_rows", &self.valid_rows)
            .field("data_bytes", &self.data.len())
            .field("dark_bytes", &self.dark.len())
            .field("flat_bytes", &self.flat.len())
            .finish()
    }
}
