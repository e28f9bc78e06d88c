//! Device abstraction.
//!
//! The conveyor only talks to a device through [`Backend`]: pinned host
//! buffers, device buffers, in-order execution streams and asynchronous
//! copies. Every `*_async` method enqueues and returns; completion is observed
//! only through [`Backend::synchronize`].

use std::fmt;

use tomoflow_core::{Precision, SampleType};

use crate::error::Result;

/// The three execution streams of the conveyor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    /// Host-to-device copies of the next chunk.
    TransferIn,
    /// Correction and reconstruction.
    Compute,
    /// Device-to-host copies of finished chunks.
    TransferOut,
}

impl StreamRole {
    /// All roles in creation order.
    pub const ALL: [StreamRole; 3] = [
        StreamRole::TransferIn,
        StreamRole::Compute,
        StreamRole::TransferOut,
    ];

    /// Get role name as string.
    pub fn name(self) -> &'static str {
        match self {
            StreamRole::TransferIn => "transfer-in",
            StreamRole::Compute => "compute",
            StreamRole::TransferOut => "transfer-out",
        }
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque stream identity handed to external kernels.
///
/// `raw` is the driver stream pointer on CUDA and a stream counter on the
/// host backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    pub role: StreamRole,
    pub raw: u64,
}

/// Typed view of a device buffer for kernels that need raw addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Device address of element 0.
    pub base: u64,
    /// Number of elements.
    pub elements: usize,
    /// Elements between consecutive rows.
    pub stride: usize,
    /// Element type.
    pub precision: Precision,
}

impl BufferDescriptor {
    /// Describe `buffer` as rows of `stride` elements of `precision`.
    pub fn of<M: DeviceMemory>(buffer: &M, stride: usize, precision: Precision) -> Self {
        Self {
            base: buffer.base_address(),
            elements: buffer.len() / precision.size(),
            stride,
            precision,
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.elements / self.stride
        }
    }

    /// Size in bytes.
    pub fn bytes(&self) -> usize {
        self.elements * self.precision.size()
    }
}

/// Element moves a backend runs on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutOp {
    /// Channel-major to element-major: `dst[2j + c] = src[c*H + j]`.
    Interleave { element_size: usize },
    /// Element-major to channel-major: `dst[c*H + j] = src[2j + c]`.
    Deinterleave { element_size: usize },
    /// Swap the two outer axes of `(outer, middle, inner)`.
    Transpose01 {
        outer: usize,
        middle: usize,
        inner: usize,
        element_size: usize,
    },
    /// Convert raw samples into reconstruction precision.
    Cast { from: SampleType, to: Precision },
}

/// Pinned host memory shared between the scheduler and stream workers.
pub trait HostMemory: Clone + Send + Sync + 'static {
    /// Size in bytes.
    fn len(&self) -> usize;

    /// Check if the buffer is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` with shared access to the bytes.
    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R;

    /// Run `f` with exclusive access to the bytes.
    fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R;
}

/// Device-resident memory.
pub trait DeviceMemory: Send + Sync + 'static {
    /// Size in bytes.
    fn len(&self) -> usize;

    /// Check if the buffer is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Device address of the first byte.
    fn base_address(&self) -> u64;
}

/// A device with in-order execution streams.
pub trait Backend: Send + Sync + 'static {
    /// In-order execution stream.
    type Stream: Send + Sync;
    /// Pinned host buffer.
    type HostBuffer: HostMemory;
    /// Device buffer.
    type DeviceBuffer: DeviceMemory;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Create a stream.
    fn create_stream(&self, role: StreamRole) -> Result<Self::Stream>;

    /// Block until every operation enqueued on `stream` has finished.
    ///
    /// Reports the first failure of any operation since the last call.
    fn synchronize(&self, stream: &Self::Stream) -> Result<()>;

    /// Allocate zeroed pinned host memory.
    fn alloc_pinned(&self, bytes: usize) -> Result<Self::HostBuffer>;

    /// Allocate zeroed device memory.
    fn alloc_device(&self, bytes: usize) -> Result<Self::DeviceBuffer>;

    /// Enqueue a host-to-device copy of the first `bytes` bytes.
    fn copy_in_async(
        &self,
        dst: &Self::DeviceBuffer,
        src: &Self::HostBuffer,
        bytes: usize,
        stream: &Self::Stream,
    ) -> Result<()>;

    /// Enqueue a device-to-host copy of the first `bytes` bytes.
    fn copy_out_async(
        &self,
        dst: &Self::HostBuffer,
        src: &Self::DeviceBuffer,
        bytes: usize,
        stream: &Self::Stream,
    ) -> Result<()>;

    /// Enqueue a device-to-device copy of the first `bytes` bytes.
    fn copy_device_async(
        &self,
        dst: &Self::DeviceBuffer,
        src: &Self::DeviceBuffer,
        bytes: usize,
        stream: &Self::Stream,
    ) -> Result<()>;

    /// Enqueue a layout transform from `src` into `dst`.
    fn launch_layout(
        &self,
        op: LayoutOp,
        dst: &Self::DeviceBuffer,
        src: &Self::DeviceBuffer,
        stream: &Self::Stream,
    ) -> Result<()>;

    /// Opaque handle of `stream` for external kernels.
    fn raw_stream(&self, stream: &Self::Stream) -> StreamHandle;
}
