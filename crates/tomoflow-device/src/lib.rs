//! Device side of the tomoflow chunk conveyor.
//!
//! Provides the buffers, streams and copies the scheduler drives, behind a
//! [`Backend`] trait so the same conveyor runs on a GPU or on the
//! host-emulated device used by the test-suite.
//!
//! # Architecture
//!
//! ```text
//!   pinned gen k%2 ──copy-in──► device gen k%2        (transfer-in stream)
//!   device gen (k-1)%2 ──correct/reconstruct──► recon (compute stream)
//!   recon (k-2)%2 ──copy-out──► landing buffer        (transfer-out stream)
//! ```
//!
//! # Key Features
//!
//! - **Two generations**: every array is double-buffered and indexed by chunk parity
//! - **Three streams**: in-order queues that run concurrently with each other
//! - **Typed kernel boundary**: buffer descriptors and opaque stream handles
//! - **Host backend**: thread-per-stream emulation with optional jitter
//!
//! # Example
//!
//! ```ignore
//! use tomoflow_device::{BufferGenerations, HostBackend, StreamSet};
//!
//! let backend = HostBackend::new();
//! let streams = StreamSet::new(&backend)?;
//! let generations = BufferGenerations::new(&backend, &config)?;
//! generations.stage(Generation::of(0), &item)?;
//! generations.copy_in_async(&backend, Generation::of(0), item.valid_rows, streams.transfer_in())?;
//! streams.sync_all(&backend)?;
//! ```

pub mod backend;
pub mod compute;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod error;
pub mod generations;
pub mod host;
pub mod layout;
pub mod stream;

pub use backend::{
    Backend, BufferDescriptor, DeviceMemory, HostMemory, LayoutOp, StreamHandle, StreamRole,
};
pub use compute::{
    CastCorrector, ComputeStage, Corrector, FourierRec, KernelArgs, ReconGeometry,
    ReconstructionKernel,
};
#[cfg(feature = "cuda")]
pub use cuda::{CudaBackend, CudaBuffer};
pub use error::{DeviceError, Result};
pub use generations::{stage_rows, tile_rows, ArrayKind, BufferGenerations, InputBuffers};
pub use host::{HostBackend, HostStream, SharedBytes, StreamOp};
pub use stream::StreamSet;
