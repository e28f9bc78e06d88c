//! Test doubles for the conveyor.
//!
//! Everything here runs on [`HostBackend`](tomoflow_device::HostBackend):
//! - [`MockKernel`] - tags each output slice with its sinogram row
//! - [`InMemorySource`] - projection source whose samples encode their row
//! - [`VecReader`] - replays a scripted list of chunk items
//! - [`MemorySink`] - keeps the written volume and try results in memory
//! - [`DarkFlatCorrector`] - flat-field normalization hook
//! - [`check_happens_before`] - ordering checks over an [`EventLog`](crate::pipeline::EventLog)
//!
//! # Feature Gate
//!
//! Available when the `testing` feature is enabled, or when running tests.
//!
//! # Example
//!
//! ```ignore
//! use tomoflow::testing::{mock_stage, InMemorySource, MemorySink};
//!
//! let backend = HostBackend::new();
//! let stage = mock_stage(&backend, &config)?;
//! let reader = SourceReader::new(Arc::new(InMemorySource::for_config(&config)), config.clone());
//! let sink = Arc::new(MemorySink::for_config(&config));
//! PipelineScheduler::new(backend, config, stage, sink.clone())?.run(&reader)?;
//! assert_eq!(sink.row_values(0).unwrap()[0], InMemorySource::tag(0));
//! ```

pub mod correct;
pub mod kernel;
pub mod sink;
pub mod source;
pub mod trace;

use std::f32::consts::PI;

use tomoflow_core::{ReconConfig, Result};
use tomoflow_device::{FourierRec, HostBackend, ReconGeometry};

pub use correct::DarkFlatCorrector;
pub use kernel::MockKernel;
pub use sink::{MemorySink, TryRecord, WriteRecord};
pub use source::{encode_sample, InMemorySource, VecReader};
pub use trace::check_happens_before;

/// Fourier stage around a [`MockKernel`] on the host backend.
pub type MockStage = FourierRec<HostBackend, MockKernel>;

/// `n` angles evenly spaced over half a turn.
pub fn angles(n: usize) -> Vec<f32> {
    (0..n).map(|i| i as f32 * PI / n as f32).collect()
}

/// Build a [`MockStage`] for `config`.
pub fn mock_stage(backend: &HostBackend, config: &ReconConfig) -> Result<MockStage> {
    mock_stage_with(backend, config, MockKernel::new())
}

/// Build a [`MockStage`] around `kernel`.
pub fn mock_stage_with(
    backend: &HostBackend,
    config: &ReconConfig,
    kernel: MockKernel,
) -> Result<MockStage> {
    FourierRec::new(
        backend,
        ReconGeometry::from_config(config),
        angles(config.n_proj),
        kernel,
    )
}
