//! # tomoflow
//!
//! Out-of-core tomographic reconstruction as a chunk conveyor.
//!
//! A volume too large for device memory is cut into horizontal slabs that
//! flow disk → host → device → compute → device → host → disk. Every stage
//! overlaps with the others: while chunk `k` is uploaded, chunk `k-1` is
//! reconstructed and chunk `k-2` is copied back and written, all on two
//! reusable buffer generations.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tomoflow::{PipelineScheduler, ReconConfig, SourceReader};
//! use tomoflow_device::{FourierRec, HostBackend, ReconGeometry};
//!
//! let config = Arc::new(
//!     ReconConfig::builder()
//!         .projections(1500, 10, 10)
//!         .geometry(2048, 2048)
//!         .rows(2048, 16)
//!         .build()?,
//! );
//! let backend = HostBackend::new();
//! let stage = FourierRec::new(&backend, ReconGeometry::from_config(&config), angles, kernel)?;
//! let reader = SourceReader::new(Arc::new(source), Arc::clone(&config));
//!
//! let mut scheduler = PipelineScheduler::new(backend, config, stage, Arc::new(writer))?;
//! let report = scheduler.run(&reader)?;
//! println!("{} rows in {:?}", report.rows_written, report.elapsed);
//! ```
//!
//! ## Crates
//!
//! | Crate | Contents |
//! |-------|----------|
//! | `tomoflow-core` | configuration, errors, work queue, worker pool |
//! | `tomoflow-device` | backends, streams, buffer generations, kernel boundary |
//! | `tomoflow` | conveyor, schedulers, reader/writer contracts |
//!
//! ## Feature Flags
//!
//! - `cuda` - CUDA backend through `cudarc`
//! - `testing` - host-side test doubles in [`testing`]

pub mod io;
pub mod pipeline;

// Available when `testing` feature is enabled or during tests
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use io::{split_range, ChunkReader, ChunkWriter, ProjectionSource, SourceReader};
pub use pipeline::{
    ConveyorProgress, ConveyorStages, EventLog, Firing, PipelineEvent, PipelineObserver,
    PipelineScheduler, RunReport,
};

pub use tomoflow_core::{
    CancellationToken, ChunkItem, Error, Precision, ReconConfig, Result, SampleType, Stage,
    TryCenterPlan,
};
