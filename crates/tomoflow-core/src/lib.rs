//! # tomoflow core
//!
//! Shared building blocks of the tomoflow chunk conveyor: configuration,
//! chunk and stage types, the error taxonomy, and the two host-side
//! concurrency primitives the scheduler is built on.
//!
//! ## Components
//!
//! - [`ReconConfig`] - Immutable run configuration (builder + validation)
//! - [`WorkerPool`] - Fixed pool of reusable threads with explicit slot assignment
//! - [`work_queue`] - Bounded FIFO handoff with backpressure
//! - [`CancellationToken`] - Cooperative cancellation checked at every blocking wait
//!
//! ## Example
//!
//! ```ignore
//! use tomoflow_core::{ReconConfig, Precision};
//!
//! let config = ReconConfig::builder()
//!     .projections(1500, 10, 10)
//!     .geometry(2048, 2048)
//!     .rows(2048, 16)
//!     .precision(Precision::Float16)
//!     .build()?;
//! assert_eq!(config.total_chunks(), 128);
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod pool;
pub mod queue;
pub mod types;

pub use cancel::{CancellationToken, CANCEL_POLL_INTERVAL};
pub use config::{split_rows, ReconConfig, ReconConfigBuilder, TryCenterPlan, DEFAULT_QUEUE_CAPACITY};
pub use error::{Error, Result};
pub use pool::{Job, JobContext, PoolStats, WorkerPool};
pub use queue::{work_queue, WorkReceiver, WorkSender};
pub use types::{ChunkItem, Generation, Precision, SampleType, Stage, GENERATIONS};
