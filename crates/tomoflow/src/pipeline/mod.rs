//! Chunk conveyor schedulers.
//!
//! The conveyor rule lives in [`conveyor`]; [`PipelineScheduler`] applies it
//! to a full volume and, through `run_try_center`, to the try-center mode.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────────────────┐
//! │ ingest     │──►│ bounded      │──►│ scheduler thread             │
//! │ thread     │   │ queue (32)   │   │  stage ─► transfer-in stream │
//! │ (reader +  │   └──────────────┘   │  compute stream              │
//! │ read pool) │                      │  transfer-out ─► write pool  │
//! └────────────┘                      └──────────────────────────────┘
//! ```

mod context;
pub mod conveyor;
pub mod events;
pub mod progress;
pub mod scheduler;
mod try_center;

pub use conveyor::{ConveyorStages, Firing};
pub use events::{EventLog, PipelineEvent, PipelineObserver};
pub use progress::ConveyorProgress;
pub use scheduler::{PipelineScheduler, RunReport};
