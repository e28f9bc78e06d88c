//! Error types for conveyor operations.

use thiserror::Error;

use crate::types::Stage;

/// Result type alias for conveyor operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Conveyor error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A chunk handed over by the reader does not match the configuration.
    #[error("invalid chunk {chunk}: {reason}")]
    InvalidChunk { chunk: usize, reason: String },

    /// A pipeline stage failed while processing a chunk.
    #[error("{stage} stage failed on chunk {chunk}: {source}")]
    Stage {
        stage: Stage,
        chunk: usize,
        #[source]
        source: Box<Error>,
    },

    /// The run was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The other end of the work queue hung up.
    #[error("work queue closed")]
    QueueClosed,

    /// The queue is at capacity (backpressure, returned by `try_send`).
    #[error("work queue full ({capacity} items)")]
    QueueFull { capacity: usize },

    /// A job was dispatched to a slot that is still running another job.
    #[error("worker slot {slot} is busy")]
    SlotBusy { slot: usize },

    /// A slot index outside the pool.
    #[error("worker slot {slot} out of range for pool of {size}")]
    InvalidSlot { slot: usize, size: usize },

    /// A worker job panicked.
    #[error("worker job panicked: {0}")]
    WorkerPanicked(String),

    /// Device-side failure (allocation, transfer, stream, kernel).
    #[error("device error: {0}")]
    Device(String),

    /// I/O error from a reader or writer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error raised by an external reader/writer implementation.
    #[error("{0}")]
    Source(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::InvalidConfig(message.into())
    }

    /// Create an invalid chunk error.
    pub fn invalid_chunk(chunk: usize, reason: impl Into<String>) -> Self {
        Error::InvalidChunk {
            chunk,
            reason: reason.into(),
        }
    }

    /// Create an I/O error with a custom message.
    pub fn io(message: impl Into<String>) -> Self {
        Error::Io(std::io::Error::other(message.into()))
    }

    /// Create a device error.
    pub fn device(message: impl Into<String>) -> Self {
        Error::Device(message.into())
    }

    /// Attribute this error to a stage and chunk.
    ///
    /// Errors that already carry a stage, and cancellation, pass through
    /// unchanged so the innermost attribution wins.
    pub fn in_stage(self, stage: Stage, chunk: usize) -> Self {
        match self {
            Error::Stage { .. } | Error::Cancelled => self,
            other => Error::Stage {
                stage,
                chunk,
                source: Box::new(other),
            },
        }
    }

    /// Stage and chunk this error is attributed to, if any.
    pub fn stage(&self) -> Option<(Stage, usize)> {
        match self {
            Error::Stage { stage, chunk, .. } => Some((*stage, *chunk)),
            _ => None,
        }
    }

    /// True if the run stopped because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Get error category for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "invalid_config",
            Error::InvalidChunk { .. } => "invalid_chunk",
            Error::Stage { source, .. } => source.category(),
            Error::Cancelled => "cancelled",
            Error::QueueClosed => "queue_closed",
            Error::QueueFull { .. } => "queue_full",
            Error::SlotBusy { .. } => "slot_busy",
            Error::InvalidSlot { .. } => "invalid_slot",
            Error::WorkerPanicked(_) => "worker_panicked",
            Error::Device(_) => "device_error",
            Error::Io(_) => "io_error",
            Error::Source(_) => "source_error",
        }
    }
}
