//! Error types for device-side operations.

use thiserror::Error;

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors raised by a [`Backend`](crate::Backend) or a layout transform.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// CUDA driver error.
    #[cfg(feature = "cuda")]
    #[error("CUDA driver error: {0}")]
    Driver(#[from] cudarc::driver::DriverError),

    /// Memory allocation failed.
    #[error("device memory allocation failed: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Buffer size mismatch.
    #[error("buffer size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Work was enqueued on a stream whose worker has stopped.
    #[error("stream {0} closed")]
    StreamClosed(String),

    /// Reconstruction or correction kernel failed.
    #[error("kernel failed: {0}")]
    Kernel(String),

    /// Layout transform rejected its arguments.
    #[error("layout transform failed: {0}")]
    Layout(String),
}

impl DeviceError {
    /// Create a kernel error.
    pub fn kernel(message: impl Into<String>) -> Self {
        DeviceError::Kernel(message.into())
    }

    /// Create a layout error.
    pub fn layout(message: impl Into<String>) -> Self {
        DeviceError::Layout(message.into())
    }

    /// Fail with `SizeMismatch` unless `actual` fits in `expected`.
    pub fn check_fits(expected: usize, actual: usize) -> Result<()> {
        if actual > expected {
            Err(DeviceError::SizeMismatch { expected, actual })
        } else {
            Ok(())
        }
    }

    /// Check if this error indicates the device is unusable.
    pub fn is_device_error(&self) -> bool {
        match self {
            #[cfg(feature = "cuda")]
            DeviceError::Driver(_) => true,
            DeviceError::StreamClosed(_) => true,
            _ => false,
        }
    }
}

impl From<DeviceError> for tomoflow_core::Error {
    fn from(err: DeviceError) -> Self {
        tomoflow_core::Error::Device(err.to_string())
    }
}
