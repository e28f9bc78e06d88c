//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// How often blocking waits wake up to look at the token.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Clonable cancel flag shared by the scheduler, the ingest thread and workers.
///
/// A child token trips when it or any of its ancestors is cancelled;
/// cancelling a child leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::warn!("cancellation requested");
        }
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.ancestors.iter().any(|a| a.load(Ordering::SeqCst))
    }

    /// Token that also observes this one.
    pub fn child_token(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(Arc::clone(&self.cancelled));
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }

    /// Return `Err(Cancelled)` once the token has tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
