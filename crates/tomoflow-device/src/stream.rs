//! The three conveyor streams.

use crate::backend::{Backend, StreamRole};
use crate::error::Result;

/// Transfer-in, compute and transfer-out streams of one backend.
pub struct StreamSet<B: Backend> {
    transfer_in: B::Stream,
    compute: B::Stream,
    transfer_out: B::Stream,
}

impl<B: Backend> StreamSet<B> {
    /// Create all three streams.
    pub fn new(backend: &B) -> Result<Self> {
        let streams = Self {
            transfer_in: backend.create_stream(StreamRole::TransferIn)?,
            compute: backend.create_stream(StreamRole::Compute)?,
            transfer_out: backend.create_stream(StreamRole::TransferOut)?,
        };
        tracing::debug!(backend = backend.name(), "stream set created");
        Ok(streams)
    }

    /// Stream for `role`.
    pub fn get(&self, role: StreamRole) -> &B::Stream {
        match role {
            StreamRole::TransferIn => &self.transfer_in,
            StreamRole::Compute => &self.compute,
            StreamRole::TransferOut => &self.transfer_out,
        }
    }

    /// Host-to-device stream.
    pub fn transfer_in(&self) -> &B::Stream {
        &self.transfer_in
    }

    /// Compute stream.
    pub fn compute(&self) -> &B::Stream {
        &self.compute
    }

    /// Device-to-host stream.
    pub fn transfer_out(&self) -> &B::Stream {
        &self.transfer_out
    }

    /// Block until `role` has drained.
    pub fn sync(&self, backend: &B, role: StreamRole) -> Result<()> {
        backend.synchronize(self.get(role))
    }

    /// Drain every stream, reporting the first failure after all have drained.
    pub fn sync_all(&self, backend: &B) -> Result<()> {
        let mut first = None;
        for role in StreamRole::ALL {
            if let Err(err) = self.sync(backend, role) {
                first.get_or_insert(err);
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
