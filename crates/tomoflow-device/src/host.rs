//! Device emulated in host memory.
//!
//! Each stream is a dedicated thread draining a channel of operations, so
//! work on one stream runs strictly in order while the three streams run
//! concurrently. Buffers are shared byte vectors. An optional jitter sleeps a
//! random time before every operation to shake out missing synchronization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use rand::Rng;

use crate::backend::{Backend, DeviceMemory, HostMemory, LayoutOp, StreamHandle, StreamRole};
use crate::error::{DeviceError, Result};
use crate::layout;

/// Operation executed on a stream thread.
pub type StreamOp = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Shared byte buffer used for both pinned and device memory.
#[derive(Clone, Default)]
pub struct SharedBytes {
    bytes: Arc<Mutex<Vec<u8>>>,
    len: usize,
}

impl SharedBytes {
    /// Allocate `len` zeroed bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0; len])),
            len,
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy out the first `len` bytes.
    pub fn snapshot(&self, len: usize) -> Vec<u8> {
        let bytes = self.bytes.lock();
        bytes[..len.min(self.len)].to_vec()
    }

    /// Overwrite the start of the buffer with `src`.
    pub fn write(&self, src: &[u8]) -> Result<()> {
        DeviceError::check_fits(self.len, src.len())?;
        self.bytes.lock()[..src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl std::fmt::Debug for SharedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBytes").field("len", &self.len).finish()
    }
}

impl HostMemory for SharedBytes {
    fn len(&self) -> usize {
        self.len
    }

    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.bytes.lock().as_slice())
    }

    fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(self.bytes.lock().as_mut_slice())
    }
}

impl DeviceMemory for SharedBytes {
    fn len(&self) -> usize {
        self.len
    }

    fn base_address(&self) -> u64 {
        self.bytes.lock().as_ptr() as u64
    }
}

#[derive(Default)]
struct StreamState {
    pending: usize,
    error: Option<DeviceError>,
}

struct StreamShared {
    state: Mutex<StreamState>,
    drained: Condvar,
}

/// In-order execution stream backed by one thread.
pub struct HostStream {
    role: StreamRole,
    id: u64,
    tx: Option<Sender<StreamOp>>,
    shared: Arc<StreamShared>,
    handle: Option<JoinHandle<()>>,
}

impl HostStream {
    fn spawn(role: StreamRole, id: u64, jitter: Option<Duration>) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(StreamShared {
            state: Mutex::new(StreamState::default()),
            drained: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("stream-{}", role))
            .spawn(move || stream_loop(rx, worker_shared, jitter))
            .map_err(|e| DeviceError::StreamClosed(format!("{}: {}", role, e)))?;

        tracing::debug!(stream = %role, id, "host stream started");
        Ok(Self {
            role,
            id,
            tx: Some(tx),
            shared,
            handle: Some(handle),
        })
    }

    /// Role this stream was created for.
    pub fn role(&self) -> StreamRole {
        self.role
    }

    /// Operations enqueued but not finished.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending
    }

    /// Enqueue `op` behind every operation already on this stream.
    pub fn enqueue(&self, op: StreamOp) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| DeviceError::StreamClosed(self.role.to_string()))?;
        self.shared.state.lock().pending += 1;
        if tx.send(op).is_err() {
            let mut state = self.shared.state.lock();
            state.pending -= 1;
            return Err(DeviceError::StreamClosed(self.role.to_string()));
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        while state.pending > 0 {
            self.shared.drained.wait(&mut state);
        }
        match state.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for HostStream {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for HostStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostStream")
            .field("role", &self.role)
            .field("id", &self.id)
            .finish()
    }
}

fn stream_loop(rx: Receiver<StreamOp>, shared: Arc<StreamShared>, jitter: Option<Duration>) {
    let mut rng = rand::thread_rng();
    for op in rx {
        // After a failure the rest of the queue is skipped until synchronize.
        let failed = shared.state.lock().error.is_some();
        let outcome = if failed {
            Ok(())
        } else {
            if let Some(max) = jitter {
                let micros = rng.gen_range(0..=max.as_micros() as u64);
                thread::sleep(Duration::from_micros(micros));
            }
            op()
        };

        let mut state = shared.state.lock();
        if let Err(err) = outcome {
            state.error.get_or_insert(err);
        }
        state.pending -= 1;
        if state.pending == 0 {
            shared.drained.notify_all();
        }
    }
}

/// Backend that emulates the device with host threads and memory.
#[derive(Debug, Default)]
pub struct HostBackend {
    jitter: Option<Duration>,
    next_stream: AtomicU64,
}

impl HostBackend {
    /// Create a backend without jitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep up to `max` before every stream operation.
    pub fn with_jitter(max: Duration) -> Self {
        Self {
            jitter: Some(max),
            next_stream: AtomicU64::new(0),
        }
    }

    /// Enqueue an arbitrary operation, used by host-side kernels.
    pub fn enqueue(&self, stream: &HostStream, op: StreamOp) -> Result<()> {
        stream.enqueue(op)
    }
}

fn copy_between(dst: &SharedBytes, src: &SharedBytes, bytes: usize) -> Result<()> {
    DeviceError::check_fits(src.len, bytes)?;
    DeviceError::check_fits(dst.len, bytes)?;
    // Never hold two buffer locks at once.
    let data = src.snapshot(bytes);
    dst.write(&data)
}

impl Backend for HostBackend {
    type Stream = HostStream;
    type HostBuffer = SharedBytes;
    type DeviceBuffer = SharedBytes;

    fn name(&self) -> &'static str {
        "host"
    }

    fn create_stream(&self, role: StreamRole) -> Result<HostStream> {
        let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        HostStream::spawn(role, id, self.jitter)
    }

    fn synchronize(&self, stream: &HostStream) -> Result<()> {
        stream.synchronize()
    }

    fn alloc_pinned(&self, bytes: usize) -> Result<SharedBytes> {
        Ok(SharedBytes::zeroed(bytes))
    }

    fn alloc_device(&self, bytes: usize) -> Result<SharedBytes> {
        Ok(SharedBytes::zeroed(bytes))
    }

    fn copy_in_async(
        &self,
        dst: &SharedBytes,
        src: &SharedBytes,
        bytes: usize,
        stream: &HostStream,
    ) -> Result<()> {
        DeviceError::check_fits(dst.len, bytes)?;
        let (dst, src) = (dst.clone(), src.clone());
        stream.enqueue(Box::new(move || copy_between(&dst, &src, bytes)))
    }

    fn copy_out_async(
        &self,
        dst: &SharedBytes,
        src: &SharedBytes,
        bytes: usize,
        stream: &HostStream,
    ) -> Result<()> {
        DeviceError::check_fits(dst.len, bytes)?;
        let (dst, src) = (dst.clone(), src.clone());
        stream.enqueue(Box::new(move || copy_between(&dst, &src, bytes)))
    }

    fn copy_device_async(
        &self,
        dst: &SharedBytes,
        src: &SharedBytes,
        bytes: usize,
        stream: &HostStream,
    ) -> Result<()> {
        DeviceError::check_fits(dst.len, bytes)?;
        let (dst, src) = (dst.clone(), src.clone());
        stream.enqueue(Box::new(move || copy_between(&dst, &src, bytes)))
    }

    fn launch_layout(
        &self,
        op: LayoutOp,
        dst: &SharedBytes,
        src: &SharedBytes,
        stream: &HostStream,
    ) -> Result<()> {
        let (dst, src) = (dst.clone(), src.clone());
        stream.enqueue(Box::new(move || {
            let input = src.snapshot(src.len);
            dst.with_bytes_mut(|out| layout::apply(op, out, &input))
        }))
    }

    fn raw_stream(&self, stream: &HostStream) -> StreamHandle {
        StreamHandle {
            role: stream.role,
            raw: stream.id,
        }
    }
}
