//! CUDA backend built on `cudarc`.
//!
//! Copies are enqueued on the stream they are given through the driver's
//! `cuMemcpy*Async` calls, and `synchronize` waits on that stream alone, so
//! the three conveyor streams overlap on the device. Host buffers are
//! pageable: the driver stages host-to-device copies before returning and
//! completes device-to-host copies before returning. Layout transforms drain
//! their stream and bounce through host memory.

use std::sync::Arc;

use cudarc::driver::{result, CudaDevice, CudaSlice, CudaStream, DevicePtr};
use parking_lot::Mutex;

use crate::backend::{Backend, DeviceMemory, HostMemory, LayoutOp, StreamHandle, StreamRole};
use crate::error::{DeviceError, Result};
use crate::host::SharedBytes;
use crate::layout;

/// A buffer in GPU device memory.
pub struct CudaBuffer {
    data: Mutex<CudaSlice<u8>>,
    size: usize,
    ptr: u64,
}

impl CudaBuffer {
    fn read(&self, device: &CudaDevice, bytes: usize) -> Result<Vec<u8>> {
        DeviceError::check_fits(self.size, bytes)?;
        let mut dst = vec![0u8; bytes];
        let data = self.data.lock();
        device.dtoh_sync_copy_into(&data.slice(0..bytes), &mut dst)?;
        Ok(dst)
    }

    fn write(&self, device: &CudaDevice, src: &[u8]) -> Result<()> {
        DeviceError::check_fits(self.size, src.len())?;
        let mut data = self.data.lock();
        device.htod_sync_copy_into(src, &mut data.slice_mut(0..src.len()))?;
        Ok(())
    }
}

impl DeviceMemory for CudaBuffer {
    fn len(&self) -> usize {
        self.size
    }

    fn base_address(&self) -> u64 {
        self.ptr
    }
}

/// Stream forked from the device's default stream.
pub struct CudaStreamHandle {
    role: StreamRole,
    stream: CudaStream,
}

/// Backend on a CUDA device.
pub struct CudaBackend {
    device: Arc<CudaDevice>,
}

impl CudaBackend {
    /// Open device `ordinal`.
    pub fn new(ordinal: usize) -> Result<Self> {
        let device = CudaDevice::new(ordinal)?;
        tracing::info!(ordinal, name = ?device.name().ok(), "opened CUDA device");
        Ok(Self { device })
    }

    /// Underlying device.
    pub fn device(&self) -> &Arc<CudaDevice> {
        &self.device
    }

    fn sync_stream(&self, stream: &CudaStreamHandle) -> Result<()> {
        self.device.bind_to_thread()?;
        // SAFETY: the stream was created on this device and is still alive.
        unsafe { result::stream::synchronize(stream.stream.stream) }?;
        Ok(())
    }
}

impl Backend for CudaBackend {
    type Stream = CudaStreamHandle;
    type HostBuffer = SharedBytes;
    type DeviceBuffer = CudaBuffer;

    fn name(&self) -> &'static str {
        "cuda"
    }

    fn create_stream(&self, role: StreamRole) -> Result<CudaStreamHandle> {
        let stream = self.device.fork_default_stream()?;
        Ok(CudaStreamHandle { role, stream })
    }

    fn synchronize(&self, stream: &CudaStreamHandle) -> Result<()> {
        self.sync_stream(stream)
    }

    fn alloc_pinned(&self, bytes: usize) -> Result<SharedBytes> {
        Ok(SharedBytes::zeroed(bytes))
    }

    fn alloc_device(&self, bytes: usize) -> Result<CudaBuffer> {
        let data = self
            .device
            .alloc_zeros::<u8>(bytes.max(1))
            .map_err(|_| DeviceError::OutOfMemory { requested: bytes })?;
        let ptr = *data.device_ptr();
        Ok(CudaBuffer {
            data: Mutex::new(data),
            size: bytes,
            ptr,
        })
    }

    fn copy_in_async(
        &self,
        dst: &CudaBuffer,
        src: &SharedBytes,
        bytes: usize,
        stream: &CudaStreamHandle,
    ) -> Result<()> {
        DeviceError::check_fits(src.len(), bytes)?;
        DeviceError::check_fits(dst.size, bytes)?;
        self.device.bind_to_thread()?;
        src.with_bytes(|host| {
            // SAFETY: `dst` spans at least `bytes` bytes. A pageable source is
            // staged by the driver before the call returns.
            unsafe { result::memcpy_htod_async(dst.ptr, &host[..bytes], stream.stream.stream) }
        })?;
        Ok(())
    }

    fn copy_out_async(
        &self,
        dst: &SharedBytes,
        src: &CudaBuffer,
        bytes: usize,
        stream: &CudaStreamHandle,
    ) -> Result<()> {
        DeviceError::check_fits(src.size, bytes)?;
        DeviceError::check_fits(dst.len(), bytes)?;
        self.device.bind_to_thread()?;
        dst.with_bytes_mut(|host| {
            // SAFETY: `src` spans at least `bytes` bytes. A copy into pageable
            // memory completes before the call returns.
            unsafe { result::memcpy_dtoh_async(&mut host[..bytes], src.ptr, stream.stream.stream) }
        })?;
        Ok(())
    }

    fn copy_device_async(
        &self,
        dst: &CudaBuffer,
        src: &CudaBuffer,
        bytes: usize,
        stream: &CudaStreamHandle,
    ) -> Result<()> {
        if dst.ptr == src.ptr {
            return Ok(());
        }
        DeviceError::check_fits(src.size, bytes)?;
        DeviceError::check_fits(dst.size, bytes)?;
        self.device.bind_to_thread()?;
        // SAFETY: both allocations span at least `bytes` bytes and stay alive
        // until the stream is synchronized.
        unsafe { result::memcpy_dtod_async(dst.ptr, src.ptr, bytes, stream.stream.stream) }?;
        Ok(())
    }

    fn launch_layout(
        &self,
        op: LayoutOp,
        dst: &CudaBuffer,
        src: &CudaBuffer,
        stream: &CudaStreamHandle,
    ) -> Result<()> {
        // The bounce uses blocking copies, which do not order against
        // non-blocking streams.
        self.sync_stream(stream)?;
        let input = src.read(&self.device, src.size)?;
        let mut output = dst.read(&self.device, dst.size)?;
        layout::apply(op, &mut output, &input)?;
        dst.write(&self.device, &output)
    }

    fn raw_stream(&self, stream: &CudaStreamHandle) -> StreamHandle {
        StreamHandle {
            role: stream.role,
            raw: stream.stream.stream as u64,
        }
    }
}
