//! Host-side stand-in for the reconstruction kernel.
//!
//! Each output slice is filled with the first sample of its sinogram row, so
//! a slice carries the tag of the detector row it came from and any ordering
//! mistake shows up as a wrong value in the written volume. The packed
//! layouts are honoured exactly: the tag is read through the interleaved
//! input and written through the interleaved output.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tomoflow_core::Result;
use tomoflow_device::layout::{read_element, write_element};
use tomoflow_device::{
    BufferDescriptor, DeviceError, HostBackend, HostMemory, HostStream, KernelArgs,
    ReconstructionKernel, SharedBytes,
};

/// Position of element `index` of a channel-major buffer after interleaving.
fn packed_index(index: usize, half: usize) -> usize {
    if index < half {
        2 * index
    } else {
        2 * (index - half) + 1
    }
}

/// Mock kernel for [`HostBackend`].
///
/// `filter` adds the row's shift to every sinogram sample; `invoke` tags
/// output slice `r` with sinogram row `r`'s first sample.
#[derive(Debug, Clone, Default)]
pub struct MockKernel {
    calls: Arc<AtomicUsize>,
    fail_on_call: Option<usize>,
}

impl MockKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `call`-th invocation (0-based) fail on the stream.
    pub fn failing_on_call(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }

    /// Invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReconstructionKernel<HostBackend> for MockKernel {
    fn filter(
        &mut self,
        backend: &HostBackend,
        sinogram: &SharedBytes,
        desc: BufferDescriptor,
        shifts: &[f32],
        stream: &HostStream,
    ) -> Result<()> {
        if shifts.iter().all(|&s| s == 0.0) {
            return Ok(());
        }
        let sinogram = sinogram.clone();
        let shifts = shifts.to_vec();
        let es = desc.precision.size();
        backend.enqueue(
            stream,
            Box::new(move || {
                sinogram.with_bytes_mut(|bytes| {
                    for (row, shift) in shifts.iter().enumerate().take(desc.rows()) {
                        let start = row * desc.stride * es;
                        let end = start + desc.stride * es;
                        for slot in bytes[start..end].chunks_exact_mut(es) {
                            let value = read_element(slot, desc.precision) + shift;
                            write_element(slot, value, desc.precision);
                        }
                    }
                });
                Ok(())
            }),
        )?;
        Ok(())
    }

    fn invoke(&mut self, backend: &HostBackend, args: KernelArgs<'_, HostBackend>) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_call == Some(call) {
            backend.enqueue(
                args.stream,
                Box::new(move || Err(DeviceError::kernel(format!("injected failure on call {}", call)))),
            )?;
            return Ok(());
        }

        let input = args.input.clone();
        let output = args.output.clone();
        let in_desc = args.input_desc;
        let out_desc = args.output_desc;
        backend.enqueue(
            args.stream,
            Box::new(move || {
                let es = in_desc.precision.size();
                let rows = out_desc.rows();
                let packed_in = input.snapshot(input.len());
                let in_half = in_desc.elements / 2;
                let tags: Vec<f32> = (0..rows)
                    .map(|row| {
                        let at = packed_index(row * in_desc.stride, in_half) * es;
                        read_element(&packed_in[at..at + es], in_desc.precision)
                    })
                    .collect();

                let out_half = out_desc.elements / 2;
                output.with_bytes_mut(|bytes| {
                    for index in 0..rows * out_desc.stride {
                        let at = packed_index(index, out_half) * es;
                        write_element(&mut bytes[at..at + es], tags[index / out_desc.stride], out_desc.precision);
                    }
                });
                Ok(())
            }),
        )?;
        Ok(())
    }
}
