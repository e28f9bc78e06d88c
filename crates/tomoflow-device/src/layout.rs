//! Layout transforms around the reconstruction kernel.
//!
//! The kernel consumes its input as two half-height bands (real and
//! imaginary channel) packed element by element, and produces its output as
//! two packed column halves. These moves are bit-exact: elements are copied
//! as opaque `element_size`-byte groups, never interpreted.
//!
//! ```text
//! channel-major          element-major
//! [a0 a1 a2 | b0 b1 b2]  [a0 b0 a1 b1 a2 b2]
//!      interleave ──────────────►
//!      ◄────────────── deinterleave
//! ```

use half::f16;
use tomoflow_core::{Precision, SampleType};

use crate::backend::LayoutOp;
use crate::error::{DeviceError, Result};

fn check_pairs(dst: &[u8], src: &[u8], element_size: usize) -> Result<usize> {
    if element_size == 0 {
        return Err(DeviceError::layout("element size must be positive"));
    }
    if dst.len() != src.len() {
        return Err(DeviceError::SizeMismatch {
            expected: src.len(),
            actual: dst.len(),
        });
    }
    if src.len() % (2 * element_size) != 0 {
        return Err(DeviceError::layout(format!(
            "{} bytes is not an even number of {}-byte elements",
            src.len(),
            element_size
        )));
    }
    Ok(src.len() / element_size / 2)
}

/// `dst[2j + c] = src[c*H + j]` with `H = len / 2`.
pub fn interleave(dst: &mut [u8], src: &[u8], element_size: usize) -> Result<()> {
    let half = check_pairs(dst, src, element_size)?;
    let es = element_size;
    for j in 0..half {
        for c in 0..2 {
            let from = (c * half + j) * es;
            let to = (2 * j + c) * es;
            dst[to..to + es].copy_from_slice(&src[from..from + es]);
        }
    }
    Ok(())
}

/// `dst[c*H + j] = src[2j + c]` with `H = len / 2`.
pub fn deinterleave(dst: &mut [u8], src: &[u8], element_size: usize) -> Result<()> {
    let half = check_pairs(dst, src, element_size)?;
    let es = element_size;
    for j in 0..half {
        for c in 0..2 {
            let from = (2 * j + c) * es;
            let to = (c * half + j) * es;
            dst[to..to + es].copy_from_slice(&src[from..from + es]);
        }
    }
    Ok(())
}

/// Reorder `(outer, middle, inner)` into `(middle, outer, inner)`.
pub fn transpose01(
    dst: &mut [u8],
    src: &[u8],
    outer: usize,
    middle: usize,
    inner: usize,
    element_size: usize,
) -> Result<()> {
    let expected = outer * middle * inner * element_size;
    DeviceError::check_fits(src.len(), expected)?;
    DeviceError::check_fits(dst.len(), expected)?;

    let run = inner * element_size;
    for o in 0..outer {
        for m in 0..middle {
            let from = (o * middle + m) * run;
            let to = (m * outer + o) * run;
            dst[to..to + run].copy_from_slice(&src[from..from + run]);
        }
    }
    Ok(())
}

/// Decode one raw sample as `f32`.
pub fn read_sample(bytes: &[u8], from: SampleType) -> f32 {
    match from {
        SampleType::U8 => bytes[0] as f32,
        SampleType::U16 => bytemuck::pod_read_unaligned::<u16>(&bytes[..2]) as f32,
        SampleType::F16 => bytemuck::pod_read_unaligned::<f16>(&bytes[..2]).to_f32(),
        SampleType::F32 => bytemuck::pod_read_unaligned::<f32>(&bytes[..4]),
    }
}

/// Convert every sample of `src` into `to`, writing into `dst`.
///
/// Buffers are not assumed to be aligned for the element type.
pub fn cast(dst: &mut [u8], src: &[u8], from: SampleType, to: Precision) -> Result<()> {
    let count = src.len() / from.size();
    DeviceError::check_fits(dst.len(), count * to.size())?;

    let samples = src.chunks_exact(from.size());
    let out = dst[..count * to.size()].chunks_exact_mut(to.size());
    for (sample, slot) in samples.zip(out) {
        write_element(slot, read_sample(sample, from), to);
    }
    Ok(())
}

/// Decode one reconstruction-precision element.
pub fn read_element(bytes: &[u8], precision: Precision) -> f32 {
    match precision {
        Precision::Float32 => bytemuck::pod_read_unaligned::<f32>(&bytes[..4]),
        Precision::Float16 => bytemuck::pod_read_unaligned::<f16>(&bytes[..2]).to_f32(),
    }
}

/// Encode `value` into the first element of `slot`.
pub fn write_element(slot: &mut [u8], value: f32, precision: Precision) {
    match precision {
        Precision::Float32 => slot[..4].copy_from_slice(bytemuck::bytes_of(&value)),
        Precision::Float16 => slot[..2].copy_from_slice(bytemuck::bytes_of(&f16::from_f32(value))),
    }
}

/// Run `op` on host memory.
pub fn apply(op: LayoutOp, dst: &mut [u8], src: &[u8]) -> Result<()> {
    match op {
        LayoutOp::Interleave { element_size } => interleave(dst, src, element_size),
        LayoutOp::Deinterleave { element_size } => deinterleave(dst, src, element_size),
        LayoutOp::Transpose01 {
            outer,
            middle,
            inner,
            element_size,
        } => transpose01(dst, src, outer, middle, inner, element_size),
        LayoutOp::Cast { from, to } => cast(dst, src, from, to),
    }
}
