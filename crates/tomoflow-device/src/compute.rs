//! Boundary to the reconstruction kernel.
//!
//! The scheduler sees a chunk reconstruction as a [`ComputeStage`]: correct
//! the uploaded generation, then reconstruct it into a device buffer, all
//! enqueued on the compute stream. [`FourierRec`] is the stage used for
//! Fourier-based kernels; it owns the scratch buffers and the layout moves
//! around an external [`ReconstructionKernel`].

use tomoflow_core::{Error, Precision, ReconConfig, Result, SampleType};

use crate::backend::{Backend, BufferDescriptor, LayoutOp, StreamHandle};
use crate::generations::InputBuffers;

/// Shapes of one chunk as seen by the compute stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconGeometry {
    /// Projection angles.
    pub n_proj: usize,
    /// Rows per chunk. Even.
    pub chunk_rows: usize,
    /// Detector columns.
    pub width: usize,
    /// Edge of a reconstructed slice.
    pub n: usize,
    /// Raw sample type of the uploaded data.
    pub sample_type: SampleType,
    /// Precision of everything after correction.
    pub precision: Precision,
}

impl ReconGeometry {
    /// Geometry of `config`.
    pub fn from_config(config: &ReconConfig) -> Self {
        Self {
            n_proj: config.n_proj,
            chunk_rows: config.chunk_rows,
            width: config.width,
            n: config.recon_size,
            sample_type: config.sample_type,
            precision: config.precision,
        }
    }

    /// Elements of a corrected projection chunk or its sinogram.
    pub fn projection_elements(&self) -> usize {
        self.n_proj * self.chunk_rows * self.width
    }

    /// Bytes of a corrected projection chunk or its sinogram.
    pub fn projection_bytes(&self) -> usize {
        self.projection_elements() * self.precision.size()
    }

    /// Bytes of a reconstructed chunk.
    pub fn recon_bytes(&self) -> usize {
        self.chunk_rows * self.n * self.n * self.precision.size()
    }
}

/// Arguments of one kernel invocation.
pub struct KernelArgs<'a, B: Backend> {
    /// Packed output, `(chunk_rows, n, n)` as two column halves.
    pub output: &'a B::DeviceBuffer,
    /// Packed input, `(chunk_rows, n_proj, width)` as interleaved bands.
    pub input: &'a B::DeviceBuffer,
    pub output_desc: BufferDescriptor,
    pub input_desc: BufferDescriptor,
    pub angles: &'a [f32],
    pub stream: &'a B::Stream,
    pub handle: StreamHandle,
}

/// External reconstruction kernel.
///
/// Both methods only enqueue work on the given stream and return; the
/// caller synchronizes the stream before reading results.
pub trait ReconstructionKernel<B: Backend>: Send {
    /// Filter the sinogram `(chunk_rows, n_proj, width)` in place, applying
    /// `shifts[row]` as the center offset of each row. The default does nothing.
    fn filter(
        &mut self,
        backend: &B,
        sinogram: &B::DeviceBuffer,
        desc: BufferDescriptor,
        shifts: &[f32],
        stream: &B::Stream,
    ) -> Result<()> {
        let _ = (backend, sinogram, desc, shifts, stream);
        Ok(())
    }

    /// Reconstruct the packed input into the packed output.
    fn invoke(&mut self, backend: &B, args: KernelArgs<'_, B>) -> Result<()>;
}

/// Preprocessing of an uploaded generation.
pub trait Corrector<B: Backend>: Send {
    /// Read the input generation and write corrected projections
    /// `(n_proj, chunk_rows, width)` in reconstruction precision to `output`.
    fn correct(
        &mut self,
        backend: &B,
        inputs: InputBuffers<'_, B>,
        output: &B::DeviceBuffer,
        geometry: &ReconGeometry,
        stream: &B::Stream,
    ) -> Result<()>;
}

/// Converts raw samples to reconstruction precision without normalization.
#[derive(Debug, Clone, Copy, Default)]
pub struct CastCorrector;

impl<B: Backend> Corrector<B> for CastCorrector {
    fn correct(
        &mut self,
        backend: &B,
        inputs: InputBuffers<'_, B>,
        output: &B::DeviceBuffer,
        geometry: &ReconGeometry,
        stream: &B::Stream,
    ) -> Result<()> {
        let op = LayoutOp::Cast {
            from: geometry.sample_type,
            to: geometry.precision,
        };
        backend.launch_layout(op, output, inputs.data, stream)?;
        Ok(())
    }
}

/// What the scheduler runs on the compute stream.
pub trait ComputeStage<B: Backend>: Send {
    /// Enqueue correction of an uploaded input generation.
    fn correct(&mut self, backend: &B, inputs: InputBuffers<'_, B>, stream: &B::Stream)
        -> Result<()>;

    /// Enqueue reconstruction of the last corrected chunk into `output`,
    /// one center shift per row.
    fn reconstruct(
        &mut self,
        backend: &B,
        output: &B::DeviceBuffer,
        shifts: &[f32],
        stream: &B::Stream,
    ) -> Result<()>;

    /// Rows per chunk.
    fn chunk_rows(&self) -> usize;
}

/// Fourier-based reconstruction stage.
///
/// Per chunk, on the compute stream: correct into a working copy, reorder
/// projections into sinograms, filter, interleave the two half-height bands,
/// invoke the kernel, and de-interleave its output into the target buffer.
pub struct FourierRec<B: Backend, K> {
    geometry: ReconGeometry,
    angles: Vec<f32>,
    kernel: K,
    corrector: Box<dyn Corrector<B>>,
    corrected: B::DeviceBuffer,
    sinogram: B::DeviceBuffer,
    packed_in: B::DeviceBuffer,
    packed_out: B::DeviceBuffer,
}

impl<B: Backend, K: ReconstructionKernel<B>> FourierRec<B, K> {
    /// Allocate scratch buffers for `geometry` and wrap `kernel`.
    pub fn new(backend: &B, geometry: ReconGeometry, angles: Vec<f32>, kernel: K) -> Result<Self> {
        if geometry.chunk_rows == 0 || geometry.chunk_rows % 2 != 0 {
            return Err(Error::config(format!(
                "chunk rows must be even for band interleaving, got {}",
                geometry.chunk_rows
            )));
        }
        if angles.len() != geometry.n_proj {
            return Err(Error::config(format!(
                "{} angles for {} projections",
                angles.len(),
                geometry.n_proj
            )));
        }

        let projection = geometry.projection_bytes();
        let recon = geometry.recon_bytes();
        let stage = Self {
            geometry,
            angles,
            kernel,
            corrector: Box::new(CastCorrector),
            corrected: backend.alloc_device(projection)?,
            sinogram: backend.alloc_device(projection)?,
            packed_in: backend.alloc_device(projection)?,
            packed_out: backend.alloc_device(recon)?,
        };
        tracing::debug!(
            scratch_bytes = 3 * projection + recon,
            precision = geometry.precision.name(),
            "fourier stage ready"
        );
        Ok(stage)
    }

    /// Replace the default [`CastCorrector`].
    pub fn with_corrector(mut self, corrector: impl Corrector<B> + 'static) -> Self {
        self.corrector = Box::new(corrector);
        self
    }

    /// Chunk geometry.
    pub fn geometry(&self) -> &ReconGeometry {
        &self.geometry
    }

    /// Projection angles.
    pub fn angles(&self) -> &[f32] {
        &self.angles
    }

    /// The wrapped kernel.
    pub fn kernel(&self) -> &K {
        &self.kernel
    }
}

impl<B: Backend, K: ReconstructionKernel<B>> ComputeStage<B> for FourierRec<B, K> {
    fn correct(
        &mut self,
        backend: &B,
        inputs: InputBuffers<'_, B>,
        stream: &B::Stream,
    ) -> Result<()> {
        self.corrector
            .correct(backend, inputs, &self.corrected, &self.geometry, stream)
    }

    fn reconstruct(
        &mut self,
        backend: &B,
        output: &B::DeviceBuffer,
        shifts: &[f32],
        stream: &B::Stream,
    ) -> Result<()> {
        let g = self.geometry;
        let element_size = g.precision.size();
        if shifts.len() != g.chunk_rows {
            return Err(Error::config(format!(
                "{} shifts for {} rows",
                shifts.len(),
                g.chunk_rows
            )));
        }

        let transpose = LayoutOp::Transpose01 {
            outer: g.n_proj,
            middle: g.chunk_rows,
            inner: g.width,
            element_size,
        };
        backend.launch_layout(transpose, &self.sinogram, &self.corrected, stream)?;

        let sino_desc = BufferDescriptor::of(&self.sinogram, g.n_proj * g.width, g.precision);
        self.kernel
            .filter(backend, &self.sinogram, sino_desc, shifts, stream)?;

        backend.launch_layout(
            LayoutOp::Interleave { element_size },
            &self.packed_in,
            &self.sinogram,
            stream,
        )?;

        let args = KernelArgs {
            output: &self.packed_out,
            input: &self.packed_in,
            output_desc: BufferDescriptor::of(&self.packed_out, g.n * g.n, g.precision),
            input_desc: BufferDescriptor::of(&self.packed_in, g.n_proj * g.width, g.precision),
            angles: &self.angles,
            stream,
            handle: backend.raw_stream(stream),
        };
        self.kernel.invoke(backend, args)?;

        backend.launch_layout(
            LayoutOp::Deinterleave { element_size },
            output,
            &self.packed_out,
            stream,
        )?;
        Ok(())
    }

    fn chunk_rows(&self) -> usize {
        self.geometry.chunk_rows
    }
}
