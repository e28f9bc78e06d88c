//! Flat-field correction on the host backend.

use tomoflow_core::Result;
use tomoflow_device::layout::{read_sample, write_element};
use tomoflow_device::{
    Corrector, DeviceError, HostBackend, HostMemory, HostStream, InputBuffers, ReconGeometry,
};

/// Normalizes projections with the averaged dark and flat fields:
/// `(data - dark) / (flat - dark)`, zero where the flat equals the dark.
#[derive(Debug, Clone, Copy)]
pub struct DarkFlatCorrector {
    n_dark: usize,
    n_flat: usize,
}

impl DarkFlatCorrector {
    pub fn new(n_dark: usize, n_flat: usize) -> Self {
        Self { n_dark, n_flat }
    }
}

/// Per-pixel mean over `count` frames of `pixels` samples.
fn mean_frames(bytes: &[u8], count: usize, pixels: usize, geometry: &ReconGeometry) -> Vec<f32> {
    let ss = geometry.sample_type.size();
    let mut mean = vec![0.0f32; pixels];
    for frame in 0..count {
        for (pixel, acc) in mean.iter_mut().enumerate() {
            let at = (frame * pixels + pixel) * ss;
            *acc += read_sample(&bytes[at..at + ss], geometry.sample_type);
        }
    }
    for acc in &mut mean {
        *acc /= count.max(1) as f32;
    }
    mean
}

impl Corrector<HostBackend> for DarkFlatCorrector {
    fn correct(
        &mut self,
        backend: &HostBackend,
        inputs: InputBuffers<'_, HostBackend>,
        output: &tomoflow_device::SharedBytes,
        geometry: &ReconGeometry,
        stream: &HostStream,
    ) -> Result<()> {
        let (data, dark, flat) = (inputs.data.clone(), inputs.dark.clone(), inputs.flat.clone());
        let output = output.clone();
        let geometry = *geometry;
        let (n_dark, n_flat) = (self.n_dark, self.n_flat);

        backend.enqueue(
            stream,
            Box::new(move || {
                let pixels = geometry.chunk_rows * geometry.width;
                let ss = geometry.sample_type.size();
                let es = geometry.precision.size();
                DeviceError::check_fits(data.len(), geometry.n_proj * pixels * ss)?;
                DeviceError::check_fits(output.len(), geometry.n_proj * pixels * es)?;

                let dark = mean_frames(&dark.snapshot(dark.len()), n_dark, pixels, &geometry);
                let flat = mean_frames(&flat.snapshot(flat.len()), n_flat, pixels, &geometry);
                let raw = data.snapshot(data.len());
                output.with_bytes_mut(|out| {
                    for (index, sample) in raw.chunks_exact(ss).take(geometry.n_proj * pixels).enumerate() {
                        let pixel = index % pixels;
                        let range = flat[pixel] - dark[pixel];
                        let value = if range == 0.0 {
                            0.0
                        } else {
                            (read_sample(sample, geometry.sample_type) - dark[pixel]) / range
                        };
                        write_element(&mut out[index * es..(index + 1) * es], value, geometry.precision);
                    }
                });
                Ok(())
            }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tomoflow_core::{Precision, SampleType};
    use tomoflow_device::{Backend, SharedBytes, StreamRole};

    #[test]
    fn test_normalizes_with_mean_fields() {
        let backend = HostBackend::new();
        let stream = backend.create_stream(StreamRole::Compute).unwrap();
        let geometry = ReconGeometry {
            n_proj: 1,
            chunk_rows: 2,
            width: 1,
            n: 1,
            sample_type: SampleType::U8,
            precision: Precision::Float32,
        };
        let data = SharedBytes::zeroed(2);
        data.write(&[6, 4]).unwrap();
        // two dark frames averaging to 2, one flat frame of 10 and 2
        let dark = SharedBytes::zeroed(4);
        dark.write(&[1, 2, 3, 2]).unwrap();
        let flat = SharedBytes::zeroed(2);
        flat.write(&[10, 2]).unwrap();
        let output = SharedBytes::zeroed(8);

        let mut corrector = DarkFlatCorrector::new(2, 1);
        let inputs = InputBuffers {
            data: &data,
            dark: &dark,
            flat: &flat,
        };
        corrector
            .correct(&backend, inputs, &output, &geometry, &stream)
            .unwrap();
        backend.synchronize(&stream).unwrap();

        let values: Vec<f32> = output
            .snapshot(8)
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(values, vec![0.5, 0.0]);
    }
}
