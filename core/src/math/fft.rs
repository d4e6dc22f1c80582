use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Helper that wraps the `rustfft` planner for reuse across frames.
pub struct FftHelper {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex32::zero(); fft.get_inplace_scratch_len()];
        Self {
            fft,
            buffer: vec![Complex32::zero(); size],
            scratch,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Transforms a real series, zero-padded or truncated to `len()`.
    pub fn forward(&mut self, input: &[f32]) -> &[Complex32] {
        self.load(input);
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);
        &self.buffer
    }

    /// Magnitudes of the first `len / 2` bins of a real input series.
    pub fn half_magnitudes(&mut self, input: &[f32]) -> Vec<f32> {
        let spectrum = self.forward(input);
        let half = spectrum.len() / 2;
        spectrum[..half].iter().map(|c| c.norm()).collect()
    }

    fn load(&mut self, input: &[f32]) {
        for (slot, value) in self
            .buffer
            .iter_mut()
            .zip(input.iter().copied().chain(std::iter::repeat(0.0)))
        {
            *slot = Complex32::new(value, 0.0);
        }
    }
}
