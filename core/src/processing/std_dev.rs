use crate::prelude::{ProcessingStage, StageConfig, StageInput};
use crate::processing::products::ProductData;
use crate::source::{FrameGeometry, SampleFormat};
use log::debug;
use std::collections::VecDeque;

/// Upper bound (exclusive) on the standard deviation history length.
pub const MAX_STD_DEV_N: usize = 1000;

/// Exact per-pixel running sums over the most recent `capacity` frames.
///
/// Samples are held on an order-preserving unsigned scale, so the variance is the same
/// as for the decoded values. With at most 999 frames of 16-bit samples both sums fit in
/// a `u64` without loss.
#[derive(Debug)]
pub struct RunningStdDev {
    capacity: usize,
    history: VecDeque<Vec<u16>>,
    sums: Vec<u64>,
    sums_sq: Vec<u64>,
}

impl RunningStdDev {
    pub fn new(pixels: usize, capacity: usize) -> Self {
        Self {
            capacity: capacity.clamp(1, MAX_STD_DEV_N - 1),
            history: VecDeque::new(),
            sums: vec![0; pixels],
            sums_sq: vec![0; pixels],
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shrinking the history evicts the oldest frames immediately.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.clamp(1, MAX_STD_DEV_N - 1);
        while self.history.len() > self.capacity {
            self.evict_oldest();
        }
    }

    pub fn push(&mut self, samples: Vec<u16>) {
        while self.history.len() >= self.capacity {
            self.evict_oldest();
        }
        for ((sum, sum_sq), &value) in self.sums.iter_mut().zip(self.sums_sq.iter_mut()).zip(&samples) {
            let value = value as u64;
            *sum += value;
            *sum_sq += value * value;
        }
        self.history.push_back(samples);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self.history.pop_front() {
            for ((sum, sum_sq), &value) in self.sums.iter_mut().zip(self.sums_sq.iter_mut()).zip(&oldest) {
                let value = value as u64;
                *sum -= value;
                *sum_sq -= value * value;
            }
        }
    }

    /// Population standard deviation per pixel over the frames currently held.
    pub fn std_dev(&self) -> Vec<f32> {
        let n = self.history.len() as u128;
        if n == 0 {
            return vec![0.0; self.sums.len()];
        }
        self.sums
            .iter()
            .zip(&self.sums_sq)
            .map(|(&sum, &sum_sq)| {
                let sum = sum as u128;
                let numerator = n * sum_sq as u128 - sum * sum;
                ((numerator as f64) / ((n * n) as f64)).sqrt() as f32
            })
            .collect()
    }
}

/// Standard deviation product over the last N frames.
pub struct StdDevStage {
    format: SampleFormat,
    geometry: Option<FrameGeometry>,
    requested_n: usize,
    running: Option<RunningStdDev>,
}

impl StdDevStage {
    pub fn new() -> Self {
        Self {
            format: SampleFormat::default(),
            geometry: None,
            requested_n: 1,
            running: None,
        }
    }
}

impl Default for StdDevStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for StdDevStage {
    fn initialize(&mut self, config: &StageConfig) {
        self.format = config.format;
        self.requested_n = config.params.std_dev_n;
        if let Some(running) = self.running.as_mut() {
            running.set_capacity(self.requested_n);
        }
    }

    fn execute(&mut self, input: StageInput<'_>) -> Option<ProductData> {
        let geometry = *input.frame.geometry();
        if self.geometry.map_or(true, |g| !g.same_shape(&geometry)) {
            debug!("std dev history reset for {} frames", geometry);
            self.geometry = Some(geometry);
            self.running = Some(RunningStdDev::new(geometry.pixels(), self.requested_n));
        }
        let running = self.running.as_mut()?;
        let format = self.format;
        running.push(input.frame.samples().iter().map(|&raw| format.ordered(raw)).collect());
        Some(ProductData::Frame {
            width: input.frame.width(),
            height: input.frame.height(),
            values: running.std_dev(),
        })
    }

    fn cleanup(&mut self) {
        self.running = None;
        self.geometry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn two_pass(frames: &[Vec<u16>], pixel: usize) -> f64 {
        let n = frames.len() as f64;
        let mean = frames.iter().map(|f| f[pixel] as f64).sum::<f64>() / n;
        let var = frames
            .iter()
            .map(|f| {
                let d = f[pixel] as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        var.sqrt()
    }

    #[test]
    fn running_matches_two_pass_for_several_windows() {
        let mut rng = StdRng::seed_from_u64(42);
        let pixels = 6;
        let frames: Vec<Vec<u16>> = (0..60)
            .map(|_| (0..pixels).map(|_| rng.gen::<u16>()).collect())
            .collect();

        for n in [1usize, 2, 7, 25, 59] {
            let mut running = RunningStdDev::new(pixels, n);
            for (i, frame) in frames.iter().enumerate() {
                running.push(frame.clone());
                let window = &frames[(i + 1).saturating_sub(n)..=i];
                let got = running.std_dev();
                for (pixel, value) in got.iter().enumerate() {
                    let expected = two_pass(window, pixel);
                    let tolerance = 1e-3 * expected.max(1.0);
                    assert!(
                        (*value as f64 - expected).abs() <= tolerance,
                        "n={} frame={} pixel={}: {} vs {}",
                        n,
                        i,
                        pixel,
                        value,
                        expected
                    );
                }
            }
        }
    }

    #[test]
    fn constant_input_has_zero_deviation() {
        let mut running = RunningStdDev::new(3, 10);
        for _ in 0..15 {
            running.push(vec![u16::MAX; 3]);
        }
        assert_eq!(running.len(), 10);
        assert_eq!(running.std_dev(), vec![0.0; 3]);
    }

    #[test]
    fn shrinking_capacity_evicts_oldest() {
        let mut running = RunningStdDev::new(1, 4);
        for value in [0u16, 0, 10, 20] {
            running.push(vec![value]);
        }
        running.set_capacity(2);
        assert_eq!(running.len(), 2);
        assert_eq!(running.std_dev(), vec![5.0]);
    }

    #[test]
    fn capacity_is_clamped() {
        assert_eq!(RunningStdDev::new(1, 0).capacity(), 1);
        assert_eq!(RunningStdDev::new(1, 50_000).capacity(), MAX_STD_DEV_N - 1);
    }
}
