use crate::generator::template::{band_envelope, sine_wave};
use log::{debug, info};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use takecore::prelude::{EngineError, EngineResult, FrameSource};
use takecore::source::{ByteOrganization, Frame, FrameGeometry};

/// Configuration for generating synthetic sensor frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub width: usize,
    pub height: usize,
    /// Frames before end of stream; `None` runs until stopped.
    pub frame_count: Option<u64>,
    /// Delivery cadence; `None` delivers as fast as frames are built.
    pub frame_rate: Option<f64>,
    /// Dark level every pixel sits on.
    pub offset: u16,
    pub amplitude: f32,
    /// Sine cycles across the width.
    pub frequency: f32,
    /// Phase advance per frame, in radians.
    pub drift: f32,
    /// Peak uniform noise added to each sample.
    pub noise: f32,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_count: Some(200),
            frame_rate: Some(100.0),
            offset: 1000,
            amplitude: 800.0,
            frequency: 4.0,
            drift: 0.05,
            noise: 12.0,
            seed: 0,
        }
    }
}

/// Frame source producing a drifting sine pattern over a fixed dark offset.
pub struct SyntheticSource {
    config: GeneratorConfig,
    geometry: Option<FrameGeometry>,
    rng: StdRng,
    envelope: Vec<f32>,
    produced: u64,
    next_deadline: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: GeneratorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            geometry: None,
            rng,
            envelope: Vec::new(),
            produced: 0,
            next_deadline: None,
        }
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn pace(&mut self) {
        let Some(rate) = self.config.frame_rate.filter(|r| *r > 0.0) else {
            return;
        };
        let period = Duration::from_secs_f64(1.0 / rate);
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + period);
    }

    fn build_samples(&mut self, geometry: &FrameGeometry) -> Vec<u16> {
        let phase = self.produced as f32 * self.config.drift;
        let wave = sine_wave(geometry.width, self.config.frequency, phase);
        let noise = self.config.noise.abs();
        let offset = self.config.offset as f32;
        let mut samples = Vec::with_capacity(geometry.pixels());
        for gain in &self.envelope {
            for value in &wave {
                let jitter = if noise > 0.0 {
                    self.rng.gen_range(-noise..noise)
                } else {
                    0.0
                };
                let level = offset + self.config.amplitude * gain * (0.5 + 0.5 * value) + jitter;
                samples.push(level.round().clamp(0.0, u16::MAX as f32) as u16);
            }
        }
        samples
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> EngineResult<FrameGeometry> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(EngineError::SourceUnavailable(
                "synthetic geometry must be non-zero".into(),
            ));
        }
        let geometry = FrameGeometry::new(self.config.width, self.config.height, ByteOrganization::Bil);
        self.envelope = band_envelope(geometry.data_height, 0.2);
        self.rng = StdRng::seed_from_u64(self.config.seed);
        self.produced = 0;
        self.next_deadline = None;
        self.geometry = Some(geometry);
        info!("synthetic source opened at {}", geometry);
        Ok(geometry)
    }

    fn next_frame(&mut self) -> EngineResult<Option<Frame>> {
        let geometry = self
            .geometry
            .ok_or_else(|| EngineError::SourceUnavailable("synthetic source not open".into()))?;
        if self.config.frame_count.map_or(false, |limit| self.produced >= limit) {
            debug!("synthetic source finished after {} frames", self.produced);
            return Ok(None);
        }
        self.pace();
        let samples = self.build_samples(&geometry);
        self.produced += 1;
        Frame::new(geometry, samples).map(Some)
    }

    fn close(&mut self) {
        self.geometry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(frames: u64) -> GeneratorConfig {
        GeneratorConfig {
            width: 16,
            height: 4,
            frame_count: Some(frames),
            frame_rate: None,
            ..Default::default()
        }
    }

    #[test]
    fn generator_stops_after_frame_count() {
        let mut source = SyntheticSource::new(quick(3));
        let geometry = source.open().unwrap();
        assert_eq!(geometry.pixels(), 64);
        for _ in 0..3 {
            assert!(source.next_frame().unwrap().is_some());
        }
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.produced(), 3);
    }

    #[test]
    fn same_seed_repeats_frames() {
        let mut a = SyntheticSource::new(quick(2));
        let mut b = SyntheticSource::new(quick(2));
        a.open().unwrap();
        b.open().unwrap();
        assert_eq!(a.next_frame().unwrap(), b.next_frame().unwrap());
    }

    #[test]
    fn samples_sit_above_the_offset() {
        let config = GeneratorConfig {
            noise: 0.0,
            ..quick(1)
        };
        let offset = config.offset;
        let mut source = SyntheticSource::new(config);
        source.open().unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert!(frame.samples().iter().all(|&s| s >= offset));
    }

    #[test]
    fn zero_geometry_is_unavailable() {
        let mut source = SyntheticSource::new(GeneratorConfig {
            width: 0,
            ..quick(1)
        });
        assert!(matches!(source.open(), Err(EngineError::SourceUnavailable(_))));
    }
}
