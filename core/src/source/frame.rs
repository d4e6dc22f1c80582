use crate::prelude::{EngineError, EngineResult};
use crate::source::geometry::FrameGeometry;
use serde::{Deserialize, Serialize};

/// How raw sensor words are turned into numeric sample values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SampleFormat {
    pub twos_complement: bool,
}

impl SampleFormat {
    pub fn decode(&self, raw: u16) -> f32 {
        if self.twos_complement {
            raw as i16 as f32
        } else {
            raw as f32
        }
    }

    /// Maps a raw word onto an unsigned scale that preserves sample ordering and spacing.
    pub fn ordered(&self, raw: u16) -> u16 {
        if self.twos_complement {
            raw ^ 0x8000
        } else {
            raw
        }
    }
}

/// One acquired frame, stored row-major (`data_height` rows of `width` samples).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    geometry: FrameGeometry,
    samples: Vec<u16>,
}

impl Frame {
    pub fn new(geometry: FrameGeometry, samples: Vec<u16>) -> EngineResult<Self> {
        if samples.len() != geometry.pixels() {
            return Err(EngineError::Source(format!(
                "frame holds {} samples, geometry {} needs {}",
                samples.len(),
                geometry,
                geometry.pixels()
            )));
        }
        Ok(Self { geometry, samples })
    }

    pub fn filled(geometry: FrameGeometry, value: u16) -> Self {
        Self {
            geometry,
            samples: vec![value; geometry.pixels()],
        }
    }

    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    pub fn width(&self) -> usize {
        self.geometry.width
    }

    pub fn height(&self) -> usize {
        self.geometry.data_height
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub fn row(&self, row: usize) -> &[u16] {
        let width = self.geometry.width;
        &self.samples[row * width..(row + 1) * width]
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u16> {
        if x >= self.geometry.width || y >= self.geometry.data_height {
            return None;
        }
        self.samples.get(y * self.geometry.width + x).copied()
    }

    /// Mean decoded sample value over the whole frame.
    pub fn mean(&self, format: SampleFormat) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: f64 = self.samples.iter().map(|&v| format.decode(v) as f64).sum();
        total / self.samples.len() as f64
    }
}
