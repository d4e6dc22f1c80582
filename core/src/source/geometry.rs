use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes per stored sample. Every supported sensor delivers 16-bit words.
pub const SAMPLE_BYTES: usize = 2;

/// Band organisation of samples on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrganization {
    /// Band interleaved by line: each band's row of samples follows the previous band.
    #[default]
    Bil,
    /// Band interleaved by pixel: all bands of one sample are contiguous.
    Bip,
    /// Band sequential: whole band planes one after another.
    Bsq,
}

/// Dimensions of the frames a source delivers. Fixed for the lifetime of an open source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: usize,
    /// Rows produced by the sensor, header rows included.
    pub height: usize,
    /// Rows left after header/trailer rows are stripped. Frames carry this many rows.
    pub data_height: usize,
    pub bits_per_sample: u8,
    pub organization: ByteOrganization,
}

impl FrameGeometry {
    pub fn new(width: usize, height: usize, organization: ByteOrganization) -> Self {
        Self {
            width,
            height,
            data_height: height,
            bits_per_sample: 16,
            organization,
        }
    }

    pub fn with_bits(mut self, bits_per_sample: u8) -> Self {
        self.bits_per_sample = bits_per_sample.clamp(1, 16);
        self
    }

    /// Drops the sensor's leading and/or trailing metadata row from the data region.
    pub fn with_skipped_rows(mut self, skip_first: bool, skip_last: bool) -> Self {
        let skipped = usize::from(skip_first) + usize::from(skip_last);
        self.data_height = self.height.saturating_sub(skipped).max(1);
        self
    }

    /// Number of samples in one delivered frame.
    pub fn pixels(&self) -> usize {
        self.width * self.data_height
    }

    pub fn frame_bytes(&self) -> usize {
        self.pixels() * SAMPLE_BYTES
    }

    /// True when two geometries produce frames of the same shape.
    pub fn same_shape(&self, other: &FrameGeometry) -> bool {
        self.width == other.width && self.data_height == other.data_height
    }
}

impl fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.data_height)
    }
}
