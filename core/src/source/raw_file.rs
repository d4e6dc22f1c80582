use crate::prelude::{EngineError, EngineResult, FrameSource};
use crate::source::frame::Frame;
use crate::source::geometry::{ByteOrganization, FrameGeometry, SAMPLE_BYTES};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Describes a flat little-endian raw file (ENVI-style cube without header parsing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFileConfig {
    pub path: PathBuf,
    pub width: usize,
    /// Sensor rows per frame as stored in the file, header rows included.
    pub height: usize,
    #[serde(default)]
    pub organization: ByteOrganization,
    #[serde(default)]
    pub skip_first_row: bool,
    #[serde(default)]
    pub skip_last_row: bool,
    /// Replays frames at this cadence; `None` delivers them as fast as they are read.
    #[serde(default)]
    pub frame_rate: Option<f64>,
    #[serde(default)]
    pub looping: bool,
    #[serde(default = "default_bits")]
    pub bits_per_sample: u8,
    /// Mirrors samples around the top of the bit range (bright/dark swap).
    #[serde(default)]
    pub invert_brightness: bool,
}

fn default_bits() -> u8 {
    16
}

impl RawFileConfig {
    pub fn new(path: impl Into<PathBuf>, width: usize, height: usize) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            organization: ByteOrganization::Bil,
            skip_first_row: false,
            skip_last_row: false,
            frame_rate: None,
            looping: false,
            bits_per_sample: default_bits(),
            invert_brightness: false,
        }
    }
}

struct OpenFile {
    reader: BufReader<File>,
    total_frames: u64,
}

/// Frame source replaying a recorded raw cube line by line.
pub struct RawFileSource {
    config: RawFileConfig,
    geometry: Option<FrameGeometry>,
    file: Option<OpenFile>,
    next_index: u64,
    next_deadline: Option<Instant>,
    raw: Vec<u8>,
}

impl RawFileSource {
    pub fn new(config: RawFileConfig) -> Self {
        Self {
            config,
            geometry: None,
            file: None,
            next_index: 0,
            next_deadline: None,
            raw: Vec::new(),
        }
    }

    /// Frames stored in the file, known once opened.
    pub fn total_frames(&self) -> Option<u64> {
        self.file.as_ref().map(|f| f.total_frames)
    }

    fn sensor_samples(&self) -> usize {
        self.config.width * self.config.height
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

    fn read_sensor_frame(&mut self, index: u64) -> EngineResult<Vec<u16>> {
        let width = self.config.width;
        let height = self.config.height;
        let samples = self.sensor_samples();
        let organization = self.config.organization;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| EngineError::SourceUnavailable("raw file not open".into()))?;

        self.raw.resize(samples * SAMPLE_BYTES, 0);
        let io_err = |err: std::io::Error| EngineError::Source(err.to_string());

        match organization {
            ByteOrganization::Bil | ByteOrganization::Bip => {
                let offset = index * (samples * SAMPLE_BYTES) as u64;
                file.reader.seek(SeekFrom::Start(offset)).map_err(io_err)?;
                file.reader.read_exact(&mut self.raw).map_err(io_err)?;
            }
            ByteOrganization::Bsq => {
                // Band plane `b` holds every line of band `b`; gather this line from each plane.
                let line_bytes = width * SAMPLE_BYTES;
                for band in 0..height {
                    let offset =
                        ((band as u64 * file.total_frames + index) * width as u64) * SAMPLE_BYTES as u64;
                    file.reader.seek(SeekFrom::Start(offset)).map_err(io_err)?;
                    let chunk = &mut self.raw[band * line_bytes..(band + 1) * line_bytes];
                    file.reader.read_exact(chunk).map_err(io_err)?;
                }
            }
        }

        let words = self
            .raw
            .chunks_exact(SAMPLE_BYTES)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));

        let mut out = vec![0u16; samples];
        if organization == ByteOrganization::Bip {
            for (i, word) in words.enumerate() {
                let x = i / height;
                let band = i % height;
                out[band * width + x] = word;
            }
        } else {
            for (slot, word) in out.iter_mut().zip(words) {
                *slot = word;
            }
        }
        Ok(out)
    }

    fn finish_frame(&self, mut samples: Vec<u16>, geometry: FrameGeometry) -> EngineResult<Frame> {
        let width = self.config.width;
        let mut to_strip = self.config.height - geometry.data_height;
        if self.config.skip_last_row && to_strip > 0 {
            samples.truncate(samples.len() - width);
            to_strip -= 1;
        }
        if self.config.skip_first_row && to_strip > 0 {
            samples.drain(..width);
        }
        if self.config.invert_brightness {
            let max = ((1u32 << geometry.bits_per_sample) - 1) as u16;
            for sample in samples.iter_mut() {
                *sample = max - (*sample & max);
            }
        }
        Frame::new(geometry, samples)
    }
}

impl FrameSource for RawFileSource {
    fn open(&mut self) -> EngineResult<FrameGeometry> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(EngineError::SourceUnavailable(
                "raw file geometry must be non-zero".into(),
            ));
        }
        let path = &self.config.path;
        let file = File::open(path).map_err(|err| {
            EngineError::SourceUnavailable(format!("opening {}: {}", path.display(), err))
        })?;
        let len = file
            .metadata()
            .map_err(|err| EngineError::SourceUnavailable(err.to_string()))?
            .len();
        let frame_bytes = (self.sensor_samples() * SAMPLE_BYTES) as u64;
        let total_frames = len / frame_bytes;
        if total_frames == 0 {
            return Err(EngineError::SourceUnavailable(format!(
                "{} holds less than one {}x{} frame",
                path.display(),
                self.config.width,
                self.config.height
            )));
        }

        let geometry = FrameGeometry::new(self.config.width, self.config.height, self.config.organization)
            .with_bits(self.config.bits_per_sample)
            .with_skipped_rows(self.config.skip_first_row, self.config.skip_last_row);

        info!(
            "opened raw source {} ({} frames, {:?})",
            path.display(),
            total_frames,
            self.config.organization
        );
        self.file = Some(OpenFile {
            reader: BufReader::new(file),
            total_frames,
        });
        self.geometry = Some(geometry);
        self.next_index = 0;
        self.next_deadline = None;
        Ok(geometry)
    }

    fn next_frame(&mut self) -> EngineResult<Option<Frame>> {
        let geometry = self
            .geometry
            .ok_or_else(|| EngineError::SourceUnavailable("raw file not open".into()))?;
        let total = self.total_frames().unwrap_or(0);
        if self.next_index >= total {
            if !self.config.looping {
                debug!("raw source reached end of stream");
                return Ok(None);
            }
            self.next_index = 0;
        }

        self.pace();
        let samples = self.read_sensor_frame(self.next_index)?;
        self.next_index += 1;
        self.finish_frame(samples, geometry).map(Some)
    }

    fn close(&mut self) {
        self.file = None;
        self.geometry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_words(words: &[u16]) -> NamedTempFile {
        let mut temp = NamedTempFile::new().unwrap();
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        temp.write_all(&bytes).unwrap();
        temp.flush().unwrap();
        temp
    }

    #[test]
    fn bil_file_yields_frames_then_end_of_stream() {
        let temp = write_words(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut source = RawFileSource::new(RawFileConfig::new(temp.path(), 2, 2));
        let geometry = source.open().unwrap();
        assert_eq!(geometry.pixels(), 4);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.samples(), &[1, 2, 3, 4]);
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.samples(), &[5, 6, 7, 8]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn bip_file_is_reordered_into_rows() {
        // width 3, two bands; stored as (x0b0 x0b1) (x1b0 x1b1) (x2b0 x2b1)
        let temp = write_words(&[10, 20, 11, 21, 12, 22]);
        let mut config = RawFileConfig::new(temp.path(), 3, 2);
        config.organization = ByteOrganization::Bip;
        let mut source = RawFileSource::new(config);
        source.open().unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.row(0), &[10, 11, 12]);
        assert_eq!(frame.row(1), &[20, 21, 22]);
    }

    #[test]
    fn bsq_file_gathers_lines_across_band_planes() {
        // two lines, width 2, two bands: plane b0 = [l0: 1 2, l1: 3 4], plane b1 = [l0: 5 6, l1: 7 8]
        let temp = write_words(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut config = RawFileConfig::new(temp.path(), 2, 2);
        config.organization = ByteOrganization::Bsq;
        let mut source = RawFileSource::new(config);
        source.open().unwrap();
        assert_eq!(source.next_frame().unwrap().unwrap().samples(), &[1, 2, 5, 6]);
        assert_eq!(source.next_frame().unwrap().unwrap().samples(), &[3, 4, 7, 8]);
    }

    #[test]
    fn header_row_is_stripped_and_looping_restarts() {
        let temp = write_words(&[9, 9, 1, 2]);
        let mut config = RawFileConfig::new(temp.path(), 2, 2);
        config.skip_first_row = true;
        config.looping = true;
        let mut source = RawFileSource::new(config);
        let geometry = source.open().unwrap();
        assert_eq!(geometry.data_height, 1);
        assert_eq!(source.next_frame().unwrap().unwrap().samples(), &[1, 2]);
        assert_eq!(source.next_frame().unwrap().unwrap().samples(), &[1, 2]);
    }

    #[test]
    fn empty_file_is_unavailable() {
        let temp = NamedTempFile::new().unwrap();
        let mut source = RawFileSource::new(RawFileConfig::new(temp.path(), 2, 2));
        assert!(matches!(source.open(), Err(EngineError::SourceUnavailable(_))));
    }
}
