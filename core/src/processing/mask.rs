use crate::prelude::{EngineError, EngineResult};
use crate::source::geometry::SAMPLE_BYTES;
use crate::source::{Frame, FrameGeometry, SampleFormat};
use log::{debug, info, warn};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Per-pixel dark-frame average.
///
/// Holds the raw accumulator and its divisor; the averaged values are derived once at
/// construction so dark subtraction reads a plain slice.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationMask {
    width: usize,
    height: usize,
    sums: Vec<f64>,
    frames: u64,
    means: Vec<f32>,
}

impl CalibrationMask {
    pub fn from_sums(width: usize, height: usize, sums: Vec<f64>, frames: u64) -> EngineResult<Self> {
        if sums.len() != width * height {
            return Err(EngineError::MaskFileInvalid(format!(
                "accumulator holds {} values for a {}x{} mask",
                sums.len(),
                width,
                height
            )));
        }
        if frames == 0 {
            return Err(EngineError::MaskFileInvalid(
                "mask built from zero frames".into(),
            ));
        }
        let divisor = frames as f64;
        let means = sums.iter().map(|s| (s / divisor) as f32).collect();
        Ok(Self {
            width,
            height,
            sums,
            frames,
            means,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of frames averaged into the mask.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn sums(&self) -> &[f64] {
        &self.sums
    }

    pub fn values(&self) -> &[f32] {
        &self.means
    }

    pub fn matches(&self, geometry: &FrameGeometry) -> bool {
        self.width == geometry.width && self.height == geometry.data_height
    }

    pub fn check_geometry(&self, geometry: &FrameGeometry) -> EngineResult<()> {
        if self.matches(geometry) {
            Ok(())
        } else {
            Err(EngineError::GeometryMismatch {
                expected: geometry.to_string(),
                found: format!("{}x{}", self.width, self.height),
            })
        }
    }
}

struct Accumulator {
    geometry: FrameGeometry,
    format: SampleFormat,
    sums: Vec<f64>,
    frames: u64,
}

/// Builds a mask from live frames between `start` and `finish`.
///
/// Frames are folded in under the builder's own lock, so `finish` always observes a
/// whole number of frames.
pub struct MaskBuilder {
    capturing: AtomicBool,
    accumulator: Mutex<Option<Accumulator>>,
}

impl MaskBuilder {
    pub fn new() -> Self {
        Self {
            capturing: AtomicBool::new(false),
            accumulator: Mutex::new(None),
        }
    }

    pub fn start(&self, geometry: FrameGeometry, format: SampleFormat) {
        let mut guard = self.accumulator.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Accumulator {
            geometry,
            format,
            sums: vec![0.0; geometry.pixels()],
            frames: 0,
        });
        self.capturing.store(true, Ordering::Release);
        info!("dark mask capture started for {}", geometry);
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    /// Adds one frame to an active capture; returns false when nothing is capturing.
    pub fn accumulate(&self, frame: &Frame) -> bool {
        if !self.is_capturing() {
            return false;
        }
        let mut guard = self.accumulator.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(acc) = guard.as_mut() else {
            return false;
        };
        if !acc.geometry.same_shape(frame.geometry()) {
            warn!(
                "dark capture skipped a {} frame (capturing {})",
                frame.geometry(),
                acc.geometry
            );
            return false;
        }
        let format = acc.format;
        for (sum, &raw) in acc.sums.iter_mut().zip(frame.samples()) {
            *sum += format.decode(raw) as f64;
        }
        acc.frames += 1;
        true
    }

    /// Stops capturing and returns the averaged mask, or `None` if no frame arrived.
    pub fn finish(&self) -> Option<CalibrationMask> {
        self.capturing.store(false, Ordering::Release);
        let acc = self
            .accumulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        if acc.frames == 0 {
            warn!("dark mask capture stopped before any frame arrived");
            return None;
        }
        info!("dark mask finished over {} frames", acc.frames);
        CalibrationMask::from_sums(acc.geometry.width, acc.geometry.data_height, acc.sums, acc.frames)
            .ok()
    }
}

impl Default for MaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Element range of a dark-frame file selected for averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskFileSelection {
    /// Samples to read; always a whole number of frames.
    pub element_count: u64,
    /// Samples to skip from the start of the file.
    pub element_offset: u64,
}

impl MaskFileSelection {
    pub fn frames_in_file(file_len: u64, geometry: &FrameGeometry) -> u64 {
        file_len / geometry.frame_bytes().max(1) as u64
    }

    /// Selects the inclusive, 1-indexed frame range `lo..=hi` of a file of `file_len` bytes.
    ///
    /// Bounds outside `[1, frames]` are pulled back into range first. A range that
    /// collapses to zero frames reads exactly one frame; a reversed range is rejected.
    pub fn from_frame_range(
        file_len: u64,
        geometry: &FrameGeometry,
        lo: i64,
        hi: i64,
    ) -> EngineResult<Self> {
        if file_len == 0 {
            return Err(EngineError::MaskFileInvalid(
                "mask file contains no data".into(),
            ));
        }
        let total = Self::frames_in_file(file_len, geometry) as i64;
        if total == 0 {
            return Err(EngineError::MaskFileInvalid(format!(
                "mask file is shorter than one {} frame",
                geometry
            )));
        }
        let lo = lo.clamp(1, total);
        let hi = hi.clamp(1, total);
        let frame_size = geometry.pixels() as u64;
        let frames = hi - lo + 1;
        let frames = match frames {
            n if n > 0 => n as u64,
            0 => 1,
            _ => {
                return Err(EngineError::MaskFileInvalid(format!(
                    "selected frame range {}..{} is reversed",
                    lo, hi
                )))
            }
        };
        Ok(Self {
            element_count: frames * frame_size,
            element_offset: (lo as u64 - 1) * frame_size,
        })
    }
}

/// Averages `selection` out of a raw dark-frame file into a new mask.
pub fn load_mask_file(
    path: &Path,
    geometry: &FrameGeometry,
    selection: MaskFileSelection,
    format: SampleFormat,
) -> EngineResult<CalibrationMask> {
    let invalid = |msg: String| EngineError::MaskFileInvalid(format!("{}: {}", path.display(), msg));
    let mut file = File::open(path).map_err(|err| invalid(err.to_string()))?;
    let len = file
        .metadata()
        .map_err(|err| invalid(err.to_string()))?
        .len();
    if len == 0 {
        return Err(invalid("file contains no data".into()));
    }

    let frame_size = geometry.pixels() as u64;
    if selection.element_count == 0 || selection.element_count % frame_size != 0 {
        return Err(invalid(format!(
            "{} elements is not a whole number of {} frames",
            selection.element_count, geometry
        )));
    }
    let start = selection.element_offset * SAMPLE_BYTES as u64;
    let byte_count = selection.element_count * SAMPLE_BYTES as u64;
    if start + byte_count > len {
        return Err(invalid(format!(
            "range {}..{} runs past the end of a {} byte file",
            start,
            start + byte_count,
            len
        )));
    }

    file.seek(SeekFrom::Start(start))
        .map_err(|err| invalid(err.to_string()))?;
    let frames = selection.element_count / frame_size;
    let mut sums = vec![0.0f64; frame_size as usize];
    let mut raw = vec![0u8; geometry.frame_bytes()];
    for _ in 0..frames {
        file.read_exact(&mut raw)
            .map_err(|err| invalid(err.to_string()))?;
        for (sum, pair) in sums.iter_mut().zip(raw.chunks_exact(SAMPLE_BYTES)) {
            *sum += format.decode(u16::from_le_bytes([pair[0], pair[1]])) as f64;
        }
    }
    debug!(
        "mask loaded from {} ({} frames at offset {})",
        path.display(),
        frames,
        selection.element_offset
    );
    CalibrationMask::from_sums(geometry.width, geometry.data_height, sums, frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ByteOrganization;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn geometry() -> FrameGeometry {
        FrameGeometry::new(3, 2, ByteOrganization::Bil)
    }

    fn write_frames(frames: &[Vec<u16>]) -> NamedTempFile {
        let mut temp = NamedTempFile::new().unwrap();
        for frame in frames {
            let bytes: Vec<u8> = frame.iter().flat_map(|w| w.to_le_bytes()).collect();
            temp.write_all(&bytes).unwrap();
        }
        temp.flush().unwrap();
        temp
    }

    #[test]
    fn file_range_mask_equals_pixel_mean_of_selected_frames() {
        let mut rng = StdRng::seed_from_u64(7);
        let frames: Vec<Vec<u16>> = (0..6)
            .map(|_| (0..6).map(|_| rng.gen_range(0..4096)).collect())
            .collect();
        let temp = write_frames(&frames);
        let len = temp.as_file().metadata().unwrap().len();

        for (lo, hi) in [(1, 6), (2, 4), (5, 5), (3, 6)] {
            let selection = MaskFileSelection::from_frame_range(len, &geometry(), lo, hi).unwrap();
            let mask =
                load_mask_file(temp.path(), &geometry(), selection, SampleFormat::default()).unwrap();
            let chosen = &frames[(lo - 1) as usize..hi as usize];
            assert_eq!(mask.frames(), chosen.len() as u64);
            for pixel in 0..6 {
                let expected: f64 =
                    chosen.iter().map(|f| f[pixel] as f64).sum::<f64>() / chosen.len() as f64;
                assert!((mask.values()[pixel] as f64 - expected).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn collapsed_range_reads_one_frame_and_reversed_range_fails() {
        let len = (geometry().frame_bytes() * 4) as u64;
        let one = MaskFileSelection::from_frame_range(len, &geometry(), 3, 2).unwrap();
        assert_eq!(one.element_count, 6);
        assert_eq!(one.element_offset, 12);
        assert!(matches!(
            MaskFileSelection::from_frame_range(len, &geometry(), 4, 1),
            Err(EngineError::MaskFileInvalid(_))
        ));
    }

    #[test]
    fn out_of_range_bounds_are_corrected() {
        let len = (geometry().frame_bytes() * 4) as u64;
        let selection = MaskFileSelection::from_frame_range(len, &geometry(), -2, 99).unwrap();
        assert_eq!(selection.element_offset, 0);
        assert_eq!(selection.element_count, 24);
    }

    #[test]
    fn empty_file_is_invalid() {
        let temp = NamedTempFile::new().unwrap();
        assert!(MaskFileSelection::from_frame_range(0, &geometry(), 1, 1).is_err());
        let selection = MaskFileSelection {
            element_count: 6,
            element_offset: 0,
        };
        let result = load_mask_file(temp.path(), &geometry(), selection, SampleFormat::default());
        assert!(matches!(result, Err(EngineError::MaskFileInvalid(_))));
    }

    #[test]
    fn short_file_is_invalid() {
        let temp = write_frames(&[vec![1; 6]]);
        let selection = MaskFileSelection {
            element_count: 12,
            element_offset: 0,
        };
        assert!(load_mask_file(temp.path(), &geometry(), selection, SampleFormat::default()).is_err());
    }

    #[test]
    fn live_capture_averages_whole_frames_only() {
        let builder = MaskBuilder::new();
        let frame_a = Frame::filled(geometry(), 10);
        let frame_b = Frame::filled(geometry(), 20);
        assert!(!builder.accumulate(&frame_a));

        builder.start(geometry(), SampleFormat::default());
        assert!(builder.accumulate(&frame_a));
        assert!(builder.accumulate(&frame_b));
        let mask = builder.finish().unwrap();
        assert_eq!(mask.frames(), 2);
        assert!(mask.values().iter().all(|&v| v == 15.0));
        assert!(!builder.accumulate(&frame_a));
        assert!(builder.finish().is_none());
    }

    #[test]
    fn mask_geometry_is_checked() {
        let mask = CalibrationMask::from_sums(3, 2, vec![0.0; 6], 1).unwrap();
        assert!(mask.check_geometry(&geometry()).is_ok());
        let other = FrameGeometry::new(4, 2, ByteOrganization::Bil);
        assert!(matches!(
            mask.check_geometry(&other),
            Err(EngineError::GeometryMismatch { .. })
        ));
    }
}
