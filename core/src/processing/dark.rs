use crate::prelude::{ProcessingStage, StageConfig, StageInput};
use crate::processing::mask::CalibrationMask;
use crate::processing::products::ProductData;
use crate::source::{Frame, SampleFormat};
use log::warn;

/// Pixel-wise `frame - mask` in decoded units. Without a usable mask the decoded frame
/// is returned unchanged. No clamping happens here.
pub fn dark_subtract(frame: &Frame, mask: Option<&CalibrationMask>, format: SampleFormat) -> Vec<f32> {
    let samples = frame.samples();
    match mask.filter(|m| m.matches(frame.geometry())) {
        Some(mask) => samples
            .iter()
            .zip(mask.values())
            .map(|(&raw, &dark)| format.decode(raw) - dark)
            .collect(),
        None => samples.iter().map(|&raw| format.decode(raw)).collect(),
    }
}

/// Decoded frame values the profile-style products work from: dark-subtracted when
/// `use_dsf` is on and a mask is loaded, raw otherwise.
pub fn frame_values(input: &StageInput<'_>, config: &StageConfig) -> Vec<f32> {
    let mask = if config.params.use_dsf { input.mask } else { None };
    dark_subtract(input.frame, mask, config.format)
}

/// Dark-subtracted frame product.
pub struct DarkSubtractStage {
    config: Option<StageConfig>,
    warned_mismatch: bool,
}

impl DarkSubtractStage {
    pub fn new() -> Self {
        Self {
            config: None,
            warned_mismatch: false,
        }
    }
}

impl Default for DarkSubtractStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for DarkSubtractStage {
    fn initialize(&mut self, config: &StageConfig) {
        self.config = Some(config.clone());
    }

    fn execute(&mut self, input: StageInput<'_>) -> Option<ProductData> {
        let format = self.config.as_ref().map(|c| c.format).unwrap_or_default();
        if let Some(mask) = input.mask {
            if !mask.matches(input.frame.geometry()) && !self.warned_mismatch {
                warn!(
                    "dark mask {}x{} does not match {} frames; showing raw values",
                    mask.width(),
                    mask.height(),
                    input.frame.geometry()
                );
                self.warned_mismatch = true;
            }
        }
        Some(ProductData::Frame {
            width: input.frame.width(),
            height: input.frame.height(),
            values: dark_subtract(input.frame, input.mask, format),
        })
    }

    fn cleanup(&mut self) {
        self.config = None;
        self.warned_mismatch = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ByteOrganization, FrameGeometry};

    #[test]
    fn subtraction_is_unclamped() {
        let geometry = FrameGeometry::new(2, 1, ByteOrganization::Bil);
        let frame = Frame::new(geometry, vec![5, 100]).unwrap();
        let mask = CalibrationMask::from_sums(2, 1, vec![20.0, 40.0], 2).unwrap();
        let values = dark_subtract(&frame, Some(&mask), SampleFormat::default());
        assert_eq!(values, vec![-5.0, 80.0]);
    }

    #[test]
    fn twos_complement_samples_subtract_as_signed() {
        let geometry = FrameGeometry::new(1, 1, ByteOrganization::Bil);
        let frame = Frame::new(geometry, vec![0xFFFE]).unwrap();
        let mask = CalibrationMask::from_sums(1, 1, vec![1.0], 1).unwrap();
        let format = SampleFormat {
            twos_complement: true,
        };
        assert_eq!(dark_subtract(&frame, Some(&mask), format), vec![-3.0]);
    }

    #[test]
    fn stage_without_mask_reports_raw_frame() {
        let geometry = FrameGeometry::new(2, 2, ByteOrganization::Bil);
        let frame = Frame::new(geometry, vec![1, 2, 3, 4]).unwrap();
        let mut stage = DarkSubtractStage::new();
        let data = stage
            .execute(StageInput {
                frame: &frame,
                mask: None,
                generation: 1,
            })
            .unwrap();
        match data {
            ProductData::Frame { width, height, values } => {
                assert_eq!((width, height), (2, 2));
                assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
            }
            other => panic!("unexpected product {:?}", other),
        }
    }
}
