use crate::math::{FftHelper, StatsHelper};
use crate::prelude::{ProcessingStage, StageConfig, StageInput};
use crate::processing::dark::frame_values;
use crate::processing::products::ProductData;
use crate::processing::profile::{derive_window, mean_profile, ProfileAnchor, ProfileAxis};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Per-frame scalar fed into the spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FftInput {
    #[default]
    FrameMean,
    /// Mean of the spectral profile centred on the cross-hair column.
    CrossHairProfile,
}

/// Frequency of each reported bin for a window of `len` samples.
pub fn bin_frequencies(max_fps: f64, len: usize) -> Vec<f64> {
    let half = len / 2;
    if half == 0 {
        return Vec::new();
    }
    let increment = (max_fps / 2.0) / half as f64;
    (0..half).map(|i| i as f64 * increment).collect()
}

/// Magnitude spectrum of a trailing per-frame scalar series.
pub struct SpectrumStage {
    input: FftInput,
    config: Option<StageConfig>,
    history: VecDeque<f32>,
    fft: Option<FftHelper>,
    series: Vec<f32>,
}

impl SpectrumStage {
    pub fn new(input: FftInput) -> Self {
        Self {
            input,
            config: None,
            history: VecDeque::new(),
            fft: None,
            series: Vec::new(),
        }
    }

    fn sample(&self, input: &StageInput<'_>, config: &StageConfig) -> Option<f32> {
        let values = frame_values(input, config);
        match self.input {
            FftInput::FrameMean => Some(StatsHelper::mean(&values)),
            FftInput::CrossHairProfile => {
                let width = input.frame.width();
                let height = input.frame.height();
                let window = derive_window(
                    ProfileAxis::Spectral,
                    ProfileAnchor::CrossHair,
                    config.params.lines_to_average,
                    width,
                    config.params.crosshair.as_ref(),
                )?;
                let profile = mean_profile(&values, width, height, ProfileAxis::Spectral, window);
                Some(StatsHelper::mean(&profile))
            }
        }
    }

    /// Oldest-first series of exactly `len` samples, zero-padded on the older side.
    fn fill_series(&mut self, len: usize) {
        self.series.clear();
        self.series.resize(len - self.history.len(), 0.0);
        self.series.extend(self.history.iter().copied());
    }
}

impl ProcessingStage for SpectrumStage {
    fn initialize(&mut self, config: &StageConfig) {
        let len = config.fft_window.max(2);
        if self.fft.as_ref().map_or(true, |fft| fft.len() != len) {
            self.fft = Some(FftHelper::new(len));
            self.history.clear();
        }
        self.config = Some(config.clone());
    }

    fn execute(&mut self, input: StageInput<'_>) -> Option<ProductData> {
        let config = self.config.as_ref()?;
        let sample = self.sample(&input, config)?;
        let max_fps = config.max_fps;
        let zero_dc = config.params.zero_dc;

        let len = self.fft.as_ref()?.len();
        while self.history.len() >= len {
            self.history.pop_front();
        }
        self.history.push_back(sample);
        self.fill_series(len);

        let fft = self.fft.as_mut()?;
        let mut magnitudes = fft.half_magnitudes(&self.series);
        if zero_dc {
            if let Some(dc) = magnitudes.first_mut() {
                *dc = 0.0;
            }
        }
        Some(ProductData::Spectrum {
            frequencies: bin_frequencies(max_fps, len),
            magnitudes,
            zero_dc,
        })
    }

    fn cleanup(&mut self) {
        self.history.clear();
        self.series.clear();
        self.config = None;
    }
}
