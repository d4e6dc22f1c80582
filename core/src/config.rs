use crate::processing::overlay::OverlayWidths;
use crate::processing::std_dev::MAX_STD_DEV_N;
use crate::source::{ByteOrganization, SampleFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Immutable engine configuration. Built once at startup; `TakeEngine::reload` swaps in a
/// freshly built value instead of mutating shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Highest frame rate the source can reach; sets the FFT frequency axis.
    pub max_fps: f64,
    /// Length of the trailing time series fed to the FFT.
    pub fft_window: usize,
    pub std_dev_n: usize,
    pub lines_to_average: usize,
    pub overlay_widths: OverlayWidths,
    pub zero_dc: bool,
    pub twos_complement: bool,
    /// Refuse to overwrite an existing recording target unless the caller confirms.
    pub check_for_overwrites: bool,
    /// Records waiting for the writer before the oldest is dropped.
    pub write_queue_depth: usize,
    pub recording_organization: ByteOrganization,
    /// Pair every recording with a positional telemetry log.
    pub flight_mode: bool,
    /// Directory for generated flight-mode file names.
    pub data_location: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_fps: 100.0,
            fft_window: 1024,
            std_dev_n: 100,
            lines_to_average: 1,
            overlay_widths: OverlayWidths::default(),
            zero_dc: true,
            twos_complement: false,
            check_for_overwrites: true,
            write_queue_depth: 32,
            recording_organization: ByteOrganization::Bil,
            flight_mode: false,
            data_location: PathBuf::from("/tmp"),
        }
    }
}

impl EngineConfig {
    pub fn sample_format(&self) -> SampleFormat {
        SampleFormat {
            twos_complement: self.twos_complement,
        }
    }

    /// Copy of this configuration with every field pulled into its supported range.
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        if !(config.max_fps.is_finite() && config.max_fps > 0.0) {
            config.max_fps = Self::default().max_fps;
        }
        config.fft_window = config.fft_window.max(2);
        config.std_dev_n = config.std_dev_n.clamp(1, MAX_STD_DEV_N - 1);
        config.lines_to_average = config.lines_to_average.max(1);
        config.overlay_widths = config.overlay_widths.clamped();
        config.write_queue_depth = config.write_queue_depth.max(1);
        config
    }
}
