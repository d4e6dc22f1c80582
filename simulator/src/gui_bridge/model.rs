use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use takecore::processing::ProductKind;
use takecore::recording::RecordingStatus;
use takecore::telemetry::MetricsSnapshot;
use takecore::TakeEngine;

/// Engine state served on `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusModel {
    pub frame_width: usize,
    pub frame_height: usize,
    pub data_height: usize,
    pub generation: u64,
    pub fps: f64,
    pub capturing: bool,
    pub using_dsf: bool,
    pub active_product: Option<ProductKind>,
    pub recording: Option<RecordingStatus>,
    pub telemetry_active: bool,
    pub metrics: MetricsSnapshot,
}

impl StatusModel {
    pub fn capture(engine: &TakeEngine) -> Self {
        Self {
            frame_width: engine.frame_width(),
            frame_height: engine.frame_height(),
            data_height: engine.data_height(),
            generation: engine.current_generation(),
            fps: engine.current_fps(),
            capturing: engine.is_capturing(),
            using_dsf: engine.using_dsf(),
            active_product: engine.active_product(),
            recording: engine.recording_status(),
            telemetry_active: engine.telemetry_active(),
            metrics: engine.metrics(),
        }
    }
}

/// Body of `POST /save`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRequest {
    pub path: PathBuf,
    /// Zero records until `POST /stop`.
    #[serde(default)]
    pub frame_count: u64,
    #[serde(default = "default_averaging")]
    pub averaging: u64,
    #[serde(default)]
    pub confirm_overwrite: bool,
}

fn default_averaging() -> u64 {
    1
}
