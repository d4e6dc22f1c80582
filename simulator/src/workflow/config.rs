use crate::generator::{GeneratorConfig, SyntheticSource};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use takecore::prelude::FrameSource;
use takecore::processing::{CrossHair, ProductRequest};
use takecore::source::{RawFileConfig, RawFileSource};
use takecore::EngineConfig;

/// Where frames come from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfig {
    Synthetic(GeneratorConfig),
    RawFile(RawFileConfig),
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Synthetic(GeneratorConfig::default())
    }
}

impl SourceConfig {
    pub fn build(&self) -> Box<dyn FrameSource> {
        match self {
            SourceConfig::Synthetic(config) => Box::new(SyntheticSource::new(config.clone())),
            SourceConfig::RawFile(config) => Box::new(RawFileSource::new(config.clone())),
        }
    }
}

/// Dark mask taken before the main run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskConfig {
    /// Average the first `frames` live frames.
    Live { frames: u64 },
    /// Average the inclusive 1-indexed frame range `first..=last` of a dark file.
    File { path: PathBuf, first: i64, last: i64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    pub path: PathBuf,
    /// Zero records until the run ends.
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

fn default_bridge_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub product: Option<ProductRequest>,
    #[serde(default)]
    pub crosshair: Option<CrossHair>,
    #[serde(default)]
    pub use_dsf: bool,
    #[serde(default)]
    pub mask: Option<MaskConfig>,
    #[serde(default)]
    pub recording: Option<RecordingConfig>,
    #[serde(default = "default_bridge_address")]
    pub bridge_address: SocketAddr,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            engine: EngineConfig::default(),
            product: None,
            crosshair: None,
            use_dsf: false,
            mask: None,
            recording: None,
            bridge_address: default_bridge_address(),
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Re-reads `path`. On error the current value is kept and the error returned.
    pub fn reload<P: AsRef<Path>>(&mut self, path: P) -> anyhow::Result<bool> {
        let fresh = Self::load(path)?;
        let changed = fresh != *self;
        *self = fresh;
        Ok(changed)
    }

    /// Synthetic workflow built from command-line values.
    pub fn from_args(width: usize, height: usize, frames: u64, frame_rate: f64) -> Self {
        Self {
            source: SourceConfig::Synthetic(GeneratorConfig {
                width,
                height,
                frame_count: Some(frames),
                frame_rate: Some(frame_rate).filter(|rate| *rate > 0.0),
                ..GeneratorConfig::default()
            }),
            ..Self::default()
        }
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        let mut engine = self.engine.clone();
        if let SourceConfig::Synthetic(generator) = &self.source {
            if let Some(rate) = generator.frame_rate.filter(|rate| *rate > 0.0) {
                engine.max_fps = engine.max_fps.max(rate);
            }
        }
        engine.normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use takecore::processing::ProfileAxis;
    use tempfile::NamedTempFile;

    #[test]
    fn config_from_args_produces_engine_config() {
        let cfg = WorkflowConfig::from_args(32, 8, 10, 250.0);
        assert_eq!(cfg.to_engine_config().max_fps, 250.0);
        match cfg.source {
            SourceConfig::Synthetic(generator) => assert_eq!(generator.width, 32),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"source:\n  raw_file:\n    path: /data/dark.raw\n    width: 640\n    height: 481\n    skip_first_row: true\n\
engine:\n  std_dev_n: 50\n  flight_mode: true\n\
product:\n  kind: mean_profile\n  axis: spectral\n\
mask:\n  file:\n    path: /data/dark.raw\n    first: 1\n    last: 10\n\
recording:\n  path: /data/take.raw\n  frame_count: 100\n  averaging: 5\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.engine.std_dev_n, 50);
        assert!(cfg.engine.flight_mode);
        assert!(matches!(cfg.source, SourceConfig::RawFile(ref raw) if raw.skip_first_row));
        assert!(matches!(
            cfg.product,
            Some(ProductRequest::MeanProfile {
                axis: ProfileAxis::Spectral,
                ..
            })
        ));
        assert_eq!(cfg.recording.as_ref().map(|r| r.averaging), Some(5));
        assert_eq!(cfg.bridge_address, default_bridge_address());
    }

    #[test]
    fn reload_reports_changes_and_keeps_value_on_error() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"engine:\n  fft_window: 256\n").unwrap();
        let mut cfg = WorkflowConfig::default();
        assert!(cfg.reload(temp.path()).unwrap());
        assert_eq!(cfg.engine.fft_window, 256);
        assert!(!cfg.reload(temp.path()).unwrap());

        assert!(cfg.reload("/nonexistent/workflow.yaml").is_err());
        assert_eq!(cfg.engine.fft_window, 256);
    }
}
