use crate::workflow::config::{MaskConfig, WorkflowConfig};
use anyhow::Context;
use log::{info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use takecore::engine::CaptureSession;
use takecore::processing::ProductSnapshot;
use takecore::telemetry::MetricsSnapshot;
use takecore::{EngineEvent, TakeEngine};
use tokio::sync::broadcast::error::RecvError;

const PRODUCT_SETTLE: Duration = Duration::from_millis(500);

/// Gives the active product a moment to catch up with the final frame.
fn settle_product(engine: &TakeEngine) -> Option<Arc<ProductSnapshot>> {
    let deadline = Instant::now() + PRODUCT_SETTLE;
    loop {
        let latest = engine.latest_product();
        let caught_up = latest
            .as_ref()
            .map_or(false, |product| product.generation >= engine.current_generation());
        if caught_up || engine.active_product().is_none() || Instant::now() >= deadline {
            return latest;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

pub struct WorkflowResult {
    pub frames: u64,
    pub product_updates: u64,
    pub last_product: Option<Arc<ProductSnapshot>>,
    pub mask_frames: Option<u64>,
    pub recording_completed: bool,
    pub errors: Vec<String>,
    pub metrics: MetricsSnapshot,
}

/// Engine with capture running, for the HTTP bridge.
pub struct LiveRun {
    pub engine: Arc<TakeEngine>,
    pub session: CaptureSession,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Builds an engine with the source open and the live settings applied.
    pub fn prepare(&self) -> anyhow::Result<Arc<TakeEngine>> {
        let engine = Arc::new(TakeEngine::new(self.config.to_engine_config()));
        let geometry = engine
            .open(self.config.source.build())
            .context("opening frame source")?;
        info!("workflow source ready at {}", geometry);

        engine.set_crosshair(self.config.crosshair);
        if let Some(MaskConfig::File { path, first, last }) = &self.config.mask {
            engine
                .load_mask_range(path, *first, *last)
                .with_context(|| format!("loading dark frames from {}", path.display()))?;
        }
        engine.toggle_use_dsf(self.config.use_dsf);
        if let Some(product) = self.config.product {
            engine.set_active_product(product);
        }
        Ok(engine)
    }

    fn start_recording(&self, engine: &TakeEngine) -> anyhow::Result<()> {
        if let Some(recording) = &self.config.recording {
            let status = engine
                .start_saving_finite(
                    recording.frame_count,
                    &recording.path,
                    recording.averaging,
                    recording.confirm_overwrite,
                )
                .with_context(|| format!("starting recording to {}", recording.path.display()))?;
            info!(
                "recording {:?} {} frames into {}",
                status.mode,
                status.frame_budget,
                status.path.display()
            );
        }
        Ok(())
    }

    /// Runs the workflow until the source reaches end of stream.
    pub fn execute(&self) -> anyhow::Result<WorkflowResult> {
        let engine = self.prepare()?;
        let mut events = engine.subscribe();

        let live_mask_frames = match &self.config.mask {
            Some(MaskConfig::Live { frames }) => {
                engine.start_mask_capture().context("starting dark capture")?;
                Some((*frames).max(1))
            }
            _ => None,
        };
        self.start_recording(&engine)?;
        let session = engine.start_capture().context("starting capture")?;

        let mut result = WorkflowResult {
            frames: 0,
            product_updates: 0,
            last_product: None,
            mask_frames: None,
            recording_completed: false,
            errors: Vec::new(),
            metrics: MetricsSnapshot::default(),
        };

        loop {
            match events.blocking_recv() {
                Ok(EngineEvent::FrameReady(_)) => {
                    result.frames += 1;
                    let mask_done = live_mask_frames.map_or(false, |n| result.frames >= n);
                    if mask_done && engine.is_capturing_mask() {
                        engine.stop_mask_capture().context("finishing dark capture")?;
                    }
                }
                Ok(EngineEvent::ProductReady(_, snapshot)) => {
                    result.product_updates += 1;
                    result.last_product = Some(snapshot);
                }
                Ok(EngineEvent::MaskReady) => {
                    result.mask_frames = engine.mask().map(|mask| mask.frames());
                }
                Ok(EngineEvent::SavingComplete) => result.recording_completed = true,
                Ok(EngineEvent::Error(kind, message)) => {
                    warn!("engine reported {:?}: {}", kind, message);
                    result.errors.push(message);
                }
                Ok(EngineEvent::CaptureStopped) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("workflow missed {} engine events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }

        drop(session);
        if engine.is_capturing_mask() {
            engine.stop_mask_capture().context("finishing dark capture")?;
            result.mask_frames = engine.mask().map(|mask| mask.frames());
        }
        if engine.stop_saving() {
            result.recording_completed = true;
        }
        engine.wait_for_writers();
        result.last_product = settle_product(&engine).or(result.last_product);
        result.metrics = engine.metrics();
        engine.close();
        Ok(result)
    }

    /// Starts capture and recording and returns immediately.
    pub fn start_live(&self) -> anyhow::Result<LiveRun> {
        let engine = self.prepare()?;
        if let Some(MaskConfig::Live { .. }) = &self.config.mask {
            warn!("live dark capture is driven through the bridge in serve mode");
        }
        self.start_recording(&engine)?;
        let session = engine.start_capture().context("starting capture")?;
        Ok(LiveRun { engine, session })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::config::RecordingConfig;
    use takecore::processing::{ProductData, ProductRequest};

    fn quick_config(frames: u64) -> WorkflowConfig {
        WorkflowConfig::from_args(16, 4, frames, 0.0)
    }

    #[test]
    fn runner_executes_workflow() {
        let mut cfg = quick_config(40);
        cfg.product = Some(ProductRequest::StdDev);
        let result = Runner::new(cfg).execute().unwrap();
        assert!(result.frames <= 40);
        assert_eq!(result.metrics.frames, 40);
        assert!(result.errors.is_empty());
        match result.last_product.as_ref().map(|p| &p.data) {
            Some(ProductData::Frame { width, height, .. }) => assert_eq!((*width, *height), (16, 4)),
            other => panic!("unexpected product {:?}", other),
        }
    }

    #[test]
    fn runner_records_and_builds_live_mask() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.raw");
        let mut cfg = quick_config(30);
        cfg.mask = Some(MaskConfig::Live { frames: 5 });
        cfg.recording = Some(RecordingConfig {
            path: path.clone(),
            frame_count: 20,
            averaging: 4,
            confirm_overwrite: false,
        });
        let result = Runner::new(cfg).execute().unwrap();
        assert!(result.recording_completed);
        assert!(result.mask_frames.is_some());
        assert_eq!(std::fs::read(&path).unwrap().len(), 5 * 16 * 4 * 2);
    }

    #[test]
    fn missing_raw_file_fails_to_prepare() {
        let mut cfg = quick_config(1);
        cfg.source = crate::workflow::config::SourceConfig::RawFile(takecore::source::RawFileConfig::new(
            "/nonexistent/take.raw",
            4,
            4,
        ));
        assert!(Runner::new(cfg).prepare().is_err());
    }
}
