use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Point-in-time copy of the acquisition counters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub frames: u64,
    pub source_errors: u64,
    pub write_overruns: u64,
    pub fps: f64,
}

pub struct AcquisitionMetrics {
    inner: Mutex<Metrics>,
}

struct Metrics {
    frames: u64,
    source_errors: u64,
    write_overruns: u64,
    fps: f64,
    window_start: Option<Instant>,
    window_frames: u64,
}

impl AcquisitionMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics {
                frames: 0,
                source_errors: 0,
                write_overruns: 0,
                fps: 0.0,
                window_start: None,
                window_frames: 0,
            }),
        }
    }

    /// Counts a frame. Returns the new rate whenever a one-second window closes.
    pub fn record_frame(&self) -> Option<f64> {
        self.record_frame_at(Instant::now())
    }

    pub fn record_frame_at(&self, now: Instant) -> Option<f64> {
        let Ok(mut metrics) = self.inner.lock() else {
            return None;
        };
        metrics.frames += 1;
        let start = *metrics.window_start.get_or_insert(now);
        metrics.window_frames += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed < FPS_WINDOW {
            return None;
        }
        let fps = (metrics.window_frames - 1) as f64 / elapsed.as_secs_f64();
        metrics.fps = fps;
        metrics.window_start = Some(now);
        metrics.window_frames = 1;
        Some(fps)
    }

    pub fn record_error(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.source_errors += 1;
        }
    }

    pub fn set_write_overruns(&self, count: u64) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.write_overruns = count;
        }
    }

    pub fn fps(&self) -> f64 {
        self.inner.lock().map(|metrics| metrics.fps).unwrap_or(0.0)
    }

    /// Clears the rate window, e.g. when a capture restarts. Totals are kept.
    pub fn reset_rate(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.fps = 0.0;
            metrics.window_start = None;
            metrics.window_frames = 0;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            MetricsSnapshot {
                frames: metrics.frames,
                source_errors: metrics.source_errors,
                write_overruns: metrics.write_overruns,
                fps: metrics.fps,
            }
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for AcquisitionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_reported_once_per_window() {
        let metrics = AcquisitionMetrics::new();
        let start = Instant::now();
        assert_eq!(metrics.record_frame_at(start), None);
        for i in 1..50u64 {
            assert_eq!(metrics.record_frame_at(start + Duration::from_millis(i * 20)), None);
        }
        let fps = metrics
            .record_frame_at(start + Duration::from_millis(1000))
            .unwrap();
        assert!((fps - 50.0).abs() < 1e-9);
        assert_eq!(metrics.snapshot().frames, 51);
        assert_eq!(metrics.fps(), fps);
    }

    #[test]
    fn counters_accumulate() {
        let metrics = AcquisitionMetrics::new();
        metrics.record_error();
        metrics.record_error();
        metrics.set_write_overruns(3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.source_errors, 2);
        assert_eq!(snapshot.write_overruns, 3);
        metrics.reset_rate();
        assert_eq!(metrics.fps(), 0.0);
    }
}
