pub mod metrics;
pub mod position;

pub use metrics::{AcquisitionMetrics, MetricsSnapshot};
pub use position::{PositionRecord, TelemetryLogger, POSITION_RECORD_BYTES};
