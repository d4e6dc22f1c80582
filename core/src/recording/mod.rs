pub mod naming;
pub mod queue;
pub mod service;
pub mod validation;

pub use naming::{sidecar_path_for, telemetry_path_for, FilenameGenerator};
pub use queue::WriteQueue;
pub use service::{
    normalize_budget, CompletionHook, RecordingMode, RecordingRequest, RecordingService, RecordingSettings,
    RecordingSidecar, RecordingStatus,
};
pub use validation::{validate_target, DISALLOWED_CHARACTERS};
