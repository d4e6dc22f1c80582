use crate::processing::mask::CalibrationMask;
use crate::processing::products::{LiveParams, ProductData, ProductKind, ProductSnapshot};
use crate::source::{Frame, FrameGeometry, SampleFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Shared configuration for each processing stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub geometry: FrameGeometry,
    pub params: LiveParams,
    pub format: SampleFormat,
    pub max_fps: f64,
    pub fft_window: usize,
}

/// Input for one processing cycle. Borrowed views stay valid only for the cycle.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub frame: &'a Frame,
    pub mask: Option<&'a CalibrationMask>,
    pub generation: u64,
}

/// Trait describing the derived-product stages driven once per distributed frame.
///
/// `execute` returns `None` when the product is disabled for the current parameters
/// (for example a cross-hair anchored profile with no cross-hair set).
pub trait ProcessingStage {
    fn initialize(&mut self, config: &StageConfig);
    fn execute(&mut self, input: StageInput<'_>) -> Option<ProductData>;
    fn cleanup(&mut self);
}

/// Uniform access to a physical or file-backed frame source.
pub trait FrameSource: Send {
    /// Opens the underlying device or file. Geometry is fixed until `close`.
    fn open(&mut self) -> EngineResult<FrameGeometry>;
    /// Blocks until the next frame is available. `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> EngineResult<Option<Frame>>;
    fn close(&mut self);
}

/// Reasons a recording target is refused before any file is touched.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("file name is empty")]
    EmptyPath,
    #[error("invalid character(s) \"{0}\" in file name")]
    DisallowedCharacters(String),
    #[error("file name {0} does not specify an absolute path")]
    NotAbsolute(PathBuf),
    #[error("{0} already exists and overwrite was not confirmed")]
    OverwriteNotConfirmed(PathBuf),
}

/// Common error type for engine operations.
#[derive(thiserror::Error, Debug, Clone)]
pub enum EngineError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("source error: {0}")]
    Source(String),
    #[error("invalid mask file: {0}")]
    MaskFileInvalid(String),
    #[error("geometry mismatch: expected {expected}, found {found}")]
    GeometryMismatch { expected: String, found: String },
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("disk write failure: {0}")]
    DiskWriteFailure(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SourceUnavailable(_) | EngineError::Source(_) => {
                ErrorKind::SourceUnavailable
            }
            EngineError::MaskFileInvalid(_) => ErrorKind::MaskFileInvalid,
            EngineError::GeometryMismatch { .. } => ErrorKind::GeometryMismatch,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::DiskWriteFailure(_) => ErrorKind::DiskWriteFailure,
            EngineError::InvalidState(_) => ErrorKind::InvalidState,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Error category carried by [`EngineEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    SourceUnavailable,
    MaskFileInvalid,
    GeometryMismatch,
    Validation,
    DiskWriteFailure,
    InvalidState,
}

/// Notifications raised towards presentation and control collaborators.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    FrameReady(u64),
    FpsUpdate(f64),
    ProductReady(ProductKind, Arc<ProductSnapshot>),
    MaskReady,
    SavingProgress(u64),
    SavingComplete,
    SavingOverrun(u64),
    CaptureStopped,
    Error(ErrorKind, String),
}

impl EngineEvent {
    pub fn from_error(err: &EngineError) -> Self {
        EngineEvent::Error(err.kind(), err.to_string())
    }
}
