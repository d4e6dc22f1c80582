//! Acquisition, statistics and recording engine for live hyperspectral frame streams.
//!
//! Frames flow from a [`FrameSource`] through a single-slot distributor into independent
//! product workers (dark subtraction, standard deviation, mean profiles, FFT, overlay spans)
//! while the recording service streams them to disk on its own writer thread.

pub mod config;
pub mod engine;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod recording;
pub mod source;
pub mod telemetry;

pub use config::EngineConfig;
pub use engine::{CaptureSession, TakeEngine};
pub use prelude::{EngineError, EngineEvent, EngineResult, FrameSource, ProcessingStage};
