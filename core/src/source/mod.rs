pub mod frame;
pub mod geometry;
pub mod raw_file;

pub use frame::{Frame, SampleFormat};
pub use geometry::{ByteOrganization, FrameGeometry};
pub use raw_file::{RawFileConfig, RawFileSource};
