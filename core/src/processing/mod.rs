pub mod dark;
pub mod distributor;
pub mod mask;
pub mod overlay;
pub mod products;
pub mod profile;
pub mod slot;
pub mod spectrum;
pub mod statistics;
pub mod std_dev;

pub use dark::DarkSubtractStage;
pub use distributor::{FrameDistributor, FrameSnapshot};
pub use mask::{load_mask_file, CalibrationMask, MaskBuilder, MaskFileSelection};
pub use overlay::{OverlayBounds, OverlayStage, OverlayWidths, SpanBounds};
pub use products::{CrossHair, LiveParams, ProductData, ProductKind, ProductRequest, ProductSnapshot};
pub use profile::{MeanProfileStage, ProfileAnchor, ProfileAxis};
pub use slot::{ArcCell, ArcSlot};
pub use spectrum::{FftInput, SpectrumStage};
pub use statistics::{ProductContext, ProductSettings, ProductSubscription, StatisticsEngine};
pub use std_dev::{StdDevStage, MAX_STD_DEV_N};
