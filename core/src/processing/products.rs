use crate::prelude::{ProcessingStage, StageConfig, StageInput};
use crate::processing::dark::DarkSubtractStage;
use crate::processing::overlay::{OverlayBounds, OverlayStage, OverlayWidths};
use crate::processing::profile::{MeanProfileStage, ProfileAnchor, ProfileAxis};
use crate::processing::spectrum::{FftInput, SpectrumStage};
use crate::processing::std_dev::StdDevStage;
use serde::{Deserialize, Serialize};

/// Fixed catalog of derived products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    DarkSubtract,
    StdDev,
    MeanProfile,
    Fft,
    OverlaySpans,
}

/// Product selection passed to `set_active_product`, with the shape parameters that
/// belong to that product alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProductRequest {
    DarkSubtract,
    StdDev,
    MeanProfile {
        axis: ProfileAxis,
        #[serde(default)]
        anchor: ProfileAnchor,
    },
    Fft {
        #[serde(default)]
        input: FftInput,
    },
    OverlaySpans,
}

impl ProductRequest {
    pub fn kind(&self) -> ProductKind {
        match self {
            ProductRequest::DarkSubtract => ProductKind::DarkSubtract,
            ProductRequest::StdDev => ProductKind::StdDev,
            ProductRequest::MeanProfile { .. } => ProductKind::MeanProfile,
            ProductRequest::Fft { .. } => ProductKind::Fft,
            ProductRequest::OverlaySpans => ProductKind::OverlaySpans,
        }
    }
}

/// Reference pixel that anchors cross-hair profiles and the overlay spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossHair {
    pub x: i64,
    pub y: i64,
    /// Column the left overlay span is centred on.
    pub start_col: i64,
    /// Column the right overlay span is centred on.
    pub end_col: i64,
}

impl CrossHair {
    pub fn new(x: i64, y: i64, start_col: i64, end_col: i64) -> Self {
        Self {
            x,
            y,
            start_col,
            end_col,
        }
    }
}

/// Parameters adjustable while products are running. Swapped as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveParams {
    pub std_dev_n: usize,
    pub lines_to_average: usize,
    pub overlay_widths: OverlayWidths,
    pub crosshair: Option<CrossHair>,
    pub use_dsf: bool,
    pub zero_dc: bool,
}

impl Default for LiveParams {
    fn default() -> Self {
        Self {
            std_dev_n: 100,
            lines_to_average: 1,
            overlay_widths: OverlayWidths::default(),
            crosshair: None,
            use_dsf: false,
            zero_dc: true,
        }
    }
}

/// Payload of one product computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductData {
    Frame {
        width: usize,
        height: usize,
        values: Vec<f32>,
    },
    Profile {
        axis: ProfileAxis,
        start: usize,
        len: usize,
        values: Vec<f32>,
    },
    Spectrum {
        frequencies: Vec<f64>,
        magnitudes: Vec<f32>,
        zero_dc: bool,
    },
    Overlay {
        bounds: OverlayBounds,
        left: Vec<f32>,
        center: Vec<f32>,
        right: Vec<f32>,
    },
}

/// Read-only result published once per processed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub kind: ProductKind,
    pub generation: u64,
    pub data: ProductData,
}

/// One running instance of a catalog product.
pub enum ProductFilter {
    DarkSubtract(DarkSubtractStage),
    StdDev(StdDevStage),
    MeanProfile(MeanProfileStage),
    Fft(SpectrumStage),
    OverlaySpans(OverlayStage),
}

impl ProductFilter {
    pub fn new(request: ProductRequest) -> Self {
        match request {
            ProductRequest::DarkSubtract => ProductFilter::DarkSubtract(DarkSubtractStage::new()),
            ProductRequest::StdDev => ProductFilter::StdDev(StdDevStage::new()),
            ProductRequest::MeanProfile { axis, anchor } => {
                ProductFilter::MeanProfile(MeanProfileStage::new(axis, anchor))
            }
            ProductRequest::Fft { input } => ProductFilter::Fft(SpectrumStage::new(input)),
            ProductRequest::OverlaySpans => ProductFilter::OverlaySpans(OverlayStage::new()),
        }
    }

    pub fn kind(&self) -> ProductKind {
        match self {
            ProductFilter::DarkSubtract(_) => ProductKind::DarkSubtract,
            ProductFilter::StdDev(_) => ProductKind::StdDev,
            ProductFilter::MeanProfile(_) => ProductKind::MeanProfile,
            ProductFilter::Fft(_) => ProductKind::Fft,
            ProductFilter::OverlaySpans(_) => ProductKind::OverlaySpans,
        }
    }

    fn stage_mut(&mut self) -> &mut dyn ProcessingStage {
        match self {
            ProductFilter::DarkSubtract(stage) => stage,
            ProductFilter::StdDev(stage) => stage,
            ProductFilter::MeanProfile(stage) => stage,
            ProductFilter::Fft(stage) => stage,
            ProductFilter::OverlaySpans(stage) => stage,
        }
    }

    pub fn initialize(&mut self, config: &StageConfig) {
        self.stage_mut().initialize(config);
    }

    pub fn execute(&mut self, input: StageInput<'_>) -> Option<ProductSnapshot> {
        let kind = self.kind();
        let generation = input.generation;
        self.stage_mut()
            .execute(input)
            .map(|data| ProductSnapshot {
                kind,
                generation,
                data,
            })
    }

    pub fn cleanup(&mut self) {
        self.stage_mut().cleanup();
    }
}
