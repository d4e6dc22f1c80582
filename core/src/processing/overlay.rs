use crate::math::{MatrixHelper, StatsHelper};
use crate::prelude::{ProcessingStage, StageConfig, StageInput};
use crate::processing::dark::frame_values;
use crate::processing::products::{CrossHair, ProductData};
use serde::{Deserialize, Serialize};

pub const MIN_OVERLAY_WIDTH: usize = 1;
pub const MAX_OVERLAY_WIDTH: usize = 160;

/// Column widths of the left, centre and right overlay spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayWidths {
    pub left: usize,
    pub center: usize,
    pub right: usize,
}

impl Default for OverlayWidths {
    fn default() -> Self {
        Self {
            left: 20,
            center: 20,
            right: 20,
        }
    }
}

impl OverlayWidths {
    pub fn new(left: usize, center: usize, right: usize) -> Self {
        Self { left, center, right }
    }

    pub fn clamped(&self) -> Self {
        let clamp = |w: usize| w.clamp(MIN_OVERLAY_WIDTH, MAX_OVERLAY_WIDTH);
        Self {
            left: clamp(self.left),
            center: clamp(self.center),
            right: clamp(self.right),
        }
    }
}

/// Half-open column range `start..end` of one span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanBounds {
    pub start: usize,
    pub end: usize,
}

impl SpanBounds {
    /// Places `width` columns starting at `anchor - width/2`, then clamps both bounds
    /// into `[0, width_px - 1]` on their own. A span may collapse when the anchor is far
    /// outside the frame.
    fn around(anchor: i64, width: usize, width_px: usize) -> Self {
        let start = anchor.saturating_sub((width / 2) as i64);
        Self {
            start: StatsHelper::clamp_index(start, width_px),
            end: StatsHelper::clamp_index(start.saturating_add(width as i64), width_px),
        }
    }

    /// Columns to average. A collapsed span keeps its start column.
    pub fn columns(&self) -> (usize, usize) {
        if self.end <= self.start {
            (self.start, self.start + 1)
        } else {
            (self.start, self.end)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayBounds {
    pub left: SpanBounds,
    pub center: SpanBounds,
    pub right: SpanBounds,
}

/// Derives the three span windows for a frame `width_px` columns wide.
pub fn overlay_bounds(crosshair: &CrossHair, widths: &OverlayWidths, width_px: usize) -> OverlayBounds {
    let widths = widths.clamped();
    OverlayBounds {
        left: SpanBounds::around(crosshair.start_col, widths.left, width_px),
        center: SpanBounds::around(crosshair.x, widths.center, width_px),
        right: SpanBounds::around(crosshair.end_col, widths.right, width_px),
    }
}

/// Per-row means over the three spans around the cross-hair.
pub struct OverlayStage {
    config: Option<StageConfig>,
}

impl OverlayStage {
    pub fn new() -> Self {
        Self { config: None }
    }
}

impl Default for OverlayStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for OverlayStage {
    fn initialize(&mut self, config: &StageConfig) {
        self.config = Some(config.clone());
    }

    fn execute(&mut self, input: StageInput<'_>) -> Option<ProductData> {
        let config = self.config.as_ref()?;
        let crosshair = config.params.crosshair?;
        let width = input.frame.width();
        let height = input.frame.height();
        let bounds = overlay_bounds(&crosshair, &config.params.overlay_widths, width);

        let values = frame_values(&input, config);
        let view = MatrixHelper::view(&values, height, width)?;
        let span = |bounds: &SpanBounds| {
            let (start, end) = bounds.columns();
            MatrixHelper::row_means(view, start, end)
        };
        Some(ProductData::Overlay {
            bounds,
            left: span(&bounds.left),
            center: span(&bounds.center),
            right: span(&bounds.right),
        })
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}
