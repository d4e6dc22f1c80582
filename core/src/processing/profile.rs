use crate::math::{MatrixHelper, StatsHelper};
use crate::prelude::{ProcessingStage, StageConfig, StageInput};
use crate::processing::dark::frame_values;
use crate::processing::products::{CrossHair, ProductData};
use serde::{Deserialize, Serialize};

/// Direction a mean profile runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileAxis {
    /// One value per row, averaged over a window of columns.
    Spectral,
    /// One value per column, averaged over a window of rows.
    Spatial,
}

impl ProfileAxis {
    /// Length of the axis the averaging window slides along.
    pub fn window_axis_len(&self, width: usize, height: usize) -> usize {
        match self {
            ProfileAxis::Spectral => width,
            ProfileAxis::Spatial => height,
        }
    }

    fn crosshair_coordinate(&self, crosshair: &CrossHair) -> i64 {
        match self {
            ProfileAxis::Spectral => crosshair.x,
            ProfileAxis::Spatial => crosshair.y,
        }
    }
}

/// Where the averaging window sits on its axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileAnchor {
    /// Whole axis.
    Full,
    #[default]
    Centered,
    Start(usize),
    CrossHair,
}

/// Averaging window `start..start + len` on the window axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileWindow {
    pub start: usize,
    pub len: usize,
}

impl ProfileWindow {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Derives the averaging window. `None` means the anchor cannot be resolved, which
/// only happens for a cross-hair anchor without a cross-hair.
pub fn derive_window(
    axis: ProfileAxis,
    anchor: ProfileAnchor,
    lines: usize,
    axis_len: usize,
    crosshair: Option<&CrossHair>,
) -> Option<ProfileWindow> {
    if axis_len == 0 {
        return Some(ProfileWindow { start: 0, len: 0 });
    }
    let lines = lines.clamp(1, axis_len);
    let window = match anchor {
        ProfileAnchor::Full => ProfileWindow {
            start: 0,
            len: axis_len,
        },
        ProfileAnchor::Centered => {
            let len = StatsHelper::odd_floor(lines);
            ProfileWindow {
                start: (axis_len - len) / 2,
                len,
            }
        }
        ProfileAnchor::Start(start) => ProfileWindow {
            start: start.min(axis_len - lines),
            len: lines,
        },
        ProfileAnchor::CrossHair => {
            let centre = axis.crosshair_coordinate(crosshair?);
            let len = StatsHelper::odd_floor(lines);
            let start = centre.saturating_sub((len / 2) as i64);
            ProfileWindow {
                start: StatsHelper::clamp_index(start, axis_len - len + 1),
                len,
            }
        }
    };
    Some(window)
}

/// Computes one profile for a row-major `height x width` value buffer.
pub fn mean_profile(values: &[f32], width: usize, height: usize, axis: ProfileAxis, window: ProfileWindow) -> Vec<f32> {
    let Some(view) = MatrixHelper::view(values, height, width) else {
        return Vec::new();
    };
    match axis {
        ProfileAxis::Spectral => MatrixHelper::row_means(view, window.start, window.end()),
        ProfileAxis::Spatial => MatrixHelper::column_means(view, window.start, window.end()),
    }
}

/// Mean profile product along one axis.
pub struct MeanProfileStage {
    axis: ProfileAxis,
    anchor: ProfileAnchor,
    config: Option<StageConfig>,
}

impl MeanProfileStage {
    pub fn new(axis: ProfileAxis, anchor: ProfileAnchor) -> Self {
        Self {
            axis,
            anchor,
            config: None,
        }
    }

    pub fn axis(&self) -> ProfileAxis {
        self.axis
    }
}

impl ProcessingStage for MeanProfileStage {
    fn initialize(&mut self, config: &StageConfig) {
        self.config = Some(config.clone());
    }

    fn execute(&mut self, input: StageInput<'_>) -> Option<ProductData> {
        let config = self.config.as_ref()?;
        let width = input.frame.width();
        let height = input.frame.height();
        let window = derive_window(
            self.axis,
            self.anchor,
            config.params.lines_to_average,
            self.axis.window_axis_len(width, height),
            config.params.crosshair.as_ref(),
        )?;
        let values = frame_values(&input, config);
        Some(ProductData::Profile {
            axis: self.axis,
            start: window.start,
            len: window.len,
            values: mean_profile(&values, width, height, self.axis, window),
        })
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centred_window_is_odd_and_inside_axis() {
        let window = derive_window(ProfileAxis::Spectral, ProfileAnchor::Centered, 4, 10, None).unwrap();
        assert_eq!(window, ProfileWindow { start: 3, len: 3 });
        let window = derive_window(ProfileAxis::Spectral, ProfileAnchor::Centered, 50, 10, None).unwrap();
        assert_eq!(window, ProfileWindow { start: 0, len: 9 });
    }

    #[test]
    fn start_anchor_is_pulled_back_inside() {
        let window = derive_window(ProfileAxis::Spatial, ProfileAnchor::Start(8), 5, 10, None).unwrap();
        assert_eq!(window, ProfileWindow { start: 5, len: 5 });
    }

    #[test]
    fn crosshair_anchor_follows_the_matching_coordinate() {
        let crosshair = CrossHair::new(7, 1, 0, 0);
        let spectral =
            derive_window(ProfileAxis::Spectral, ProfileAnchor::CrossHair, 3, 10, Some(&crosshair)).unwrap();
        assert_eq!(spectral, ProfileWindow { start: 6, len: 3 });
        let spatial =
            derive_window(ProfileAxis::Spatial, ProfileAnchor::CrossHair, 3, 10, Some(&crosshair)).unwrap();
        assert_eq!(spatial, ProfileWindow { start: 0, len: 3 });
        let edge = CrossHair::new(i64::MAX, 0, 0, 0);
        let clamped =
            derive_window(ProfileAxis::Spectral, ProfileAnchor::CrossHair, 3, 10, Some(&edge)).unwrap();
        assert_eq!(clamped, ProfileWindow { start: 7, len: 3 });
    }

    #[test]
    fn crosshair_anchor_without_crosshair_is_disabled() {
        assert!(derive_window(ProfileAxis::Spectral, ProfileAnchor::CrossHair, 3, 10, None).is_none());
    }

    #[test]
    fn profiles_average_along_the_right_axis() {
        // 2 rows x 3 columns
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let full_cols = ProfileWindow { start: 0, len: 3 };
        assert_eq!(
            mean_profile(&values, 3, 2, ProfileAxis::Spectral, full_cols),
            vec![2.0, 5.0]
        );
        let full_rows = ProfileWindow { start: 0, len: 2 };
        assert_eq!(
            mean_profile(&values, 3, 2, ProfileAxis::Spatial, full_rows),
            vec![2.5, 3.5, 4.5]
        );
    }
}
