use ndarray::{s, ArrayView2, Axis};

pub struct MatrixHelper;

impl MatrixHelper {
    /// Views a row-major sample buffer as a `rows x cols` matrix.
    pub fn view(values: &[f32], rows: usize, cols: usize) -> Option<ArrayView2<'_, f32>> {
        ArrayView2::from_shape((rows, cols), values).ok()
    }

    /// Mean of each row over the columns `start..end`.
    pub fn row_means(view: ArrayView2<f32>, start: usize, end: usize) -> Vec<f32> {
        let end = end.min(view.ncols());
        if start >= end {
            return vec![0.0; view.nrows()];
        }
        view.slice(s![.., start..end])
            .mean_axis(Axis(1))
            .map(|means| means.to_vec())
            .unwrap_or_else(|| vec![0.0; view.nrows()])
    }

    /// Mean of each column over the rows `start..end`.
    pub fn column_means(view: ArrayView2<f32>, start: usize, end: usize) -> Vec<f32> {
        let end = end.min(view.nrows());
        if start >= end {
            return vec![0.0; view.ncols()];
        }
        view.slice(s![start..end, ..])
            .mean_axis(Axis(0))
            .map(|means| means.to_vec())
            .unwrap_or_else(|| vec![0.0; view.ncols()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_means_follow_each_axis() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let view = MatrixHelper::view(&values, 2, 3).unwrap();
        assert_eq!(MatrixHelper::row_means(view, 0, 3), vec![2.0, 5.0]);
        assert_eq!(MatrixHelper::row_means(view, 2, 3), vec![3.0, 6.0]);
        assert_eq!(MatrixHelper::column_means(view, 0, 2), vec![2.5, 3.5, 4.5]);
    }

    #[test]
    fn mismatched_shape_has_no_view() {
        assert!(MatrixHelper::view(&[1.0, 2.0, 3.0], 2, 2).is_none());
    }
}
