pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let total: f64 = samples.iter().map(|&v| v as f64).sum();
        (total / samples.len() as f64) as f32
    }

    /// Clamps a signed index into `[0, len - 1]`. An empty axis clamps to zero.
    pub fn clamp_index(value: i64, len: usize) -> usize {
        let last = len.saturating_sub(1) as i64;
        value.clamp(0, last) as usize
    }

    /// Largest odd number not above `value`, never below one.
    pub fn odd_floor(value: usize) -> usize {
        if value <= 1 {
            1
        } else if value % 2 == 0 {
            value - 1
        } else {
            value
        }
    }
}
