use std::f32::consts::PI;

/// One period-scaled sine sweep across `length` samples, shifted by `phase` radians.
pub fn sine_wave(length: usize, frequency: f32, phase: f32) -> Vec<f32> {
    if length == 0 {
        return Vec::new();
    }
    (0..length)
        .map(|i| ((i as f32 * frequency) / length as f32 * 2.0 * PI + phase).sin())
        .collect()
}

/// Smooth falloff from 1.0 at the first row to `floor` at the last.
pub fn band_envelope(rows: usize, floor: f32) -> Vec<f32> {
    let span = rows.saturating_sub(1).max(1) as f32;
    (0..rows)
        .map(|row| floor + (1.0 - floor) * (1.0 - row as f32 / span))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_wave_starts_at_phase() {
        let wave = sine_wave(8, 1.0, 0.0);
        assert_eq!(wave.len(), 8);
        assert!(wave[0].abs() < 1e-6);
        assert!((wave[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn envelope_spans_floor_to_one() {
        let envelope = band_envelope(5, 0.2);
        assert!((envelope[0] - 1.0).abs() < 1e-6);
        assert!((envelope[4] - 0.2).abs() < 1e-6);
        assert_eq!(band_envelope(1, 0.5), vec![1.0]);
    }
}
