//! Loudness estimate shown to the user while capturing.

/// Normalized RMS volume of a frame, always in [0.0, 1.0].
///
/// Samples are clamped to [-1.0, 1.0] first and non-finite samples count as
/// silence, so clipping or garbage input can never push the value out of range.
/// An empty frame is silent.
pub fn volume(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let s = if sample.is_finite() {
                sample.clamp(-1.0, 1.0) as f64
            } else {
                0.0
            };
            s * s
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    (mean_square.sqrt() as f32).clamp(0.0, 1.0)
}
