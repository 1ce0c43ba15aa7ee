// Reductions and normalizations shared by the extractors.

use super::stft::Spectrogram;

/// Arithmetic mean, accumulated in f64. An empty slice averages to 0.
pub fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

/// Per-frame vector norm used by `normalize_frames`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Norm {
    /// Maximum absolute value
    Max,
    /// Sum of absolute values
    L1,
    /// Euclidean length
    L2,
}

impl Norm {
    fn of(self, values: &[f32]) -> f32 {
        match self {
            Norm::Max => values.iter().fold(0.0f32, |acc, v| acc.max(v.abs())),
            Norm::L1 => values.iter().map(|v| v.abs()).sum(),
            Norm::L2 => values.iter().map(|v| v * v).sum::<f32>().sqrt(),
        }
    }
}

/// Scale each frame to unit norm. Frames whose norm is below the smallest
/// positive f32 are left untouched, so silent frames stay at zero.
pub fn normalize_frames(spec: &mut Spectrogram, norm: Norm) {
    for t in 0..spec.frames() {
        let frame = spec.frame_mut(t);
        let length = norm.of(frame);
        if length > f32::MIN_POSITIVE {
            for v in frame.iter_mut() {
                *v /= length;
            }
        }
    }
}

/// Convert a power quantity to decibels: 10·log10(max(amin, x)), then clip
/// everything more than `top_db` below the loudest value.
pub fn power_to_db(spec: &Spectrogram) -> Spectrogram {
    const AMIN: f32 = 1e-10;
    const TOP_DB: f32 = 80.0;

    let db = spec.map(|v| 10.0 * v.max(AMIN).log10());
    let peak = db.values().iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let floor = peak - TOP_DB;
    db.map(|v| v.max(floor))
}
