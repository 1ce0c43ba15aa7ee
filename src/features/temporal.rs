// Temporal module - Time-domain feature extraction
//
// RMS energy and zero-crossing rate, both computed on centered frames of
// FRAME_LENGTH samples advanced by HOP_LENGTH.

use super::stft::{frame_count, HOP_LENGTH, N_FFT};

/// Analysis frame length for the time-domain features
pub const FRAME_LENGTH: usize = N_FFT;

/// Amplitudes at or below this magnitude count as zero for crossing detection
const ZERO_THRESHOLD: f32 = 1e-10;

/// Per-frame root-mean-square energy.
///
/// Frames are centered and the signal is zero-padded by half a frame on both
/// sides, so every frame divides by the full frame length.
pub fn rms(signal: &[f32]) -> Vec<f32> {
    let frames = frame_count(signal.len(), HOP_LENGTH);
    let half = (FRAME_LENGTH / 2) as isize;

    (0..frames)
        .map(|t| {
            let start = (t * HOP_LENGTH) as isize - half;
            let energy: f64 = (0..FRAME_LENGTH as isize)
                .map(|i| start + i)
                .filter(|&idx| idx >= 0 && (idx as usize) < signal.len())
                .map(|idx| {
                    let s = signal[idx as usize] as f64;
                    s * s
                })
                .sum();
            (energy / FRAME_LENGTH as f64).sqrt() as f32
        })
        .collect()
}

/// Per-frame zero-crossing rate.
///
/// The signal is padded by repeating its edge samples. Within a frame, sample
/// i crosses when its sign differs from sample i - 1; the first sample of a
/// frame never counts. Values with |x| <= 1e-10 are treated as zero and zero
/// counts as positive.
pub fn zero_crossing_rate(signal: &[f32]) -> Vec<f32> {
    if signal.is_empty() {
        return Vec::new();
    }

    let frames = frame_count(signal.len(), HOP_LENGTH);
    let half = (FRAME_LENGTH / 2) as isize;
    let last = signal.len() as isize - 1;
    let negative = |idx: isize| signal[idx.clamp(0, last) as usize] < -ZERO_THRESHOLD;

    (0..frames)
        .map(|t| {
            let start = (t * HOP_LENGTH) as isize - half;
            let crossings = (1..FRAME_LENGTH as isize)
                .filter(|&i| negative(start + i) != negative(start + i - 1))
                .count();
            crossings as f32 / FRAME_LENGTH as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::stats::mean;
    use crate::testing::sine;

    #[test]
    fn test_rms_of_sine() {
        let signal = sine(440.0, 22050, 1.0, 0.5);
        let values = rms(&signal);
        assert_eq!(values.len(), 44);

        // Interior frames see a full period sweep: 0.5 / sqrt(2)
        assert!((values[20] - 0.3536).abs() < 0.005);
        let avg = mean(&values);
        assert!(avg > 0.32 && avg < 0.36, "rms mean {}", avg);
    }

    #[test]
    fn test_zcr_of_sine_matches_frequency() {
        let signal = sine(440.0, 22050, 1.0, 0.8);
        let avg = mean(&zero_crossing_rate(&signal));
        let expected = 2.0 * 440.0 / 22050.0;
        assert!((avg - expected).abs() < 0.003, "zcr mean {}", avg);
    }

    #[test]
    fn test_silence_has_no_energy_or_crossings() {
        let silence = vec![0.0f32; 10_000];
        assert!(rms(&silence).iter().all(|&v| v == 0.0));
        assert!(zero_crossing_rate(&silence).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_tiny_values_count_as_zero() {
        let jitter: Vec<f32> = (0..4096).map(|i| if i % 2 == 0 { 1e-12 } else { -1e-12 }).collect();
        assert!(zero_crossing_rate(&jitter).iter().all(|&v| v == 0.0));
    }
}
