// Tempo module - Global tempo estimation from an onset strength envelope
//
// Onset strength is the mean positive change of the dB mel spectrogram.
// Its local autocorrelation (tempogram), averaged over time and weighted by
// a log-normal prior around 120 BPM, selects the dominant beat period.
//
// Reference: Ellis, D. (2007). Beat tracking by dynamic programming

use super::stft::{hann_periodic, Spectrogram};
use rustfft::{num_complex::Complex, FftPlanner};

/// Autocorrelation window length in seconds
const AC_SIZE: f64 = 8.0;

/// Center of the tempo prior (BPM)
const START_BPM: f64 = 120.0;

/// Spread of the tempo prior in octaves
const STD_BPM: f64 = 1.0;

/// Candidate periods faster than this are ignored
const MAX_TEMPO: f64 = 320.0;

/// Onset strength envelope (one value per frame) from a dB mel spectrogram.
///
/// The first-order difference is delayed by 3 frames to line up with the
/// centered STFT and truncated back to the spectrogram's length.
pub fn onset_strength(mel_db: &Spectrogram, n_fft: usize, hop: usize) -> Vec<f32> {
    let frames = mel_db.frames();
    let pad = 1 + n_fft / (2 * hop);
    let mut envelope = vec![0.0f32; frames];

    for t in 1..frames {
        let prev = mel_db.frame(t - 1);
        let cur = mel_db.frame(t);
        let flux: f64 = cur
            .iter()
            .zip(prev)
            .map(|(&c, &p)| (c - p).max(0.0) as f64)
            .sum();
        let target = t - 1 + pad;
        if target < frames {
            envelope[target] = (flux / mel_db.bins() as f64) as f32;
        }
    }
    envelope
}

/// Estimated tempo in BPM, or 0 when the envelope carries no onsets.
pub fn estimate(onset_env: &[f32], sample_rate: u32, hop: usize) -> f64 {
    if onset_env.iter().all(|&v| v == 0.0) {
        return 0.0;
    }

    let win = (AC_SIZE * sample_rate as f64 / hop as f64).floor() as usize;
    let profile = mean_tempogram(onset_env, win);

    let mut best = (f64::NEG_INFINITY, 0usize);
    for (lag, &strength) in profile.iter().enumerate().skip(1) {
        let bpm = lag_to_bpm(lag, sample_rate, hop);
        if bpm >= MAX_TEMPO {
            continue;
        }
        let prior = -0.5 * ((bpm.log2() - START_BPM.log2()) / STD_BPM).powi(2);
        let score = (1e6 * strength).ln_1p() + prior;
        if score > best.0 {
            best = (score, lag);
        }
    }

    if best.1 == 0 {
        0.0
    } else {
        lag_to_bpm(best.1, sample_rate, hop)
    }
}

fn lag_to_bpm(lag: usize, sample_rate: u32, hop: usize) -> f64 {
    60.0 * sample_rate as f64 / (hop as f64 * lag as f64)
}

/// Pad both ends with a linear ramp from 0 up to the edge value.
fn linear_ramp_pad(values: &[f32], width: usize) -> Vec<f32> {
    let first = values.first().copied().unwrap_or(0.0);
    let last = values.last().copied().unwrap_or(0.0);
    let step = |i: usize| i as f32 / width as f32;

    let mut padded = Vec::with_capacity(values.len() + 2 * width);
    padded.extend((0..width).map(|i| first * step(i)));
    padded.extend_from_slice(values);
    padded.extend((0..width).map(|j| last * step(width - 1 - j)));
    padded
}

/// Windowed autocorrelation of the envelope around every frame, each frame
/// scaled to a maximum of 1, then averaged over frames. Returns one value
/// per lag in `0..win`.
fn mean_tempogram(onset_env: &[f32], win: usize) -> Vec<f64> {
    let frames = onset_env.len();
    let window = hann_periodic(win);
    let padded = linear_ramp_pad(onset_env, win / 2);

    let n = 2 * win;
    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut buffer = vec![Complex::new(0.0f32, 0.0); n];
    let mut sums = vec![0.0f64; win];

    for t in 0..frames {
        buffer.fill(Complex::new(0.0, 0.0));
        for (i, (slot, &w)) in buffer.iter_mut().zip(&window).enumerate() {
            let v = padded.get(t + i).copied().unwrap_or(0.0);
            *slot = Complex::new(v * w, 0.0);
        }

        forward.process(&mut buffer);
        for c in buffer.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        inverse.process(&mut buffer);

        let peak = buffer[..win].iter().fold(0.0f32, |acc, c| acc.max(c.re.abs()));
        if peak > f32::MIN_POSITIVE {
            for (sum, c) in sums.iter_mut().zip(&buffer[..win]) {
                *sum += (c.re / peak) as f64;
            }
        }
    }

    sums.iter().map(|s| s / frames as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::mel::melspectrogram;
    use crate::features::stats::power_to_db;
    use crate::features::stft::{Stft, HOP_LENGTH, N_FFT};
    use crate::testing::click_track;

    fn onsets_of(signal: &[f32], sr: u32) -> Vec<f32> {
        let mag = Stft::new(N_FFT, HOP_LENGTH).magnitude(signal);
        let mel_db = power_to_db(&melspectrogram(&mag.map(|m| m * m), sr, N_FFT));
        onset_strength(&mel_db, N_FFT, HOP_LENGTH)
    }

    #[test]
    fn test_onset_envelope_is_delayed_and_truncated() {
        let mut frames = vec![vec![0.0f32; 2]; 6];
        frames[2] = vec![4.0, 2.0];
        let env = onset_strength(&Spectrogram::from_frames(2, frames), N_FFT, HOP_LENGTH);
        assert_eq!(env.len(), 6);
        // Rise at t=2 → index 2 - 1 + 3 = 4; the fall afterwards is clipped
        assert_eq!(env, vec![0.0, 0.0, 0.0, 0.0, 3.0, 0.0]);
    }

    #[test]
    fn test_linear_ramp_pad() {
        let padded = linear_ramp_pad(&[2.0, 4.0], 2);
        assert_eq!(padded, vec![0.0, 1.0, 2.0, 4.0, 2.0, 0.0]);
    }

    #[test]
    fn test_click_track_tempo() {
        let sr = 22050;
        // One click every 21 frames: 60 * 22050 / (512 * 21) ≈ 123.05 BPM
        let clicks = click_track(21 * HOP_LENGTH, sr, 10.0);
        let bpm = estimate(&onsets_of(&clicks, sr), sr, HOP_LENGTH);
        assert!((bpm - 123.05).abs() < 1.0, "tempo {}", bpm);
    }

    #[test]
    fn test_silence_has_no_tempo() {
        let sr = 22050;
        let env = onsets_of(&vec![0.0; 22050], sr);
        assert_eq!(estimate(&env, sr, HOP_LENGTH), 0.0);
    }
}
