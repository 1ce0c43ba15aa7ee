// Short-time Fourier transform and the spectrogram container shared by all
// frequency-domain extractors.
//
// Framing convention: frames are centered, the signal is zero-padded by
// n_fft / 2 on both sides, and frame t starts at t * hop - n_fft / 2.
// A signal of n samples therefore yields 1 + n / hop frames.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// FFT window size used by every STFT-based extractor
pub const N_FFT: usize = 2048;

/// Hop between consecutive frames
pub const HOP_LENGTH: usize = 512;

/// Periodic Hann window (the DFT-even variant used for spectral analysis).
pub fn hann_periodic(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / len as f32).cos())
        .collect()
}

/// Symmetric Hann window (used for smoothing filters).
pub fn hann_symmetric(len: usize) -> Vec<f32> {
    if len == 1 {
        return vec![1.0];
    }
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / (len - 1) as f32).cos())
        .collect()
}

/// Number of centered frames for a signal of `len` samples.
pub fn frame_count(len: usize, hop: usize) -> usize {
    1 + len / hop
}

/// Frequency of each STFT bin in Hz.
pub fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f64> {
    (0..=n_fft / 2)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect()
}

/// A real-valued time/frequency matrix stored frame by frame.
///
/// `data[frame * bins + bin]`
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    bins: usize,
    frames: usize,
    data: Vec<f32>,
}

impl Spectrogram {
    pub fn zeros(bins: usize, frames: usize) -> Self {
        Self {
            bins,
            frames,
            data: vec![0.0; bins * frames],
        }
    }

    pub fn from_frames(bins: usize, frames: Vec<Vec<f32>>) -> Self {
        let count = frames.len();
        let mut data = Vec::with_capacity(bins * count);
        for frame in frames {
            debug_assert_eq!(frame.len(), bins);
            data.extend_from_slice(&frame);
        }
        Self {
            bins,
            frames: count,
            data,
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn get(&self, bin: usize, frame: usize) -> f32 {
        self.data[frame * self.bins + bin]
    }

    pub fn set(&mut self, bin: usize, frame: usize, value: f32) {
        self.data[frame * self.bins + bin] = value;
    }

    pub fn frame(&self, frame: usize) -> &[f32] {
        &self.data[frame * self.bins..(frame + 1) * self.bins]
    }

    pub fn frame_mut(&mut self, frame: usize) -> &mut [f32] {
        &mut self.data[frame * self.bins..(frame + 1) * self.bins]
    }

    pub fn iter_frames(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.bins.max(1)).take(self.frames)
    }

    pub fn values(&self) -> &[f32] {
        &self.data
    }

    /// Element-wise transform into a new spectrogram of the same shape.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            bins: self.bins,
            frames: self.frames,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Mean over every element (accumulated in f64).
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64
    }

    /// Left-multiply by a `rows × bins` weight matrix: out[r, t] = Σ_k w[r][k] · self[k, t].
    pub fn project(&self, weights: &[Vec<f32>]) -> Spectrogram {
        let rows = weights.len();
        let mut out = Spectrogram::zeros(rows, self.frames);
        for t in 0..self.frames {
            let frame = self.frame(t);
            let target = out.frame_mut(t);
            for (r, row) in weights.iter().enumerate() {
                target[r] = row.iter().zip(frame.iter()).map(|(w, v)| w * v).sum();
            }
        }
        out
    }
}

/// Forward/inverse STFT with a fixed FFT size, hop and periodic Hann window.
pub struct Stft {
    n_fft: usize,
    hop: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            n_fft,
            hop,
            window: hann_periodic(n_fft),
            forward: planner.plan_fft_forward(n_fft),
            inverse: planner.plan_fft_inverse(n_fft),
        }
    }

    pub fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Full complex spectrum of frame `t` (windowed, zero padded at the edges).
    fn frame_spectrum(&self, signal: &[f32], t: usize, buffer: &mut Vec<Complex<f32>>) {
        buffer.clear();
        let start = (t * self.hop) as isize - (self.n_fft / 2) as isize;
        for (i, w) in self.window.iter().enumerate() {
            let idx = start + i as isize;
            let sample = if idx >= 0 && (idx as usize) < signal.len() {
                signal[idx as usize]
            } else {
                0.0
            };
            buffer.push(Complex::new(sample * w, 0.0));
        }
        self.forward.process(buffer);
    }

    /// Magnitude spectrogram |X|.
    pub fn magnitude(&self, signal: &[f32]) -> Spectrogram {
        let frames = frame_count(signal.len(), self.hop);
        let bins = self.bins();
        let mut out = Spectrogram::zeros(bins, frames);
        let mut buffer = Vec::with_capacity(self.n_fft);

        for t in 0..frames {
            self.frame_spectrum(signal, t, &mut buffer);
            for (dst, c) in out.frame_mut(t).iter_mut().zip(buffer.iter()) {
                *dst = c.norm();
            }
        }
        out
    }

    /// Re-synthesize `signal` after scaling each STFT bin by `mask`.
    ///
    /// The forward transform is recomputed frame by frame, so only the real
    /// mask is kept in memory. Output is trimmed to the input length.
    pub fn inverse_masked(&self, signal: &[f32], mask: &Spectrogram) -> Vec<f32> {
        let frames = frame_count(signal.len(), self.hop);
        debug_assert_eq!(mask.frames(), frames);
        debug_assert_eq!(mask.bins(), self.bins());

        let n = self.n_fft;
        let padded_len = n + self.hop * (frames - 1);
        let mut output = vec![0.0f32; padded_len];
        let mut norm = vec![0.0f32; padded_len];
        let mut buffer = Vec::with_capacity(n);
        let scale = 1.0 / n as f32;

        for t in 0..frames {
            self.frame_spectrum(signal, t, &mut buffer);

            let gains = mask.frame(t);
            for (k, gain) in gains.iter().enumerate() {
                buffer[k] *= *gain;
            }
            // Keep the spectrum Hermitian so the inverse is real
            for k in 1..n / 2 {
                buffer[n - k] = buffer[k].conj();
            }
            self.inverse.process(&mut buffer);

            let offset = t * self.hop;
            for (i, w) in self.window.iter().enumerate() {
                output[offset + i] += buffer[i].re * scale * w;
                norm[offset + i] += w * w;
            }
        }

        for (sample, weight) in output.iter_mut().zip(norm.iter()) {
            if *weight > f32::MIN_POSITIVE {
                *sample /= weight;
            }
        }

        let start = n / 2;
        let mut trimmed: Vec<f32> = output.into_iter().skip(start).take(signal.len()).collect();
        trimmed.resize(signal.len(), 0.0);
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sine;

    #[test]
    fn test_frame_count_matches_centered_framing() {
        assert_eq!(frame_count(22050, 512), 44);
        assert_eq!(frame_count(1, 512), 1);
        assert_eq!(frame_count(512, 512), 2);
    }

    #[test]
    fn test_windows() {
        let periodic = hann_periodic(4);
        assert_eq!(periodic.len(), 4);
        assert!(periodic[0].abs() < 1e-7);
        assert!((periodic[2] - 1.0).abs() < 1e-6);

        let symmetric = hann_symmetric(5);
        assert!(symmetric[0].abs() < 1e-7);
        assert!(symmetric[4].abs() < 1e-7);
        assert!((symmetric[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_magnitude_peak_at_tone_frequency() {
        let sr = 22050;
        let signal = sine(1000.0, sr, 1.0, 0.5);
        let stft = Stft::new(N_FFT, HOP_LENGTH);
        let spec = stft.magnitude(&signal);

        assert_eq!(spec.bins(), 1025);
        assert_eq!(spec.frames(), 44);

        let freqs = fft_frequencies(sr, N_FFT);
        let middle = spec.frame(20);
        let peak = middle
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k)
            .unwrap();
        assert!((freqs[peak] - 1000.0).abs() < 15.0);
    }

    #[test]
    fn test_unit_mask_reconstructs_signal() {
        let signal = sine(440.0, 22050, 0.5, 0.5);
        let stft = Stft::new(N_FFT, HOP_LENGTH);
        let ones = Spectrogram::zeros(stft.bins(), frame_count(signal.len(), HOP_LENGTH)).map(|_| 1.0);

        let rebuilt = stft.inverse_masked(&signal, &ones);
        assert_eq!(rebuilt.len(), signal.len());
        let max_err = rebuilt
            .iter()
            .zip(signal.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-3, "max reconstruction error {}", max_err);
    }

    #[test]
    fn test_project_and_mean() {
        let spec = Spectrogram::from_frames(2, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let summed = spec.project(&[vec![1.0, 1.0]]);
        assert_eq!(summed.bins(), 1);
        assert_eq!(summed.values(), &[3.0, 7.0]);
        assert!((spec.mean() - 2.5).abs() < 1e-12);
    }
}
