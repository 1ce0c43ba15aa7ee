// Mel module - Mel filterbank, mel spectrogram and MFCC
//
// Mel scale follows Slaney's Auditory Toolbox: linear below 1 kHz,
// logarithmic above. Filters are area-normalized ("slaney" norm).

use super::stft::{fft_frequencies, Spectrogram};

/// Number of mel bands
pub const N_MELS: usize = 128;

/// Number of cepstral coefficients kept
pub const N_MFCC: usize = 20;

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// `n` frequencies evenly spaced on the mel scale between `fmin` and `fmax`.
fn mel_frequencies(n: usize, fmin: f64, fmax: f64) -> Vec<f64> {
    let low = hz_to_mel(fmin);
    let high = hz_to_mel(fmax);
    (0..n)
        .map(|i| mel_to_hz(low + (high - low) * i as f64 / (n - 1) as f64))
        .collect()
}

/// Triangular mel filterbank covering 0 Hz to Nyquist: `N_MELS` rows of
/// `n_fft / 2 + 1` weights.
pub fn filterbank(sample_rate: u32, n_fft: usize) -> Vec<Vec<f32>> {
    let fft_freqs = fft_frequencies(sample_rate, n_fft);
    let mel_f = mel_frequencies(N_MELS + 2, 0.0, sample_rate as f64 / 2.0);

    (0..N_MELS)
        .map(|m| {
            let (left, center, right) = (mel_f[m], mel_f[m + 1], mel_f[m + 2]);
            let enorm = 2.0 / (right - left);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - left) / (center - left);
                    let upper = (right - f) / (right - center);
                    (lower.min(upper).max(0.0) * enorm) as f32
                })
                .collect()
        })
        .collect()
}

/// Orthonormal DCT-II basis truncated to the first `N_MFCC` rows.
fn dct_basis(n: usize) -> Vec<Vec<f32>> {
    let first = (1.0 / n as f64).sqrt();
    let rest = (2.0 / n as f64).sqrt();
    (0..N_MFCC)
        .map(|k| {
            let scale = if k == 0 { first } else { rest };
            (0..n)
                .map(|i| {
                    let angle = std::f64::consts::PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64;
                    (scale * angle.cos()) as f32
                })
                .collect()
        })
        .collect()
}

/// Mel power spectrogram from a power STFT.
pub fn melspectrogram(power: &Spectrogram, sample_rate: u32, n_fft: usize) -> Spectrogram {
    power.project(&filterbank(sample_rate, n_fft))
}

/// MFCCs (`N_MFCC` × frames) from a dB-scaled mel spectrogram.
pub fn mfcc(mel_db: &Spectrogram) -> Spectrogram {
    mel_db.project(&dct_basis(mel_db.bins()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::stats::power_to_db;
    use crate::features::stft::{Stft, HOP_LENGTH, N_FFT};
    use crate::testing::sine;

    #[test]
    fn test_mel_scale_roundtrip_points() {
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
        assert!((hz_to_mel(200.0) - 3.0).abs() < 1e-9);
        assert!((mel_to_hz(hz_to_mel(4321.0)) - 4321.0).abs() < 1e-6);
    }

    #[test]
    fn test_filterbank_shape_and_area_norm() {
        let fb = filterbank(22050, N_FFT);
        assert_eq!(fb.len(), N_MELS);
        assert!(fb.iter().all(|row| row.len() == N_FFT / 2 + 1));
        assert!(fb.iter().flatten().all(|&w| w >= 0.0));

        // Slaney norm: higher (wider) filters have smaller peak weights
        let peak = |row: &Vec<f32>| row.iter().copied().fold(0.0f32, f32::max);
        assert!(peak(&fb[10]) > peak(&fb[120]));
    }

    #[test]
    fn test_dct_basis_is_orthonormal() {
        let basis = dct_basis(N_MELS);
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| (x * y) as f64).sum::<f64>();
        assert!((dot(&basis[0], &basis[0]) - 1.0).abs() < 1e-5);
        assert!((dot(&basis[5], &basis[5]) - 1.0).abs() < 1e-5);
        assert!(dot(&basis[1], &basis[4]).abs() < 1e-5);
    }

    #[test]
    fn test_mel_energy_follows_tone() {
        let sr = 22050;
        let mag = Stft::new(N_FFT, HOP_LENGTH).magnitude(&sine(440.0, sr, 1.0, 0.5));
        let mel = melspectrogram(&mag.map(|m| m * m), sr, N_FFT);
        assert_eq!(mel.bins(), N_MELS);

        let frame = mel.frame(20);
        let band = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(m, _)| m)
            .unwrap();
        let mel_f = mel_frequencies(N_MELS + 2, 0.0, sr as f64 / 2.0);
        assert!(mel_f[band] < 440.0 && mel_f[band + 2] > 440.0);

        let coeffs = mfcc(&power_to_db(&mel));
        assert_eq!(coeffs.bins(), N_MFCC);
        assert_eq!(coeffs.frames(), mel.frames());
        assert!(coeffs.values().iter().all(|v| v.is_finite()));
    }
}
