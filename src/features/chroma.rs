// Chroma module - Pitch class profiles and tonal centroids
//
// Pitch classes are ordered C, C#, D, ..., B. Tuning is assumed to be
// A440 (no tuning estimation).
//
// References:
// - Ellis, D. (2007). Chroma feature analysis and synthesis
// - Müller, M. & Ewert, S. (2011). Chroma Toolbox (CENS)
// - Harte, C. et al. (2006). Detecting harmonic change in musical audio

use super::cqt::{BINS_PER_OCTAVE, N_BINS};
use super::stats::{normalize_frames, Norm};
use super::stft::{hann_symmetric, Spectrogram};

pub const N_CHROMA: usize = 12;

/// Center (in octaves above A0/16) and spread of the octave weighting
const CENTER_OCTAVE: f64 = 5.0;
const OCTAVE_WIDTH: f64 = 2.0;

/// CENS quantization thresholds, each adding 0.25 when exceeded
const CENS_STEPS: [f32; 4] = [0.4, 0.2, 0.1, 0.05];
const CENS_WEIGHT: f32 = 0.25;

/// Temporal smoothing length for CENS (frames)
const CENS_SMOOTHING: usize = 41;

/// Gaussian chroma filterbank mapping `n_fft / 2 + 1` STFT bins onto 12
/// pitch classes.
pub fn filterbank(sample_rate: u32, n_fft: usize) -> Vec<Vec<f32>> {
    let n_chroma = N_CHROMA as f64;
    let a440_octs = |f: f64| (f / (440.0 / 16.0)).log2();

    // Fractional pitch-class position of every FFT bin; bin 0 is placed
    // 1.5 octaves below bin 1
    let mut frqbins: Vec<f64> = (1..n_fft)
        .map(|k| n_chroma * a440_octs(k as f64 * sample_rate as f64 / n_fft as f64))
        .collect();
    frqbins.insert(0, frqbins[0] - 1.5 * n_chroma);

    let mut widths: Vec<f64> = frqbins.windows(2).map(|w| (w[1] - w[0]).max(1.0)).collect();
    widths.push(1.0);

    let half = (n_chroma / 2.0).round();
    let mut weights = vec![vec![0.0f64; n_fft]; N_CHROMA];
    for (i, (&bin, &width)) in frqbins.iter().zip(&widths).enumerate() {
        for (c, row) in weights.iter_mut().enumerate() {
            let d = (bin - c as f64 + half + 10.0 * n_chroma).rem_euclid(n_chroma) - half;
            row[i] = (-0.5 * (2.0 * d / width).powi(2)).exp();
        }

        let norm = weights.iter().map(|row| row[i] * row[i]).sum::<f64>().sqrt();
        let octave = (-0.5 * ((bin / n_chroma - CENTER_OCTAVE) / OCTAVE_WIDTH).powi(2)).exp();
        for row in weights.iter_mut() {
            if norm > 0.0 {
                row[i] /= norm;
            }
            row[i] *= octave;
        }
    }

    // Rows were built A-based; rotate so that row 0 is C
    (0..N_CHROMA)
        .map(|c| {
            weights[(c + 3) % N_CHROMA][..=n_fft / 2]
                .iter()
                .map(|&w| w as f32)
                .collect()
        })
        .collect()
}

/// Chromagram from a power STFT, each frame scaled to a maximum of 1.
pub fn chroma_stft(power: &Spectrogram, sample_rate: u32, n_fft: usize) -> Spectrogram {
    let mut chroma = power.project(&filterbank(sample_rate, n_fft));
    normalize_frames(&mut chroma, Norm::Max);
    chroma
}

/// Pitch class of each constant-Q bin (three bins per semitone, centered).
fn cq_pitch_class(bin: usize) -> usize {
    let per_semitone = BINS_PER_OCTAVE / N_CHROMA;
    ((bin % BINS_PER_OCTAVE + per_semitone / 2) / per_semitone) % N_CHROMA
}

/// Fold a constant-Q magnitude spectrogram onto 12 pitch classes.
fn fold_cq(cqt: &Spectrogram) -> Spectrogram {
    debug_assert_eq!(cqt.bins(), N_BINS);
    let mut chroma = Spectrogram::zeros(N_CHROMA, cqt.frames());
    for t in 0..cqt.frames() {
        let frame = cqt.frame(t);
        let target = chroma.frame_mut(t);
        for (bin, &v) in frame.iter().enumerate() {
            target[cq_pitch_class(bin)] += v;
        }
    }
    chroma
}

/// Constant-Q chromagram, each frame scaled to a maximum of 1.
pub fn chroma_cqt(cqt: &Spectrogram) -> Spectrogram {
    let mut chroma = fold_cq(cqt);
    normalize_frames(&mut chroma, Norm::Max);
    chroma
}

/// Chroma Energy Normalized Statistics from a constant-Q magnitude
/// spectrogram.
pub fn chroma_cens(cqt: &Spectrogram) -> Spectrogram {
    let mut chroma = fold_cq(cqt);
    normalize_frames(&mut chroma, Norm::L1);

    let quantized = chroma.map(|v| {
        CENS_STEPS
            .iter()
            .filter(|&&step| v > step)
            .map(|_| CENS_WEIGHT)
            .sum()
    });

    let mut window = hann_symmetric(CENS_SMOOTHING + 2);
    let total: f32 = window.iter().sum();
    window.iter_mut().for_each(|w| *w /= total);

    let mut smoothed = smooth_time(&quantized, &window);
    normalize_frames(&mut smoothed, Norm::L2);
    smoothed
}

/// Zero-padded centered convolution of every row with `window` along time.
fn smooth_time(spec: &Spectrogram, window: &[f32]) -> Spectrogram {
    let center = (window.len() / 2) as isize;
    let frames = spec.frames() as isize;
    let mut out = Spectrogram::zeros(spec.bins(), spec.frames());

    for t in 0..frames {
        for (j, &w) in window.iter().enumerate() {
            let src = t + j as isize - center;
            if src < 0 || src >= frames {
                continue;
            }
            for bin in 0..spec.bins() {
                let v = out.get(bin, t as usize) + w * spec.get(bin, src as usize);
                out.set(bin, t as usize, v);
            }
        }
    }
    out
}

/// Tonal centroid projection: fifths, minor thirds and major thirds as
/// three circles in a 6-D space.
fn tonnetz_basis() -> Vec<Vec<f32>> {
    const SCALE: [f64; 6] = [7.0 / 6.0, 7.0 / 6.0, 3.0 / 2.0, 3.0 / 2.0, 2.0 / 3.0, 2.0 / 3.0];
    const RADIUS: [f64; 6] = [1.0, 1.0, 1.0, 1.0, 0.5, 0.5];

    (0..6)
        .map(|d| {
            // Even rows are the sine components
            let shift = if d % 2 == 0 { 0.5 } else { 0.0 };
            (0..N_CHROMA)
                .map(|c| {
                    let v = SCALE[d] * c as f64 - shift;
                    (RADIUS[d] * (std::f64::consts::PI * v).cos()) as f32
                })
                .collect()
        })
        .collect()
}

/// 6-D tonal centroid features from a chromagram.
pub fn tonnetz(chroma: &Spectrogram) -> Spectrogram {
    let mut chroma = chroma.clone();
    normalize_frames(&mut chroma, Norm::L1);
    chroma.project(&tonnetz_basis())
}
