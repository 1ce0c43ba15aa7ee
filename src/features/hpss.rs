// Harmonic/percussive source separation by median filtering
//
// Harmonic energy is smooth along time, percussive energy is smooth along
// frequency. Both components are enhanced with a median filter in the
// respective direction, turned into Wiener-style soft masks and applied to
// the STFT before resynthesis.
//
// Reference: Fitzgerald, D. (2010). Harmonic/percussive separation using
// median filtering

use super::stft::{Spectrogram, Stft};

/// Median filter length in both directions
const KERNEL_SIZE: usize = 31;

/// Exponent of the soft masks
const MASK_POWER: i32 = 2;

/// Separated time-domain components, each the length of the input.
#[derive(Debug, Clone)]
pub struct Separation {
    pub harmonic: Vec<f32>,
    pub percussive: Vec<f32>,
}

/// Split `signal` into harmonic and percussive parts. `magnitude` must be
/// `stft.magnitude(signal)`.
pub fn separate(stft: &Stft, signal: &[f32], magnitude: &Spectrogram) -> Separation {
    let harmonic_env = median_along_time(magnitude, KERNEL_SIZE);
    let percussive_env = median_along_frequency(magnitude, KERNEL_SIZE);

    let harmonic_mask = softmask(&harmonic_env, &percussive_env);
    let percussive_mask = softmask(&percussive_env, &harmonic_env);

    Separation {
        harmonic: stft.inverse_masked(signal, &harmonic_mask),
        percussive: stft.inverse_masked(signal, &percussive_mask),
    }
}

/// Index into a sequence of length `n` with half-sample symmetric
/// reflection at both ends (`d c b a | a b c d | d c b a`).
fn reflect(idx: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = idx.rem_euclid(period) as usize;
    if m >= n {
        2 * n - 1 - m
    } else {
        m
    }
}

fn median(window: &mut [f32]) -> f32 {
    let mid = window.len() / 2;
    *window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1
}

fn median_along_time(spec: &Spectrogram, size: usize) -> Spectrogram {
    let frames = spec.frames();
    let half = (size / 2) as isize;
    let mut out = Spectrogram::zeros(spec.bins(), frames);
    let mut window = vec![0.0f32; size];

    for bin in 0..spec.bins() {
        for t in 0..frames {
            for (j, slot) in window.iter_mut().enumerate() {
                let src = reflect(t as isize + j as isize - half, frames);
                *slot = spec.get(bin, src);
            }
            out.set(bin, t, median(&mut window));
        }
    }
    out
}

fn median_along_frequency(spec: &Spectrogram, size: usize) -> Spectrogram {
    let bins = spec.bins();
    let half = (size / 2) as isize;
    let mut out = Spectrogram::zeros(bins, spec.frames());
    let mut window = vec![0.0f32; size];

    for t in 0..spec.frames() {
        let frame = spec.frame(t);
        let target = out.frame_mut(t);
        for (bin, dst) in target.iter_mut().enumerate() {
            for (j, slot) in window.iter_mut().enumerate() {
                *slot = frame[reflect(bin as isize + j as isize - half, bins)];
            }
            *dst = median(&mut window);
        }
    }
    out
}

/// `x^p / (x^p + r^p)`, computed relative to `max(x, r)`. Cells where both
/// inputs are zero get a mask of 0.
fn softmask(x: &Spectrogram, reference: &Spectrogram) -> Spectrogram {
    let mut mask = Spectrogram::zeros(x.bins(), x.frames());
    for t in 0..x.frames() {
        for ((dst, &a), &b) in mask
            .frame_mut(t)
            .iter_mut()
            .zip(x.frame(t))
            .zip(reference.frame(t))
        {
            let z = a.max(b);
            if z < f32::MIN_POSITIVE {
                continue;
            }
            let ma = (a / z).powi(MASK_POWER);
            let mb = (b / z).powi(MASK_POWER);
            *dst = ma / (ma + mb);
        }
    }
    mask
}
