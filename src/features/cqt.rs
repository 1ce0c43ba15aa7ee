// Constant-Q transform
//
// Multirate implementation: octaves are processed from the top down, and the
// signal is halved with rubato whenever the next octave's passband fits well
// below the reduced Nyquist rate. Every octave then works with short kernels
// and a small FFT instead of one FFT sized for the lowest bin. Kernels are
// Hann-windowed complex exponentials, L1-normalized in time, moved to the
// frequency domain once and sparsified so that each bin only touches the FFT
// coefficients carrying 99% of its kernel's spectral mass.

use super::stft::{frame_count, hann_periodic, Spectrogram};
use anyhow::{bail, Result};
use rubato::{FftFixedInOut, Resampler};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::borrow::Cow;
use std::f64::consts::PI;
use std::sync::Arc;

/// Frequency of C1 (MIDI 24)
pub const FMIN: f64 = 32.703_195_662_574_83;

pub const BINS_PER_OCTAVE: usize = 36;

pub const N_OCTAVES: usize = 7;

pub const N_BINS: usize = N_OCTAVES * BINS_PER_OCTAVE;

/// Share of each kernel's spectral magnitude that may be discarded
const SPARSITY: f32 = 0.01;

/// Equivalent noise bandwidth of the Hann window, in FFT bins
const HANN_BANDWIDTH: f64 = 1.500_186_7;

/// Highest filter cutoff allowed after a halving, as a share of the new
/// Nyquist rate. Leaves room for the resampler's transition band.
const PASSBAND: f64 = 0.8;

/// Input block size handed to the halving resampler
const RESAMPLE_CHUNK: usize = 1024;

/// One frequency-domain kernel reduced to its significant coefficients.
struct Kernel {
    indices: Vec<usize>,
    weights: Vec<Complex<f32>>,
    /// sqrt(kernel length at the input rate) / fft length
    scale: f32,
}

/// The kernels of one octave at the rate that octave is evaluated at.
struct Octave {
    first_bin: usize,
    /// Number of halvings applied to the input before this octave
    level: u32,
    hop: usize,
    n_fft: usize,
    kernels: Vec<Kernel>,
    fft: Arc<dyn Fft<f32>>,
}

impl Octave {
    /// Fill this octave's rows of `out` from `signal`, already resampled to
    /// this octave's rate.
    fn respond(&self, signal: &[f32], out: &mut Spectrogram) {
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];
        let half = (self.n_fft / 2) as isize;

        for t in 0..out.frames() {
            let start = (t * self.hop) as isize - half;
            for (i, slot) in buffer.iter_mut().enumerate() {
                let idx = start + i as isize;
                let sample = if idx >= 0 && (idx as usize) < signal.len() {
                    signal[idx as usize]
                } else {
                    0.0
                };
                *slot = Complex::new(sample, 0.0);
            }
            self.fft.process(&mut buffer);

            let frame = &mut out.frame_mut(t)[self.first_bin..];
            for (dst, kernel) in frame.iter_mut().zip(&self.kernels) {
                let response: Complex<f32> = kernel
                    .indices
                    .iter()
                    .zip(&kernel.weights)
                    .map(|(&k, w)| *w * buffer[k])
                    .sum();
                *dst = response.norm() * kernel.scale;
            }
        }
    }
}

pub struct ConstantQ {
    hop: usize,
    /// Highest octave first
    octaves: Vec<Octave>,
}

impl ConstantQ {
    /// Build the kernel bank for `sample_rate`.
    ///
    /// Fails when the highest filter's passband would extend past Nyquist.
    pub fn new(sample_rate: u32, hop: usize) -> Result<Self> {
        let sr = sample_rate as f64;
        let q = 1.0 / (2f64.powf(1.0 / BINS_PER_OCTAVE as f64) - 1.0);
        let freqs: Vec<f64> = (0..N_BINS)
            .map(|k| FMIN * 2f64.powf(k as f64 / BINS_PER_OCTAVE as f64))
            .collect();
        let cutoff_of = |freq: f64| freq * (1.0 + 0.5 * HANN_BANDWIDTH / q);

        let top = cutoff_of(freqs[N_BINS - 1]);
        if top > sr / 2.0 {
            bail!(
                "constant-Q filter cutoff {:.1} Hz exceeds Nyquist ({:.1} Hz)",
                top,
                sr / 2.0
            );
        }

        let mut planner = FftPlanner::new();
        let mut octaves = Vec::with_capacity(N_OCTAVES);
        let mut rate = sr;
        let mut hop_o = hop;
        let mut level = 0;

        for octave in (0..N_OCTAVES).rev() {
            let first_bin = octave * BINS_PER_OCTAVE;
            let bins = &freqs[first_bin..first_bin + BINS_PER_OCTAVE];

            // Frames must stay centered on whole samples, so only an even hop is halved
            let cutoff = cutoff_of(bins[BINS_PER_OCTAVE - 1]);
            while hop_o % 2 == 0 && cutoff <= PASSBAND * rate / 4.0 {
                rate /= 2.0;
                hop_o /= 2;
                level += 1;
            }

            let n_fft = ((q * rate / bins[0]).ceil() as usize).next_power_of_two();
            let fft = planner.plan_fft_forward(n_fft);
            let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];

            let kernels = bins
                .iter()
                .map(|&freq| {
                    fill_kernel(&mut buffer, freq, q * rate / freq, rate);
                    fft.process(&mut buffer);
                    let scale = ((q * sr / freq).sqrt() / n_fft as f64) as f32;
                    sparsify(&buffer[..n_fft / 2 + 1], scale)
                })
                .collect();

            octaves.push(Octave {
                first_bin,
                level,
                hop: hop_o,
                n_fft,
                kernels,
                fft,
            });
        }

        Ok(Self { hop, octaves })
    }

    pub fn n_bins(&self) -> usize {
        self.octaves.iter().map(|o| o.kernels.len()).sum()
    }

    /// Constant-Q magnitude (`N_BINS` × frames), frames centered on
    /// multiples of the hop.
    pub fn magnitude(&self, signal: &[f32]) -> Result<Spectrogram> {
        let frames = frame_count(signal.len(), self.hop);
        let mut out = Spectrogram::zeros(self.n_bins(), frames);

        let mut current: Cow<[f32]> = Cow::Borrowed(signal);
        let mut level = 0;
        for octave in &self.octaves {
            while level < octave.level {
                current = Cow::Owned(halve(&current)?);
                level += 1;
            }
            octave.respond(&current, &mut out);
        }
        Ok(out)
    }
}

/// Resample to half the rate, keeping sample `2m` of the input aligned with
/// sample `m` of the output.
fn halve(signal: &[f32]) -> Result<Vec<f32>> {
    let mut resampler = FftFixedInOut::<f32>::new(2, 1, RESAMPLE_CHUNK, 1)?;
    let delay = resampler.output_delay();
    let wanted = signal.len().div_ceil(2) + delay;

    let mut input: Vec<Vec<f32>> = vec![Vec::new()];
    let mut output: Vec<Vec<f32>> = vec![Vec::new()];
    let mut halved = Vec::with_capacity(wanted);
    let mut pos = 0;

    while halved.len() < wanted {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(signal.len());
        input[0].clear();
        input[0].extend_from_slice(&signal[pos.min(end)..end]);
        input[0].resize(needed, 0.0);
        pos += needed;

        output[0].clear();
        output[0].resize(resampler.output_frames_next(), 0.0);
        let (_, written) = resampler.process_into_buffer(&input, &mut output, None)?;
        halved.extend_from_slice(&output[0][..written]);
    }

    halved.drain(..delay);
    halved.truncate(wanted - delay);
    Ok(halved)
}

/// Write the time-domain kernel for one bin, centered in `buffer`.
fn fill_kernel(buffer: &mut [Complex<f32>], freq: f64, length: f64, sr: f64) {
    let first = (-length / 2.0).floor() as i64;
    let last = (length / 2.0).floor() as i64;
    let len = (last - first) as usize;
    let window = hann_periodic(len);

    let taps: Vec<Complex<f64>> = (first..last)
        .zip(&window)
        .map(|(n, &w)| {
            let phase = 2.0 * PI * freq * n as f64 / sr;
            Complex::new(phase.cos(), phase.sin()) * w as f64
        })
        .collect();
    let l1: f64 = taps.iter().map(|c| c.norm()).sum();

    buffer.fill(Complex::new(0.0, 0.0));
    let offset = (buffer.len() - len) / 2;
    for (slot, tap) in buffer[offset..offset + len].iter_mut().zip(&taps) {
        let v = *tap / l1;
        *slot = Complex::new(v.re as f32, v.im as f32);
    }
}

/// Keep the largest coefficients of a kernel spectrum, dropping the smallest
/// ones whose magnitudes sum to less than `SPARSITY` of the total.
fn sparsify(spectrum: &[Complex<f32>], scale: f32) -> Kernel {
    let mags: Vec<f32> = spectrum.iter().map(|c| c.norm()).collect();
    let total: f32 = mags.iter().sum();

    let mut sorted = mags.clone();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    let mut cumulative = 0.0;
    let mut threshold = sorted.last().copied().unwrap_or(0.0);
    for &m in &sorted {
        cumulative += m / total;
        if cumulative >= SPARSITY {
            threshold = m;
            break;
        }
    }

    let (indices, weights) = spectrum
        .iter()
        .zip(&mags)
        .enumerate()
        .filter(|(_, (_, m))| **m >= threshold)
        .map(|(k, (&c, _))| (k, c))
        .unzip();

    Kernel {
        indices,
        weights,
        scale,
    }
}
