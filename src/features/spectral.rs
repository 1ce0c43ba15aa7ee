// Spectral module - Frequency-domain feature extraction
//
// Every function takes a magnitude spectrogram |X| (bins × frames) plus the
// bin frequencies and returns one value per frame, except contrast which
// returns one value per band and frame.
//
// References:
// - Peeters, G. (2004). A large set of audio features for sound description
// - Jiang, D.-N. et al. (2002). Music type classification by spectral contrast

use super::stft::Spectrogram;
use anyhow::{bail, Result};

/// Fraction of spectral magnitude below the rolloff frequency
const ROLLOFF_PERCENT: f64 = 0.85;

/// Floor for the power spectrum in the flatness measure
const FLATNESS_AMIN: f64 = 1e-10;

/// Lower edge of the first spectral contrast band (Hz)
const CONTRAST_FMIN: f64 = 200.0;

/// Number of octave bands for spectral contrast
const CONTRAST_BANDS: usize = 6;

/// Fraction of each band averaged into its peak/valley estimate
const CONTRAST_QUANTILE: f64 = 0.02;

/// Magnitude-weighted mean frequency of each frame (Hz).
///
/// Frames with no energy are not normalized and come out as 0.
pub fn centroid(spec: &Spectrogram, freqs: &[f64]) -> Vec<f64> {
    spec.iter_frames()
        .map(|frame| {
            let total = frame_total(frame);
            let weighted: f64 = frame.iter().zip(freqs).map(|(&m, &f)| m as f64 * f).sum();
            weighted / total
        })
        .collect()
}

/// Order-2 spectral bandwidth around each frame's centroid (Hz).
pub fn bandwidth(spec: &Spectrogram, freqs: &[f64], centroids: &[f64]) -> Vec<f64> {
    spec.iter_frames()
        .zip(centroids)
        .map(|(frame, &center)| {
            let total = frame_total(frame);
            let spread: f64 = frame
                .iter()
                .zip(freqs)
                .map(|(&m, &f)| (m as f64 / total) * (f - center).powi(2))
                .sum();
            spread.sqrt()
        })
        .collect()
}

/// Lowest frequency below which 85% of each frame's magnitude lies (Hz).
pub fn rolloff(spec: &Spectrogram, freqs: &[f64]) -> Vec<f64> {
    spec.iter_frames()
        .map(|frame| {
            let total: f64 = frame.iter().map(|&m| m as f64).sum();
            let threshold = ROLLOFF_PERCENT * total;
            let mut cumulative = 0.0;
            for (&m, &f) in frame.iter().zip(freqs) {
                cumulative += m as f64;
                if cumulative >= threshold {
                    return f;
                }
            }
            freqs.last().copied().unwrap_or(0.0)
        })
        .collect()
}

/// Geometric over arithmetic mean of each frame's power spectrum.
///
/// Close to 0 for tonal frames, close to 1 for white noise. Silent frames
/// are floored to `1e-10` everywhere and therefore report 1.
pub fn flatness(spec: &Spectrogram) -> Vec<f64> {
    spec.iter_frames()
        .map(|frame| {
            let n = frame.len() as f64;
            let powers = frame.iter().map(|&m| ((m as f64) * (m as f64)).max(FLATNESS_AMIN));
            let (log_sum, sum) = powers.fold((0.0, 0.0), |(l, s), p| (l + p.ln(), s + p));
            (log_sum / n).exp() / (sum / n)
        })
        .collect()
}

/// Peak-to-valley contrast (dB) of octave sub-bands.
///
/// Returns `CONTRAST_BANDS + 1` rows per frame: six octave bands starting at
/// 200 Hz plus everything below. Fails when a band's lower edge reaches the
/// Nyquist frequency.
pub fn contrast(spec: &Spectrogram, freqs: &[f64], sample_rate: u32) -> Result<Spectrogram> {
    let nyquist = sample_rate as f64 / 2.0;

    // Band edges: [0, fmin, 2·fmin, ..., 2^n·fmin]
    let mut edges = vec![0.0; CONTRAST_BANDS + 2];
    for (k, edge) in edges.iter_mut().enumerate().skip(1) {
        *edge = CONTRAST_FMIN * 2f64.powi(k as i32 - 1);
    }
    if edges[..edges.len() - 1].iter().any(|&e| e >= nyquist) {
        bail!(
            "spectral contrast band edge {} Hz exceeds Nyquist ({} Hz)",
            edges[edges.len() - 2],
            nyquist
        );
    }

    let bands = band_layout(freqs, &edges)?;
    let mut peaks = Spectrogram::zeros(bands.len(), spec.frames());
    let mut valleys = Spectrogram::zeros(bands.len(), spec.frames());
    let mut scratch = Vec::new();

    for t in 0..spec.frames() {
        let frame = spec.frame(t);
        for (k, band) in bands.iter().enumerate() {
            scratch.clear();
            scratch.extend_from_slice(&frame[band.lo..band.hi]);
            scratch.sort_unstable_by(|a, b| a.total_cmp(b));

            let take = band.quantile_count.min(scratch.len()).max(1);
            let valley = scratch[..take].iter().map(|&v| v as f64).sum::<f64>() / take as f64;
            let peak = scratch[scratch.len() - take..].iter().map(|&v| v as f64).sum::<f64>() / take as f64;
            valleys.set(k, t, valley as f32);
            peaks.set(k, t, peak as f32);
        }
    }

    let peaks_db = super::stats::power_to_db(&peaks);
    let valleys_db = super::stats::power_to_db(&valleys);

    let mut out = Spectrogram::zeros(bands.len(), spec.frames());
    for t in 0..spec.frames() {
        for k in 0..bands.len() {
            out.set(k, t, peaks_db.get(k, t) - valleys_db.get(k, t));
        }
    }
    Ok(out)
}

/// Rows of the spectrogram that make up one contrast band.
struct Band {
    lo: usize,
    hi: usize,
    quantile_count: usize,
}

fn band_layout(freqs: &[f64], edges: &[f64]) -> Result<Vec<Band>> {
    let last_band = edges.len() - 2;
    let mut bands = Vec::with_capacity(edges.len() - 1);

    for (k, pair) in edges.windows(2).enumerate() {
        let (f_low, f_high) = (pair[0], pair[1]);
        let members: Vec<usize> = freqs
            .iter()
            .enumerate()
            .filter(|(_, &f)| f >= f_low && f <= f_high)
            .map(|(i, _)| i)
            .collect();
        let (Some(&first), Some(&last)) = (members.first(), members.last()) else {
            bail!("spectral contrast band {}-{} Hz contains no bins", f_low, f_high);
        };

        // Bands overlap their lower neighbour by one bin; the top band runs to Nyquist
        let lo = if k > 0 { first.saturating_sub(1) } else { first };
        let hi_inclusive = if k == last_band { freqs.len() - 1 } else { last };
        let member_count = hi_inclusive - lo + 1;

        // Every band but the top one drops its highest bin from the statistics
        let hi = if k < last_band { hi_inclusive } else { hi_inclusive + 1 };
        if hi <= lo {
            bail!("spectral contrast band {}-{} Hz is too narrow", f_low, f_high);
        }

        let quantile_count = ((CONTRAST_QUANTILE * member_count as f64).round() as usize).max(1);
        bands.push(Band { lo, hi, quantile_count });
    }
    Ok(bands)
}

/// Coefficients of an order-1 least-squares fit of each frame against
/// frequency: rows are [slope, intercept].
pub fn poly_features(spec: &Spectrogram, freqs: &[f64]) -> Spectrogram {
    let n = freqs.len() as f64;
    let sum_x: f64 = freqs.iter().sum();
    let sum_xx: f64 = freqs.iter().map(|f| f * f).sum();
    let denom = n * sum_xx - sum_x * sum_x;

    let mut out = Spectrogram::zeros(2, spec.frames());
    for t in 0..spec.frames() {
        let frame = spec.frame(t);
        let sum_y: f64 = frame.iter().map(|&m| m as f64).sum();
        let sum_xy: f64 = frame.iter().zip(freqs).map(|(&m, &f)| m as f64 * f).sum();

        let slope = if denom.abs() > f64::EPSILON {
            (n * sum_xy - sum_x * sum_y) / denom
        } else {
            0.0
        };
        let intercept = (sum_y - slope * sum_x) / n;
        out.set(0, t, slope as f32);
        out.set(1, t, intercept as f32);
    }
    out
}

/// Divisor used to normalize a frame: its magnitude sum, or 1 when the frame
/// is silent.
fn frame_total(frame: &[f32]) -> f64 {
    let total: f64 = frame.iter().map(|&m| m as f64).sum();
    if total > f32::MIN_POSITIVE as f64 {
        total
    } else {
        1.0
    }
}
