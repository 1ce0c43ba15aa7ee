//! # Feature Extraction
//!
//! Turns a decoded waveform into a flat map of named statistics.
//!
//! ## Key Components:
//! - **Profiles**: the fixed, ordered list of features to compute (`core` or `extended`)
//! - **Feature**: one entry of a profile; knows its output keys and how to compute them
//! - **AnalysisContext**: per-request cache of intermediate spectrograms so that
//!   extractors sharing an STFT, mel spectrogram or constant-Q transform compute it once
//! - **FeatureSet**: the result, serialized as a plain JSON object of numbers
//!
//! ## Analysis Defaults:
//! - FFT size 2048, hop 512, periodic Hann window, centered frames
//! - Every time series is reduced to its arithmetic mean
//! - Results are `f64`; a non-finite value fails the whole extraction

pub mod chroma;    // Pitch class profiles, CENS, tonnetz
pub mod cqt;       // Constant-Q transform
pub mod hpss;      // Harmonic/percussive separation
pub mod mel;       // Mel filterbank, mel spectrogram, MFCC
pub mod spectral;  // Centroid, bandwidth, rolloff, flatness, contrast, poly fit
pub mod stats;     // Means, normalizations, dB conversion
pub mod stft;      // STFT and the Spectrogram container
pub mod tempo;     // Onset strength + global tempo
pub mod temporal;  // RMS energy, zero-crossing rate

use crate::audio::Waveform;
use anyhow::{bail, Context, Result};
use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use cqt::ConstantQ;
use hpss::Separation;
use stats::mean;
use stft::{fft_frequencies, Spectrogram, Stft, HOP_LENGTH, N_FFT};

/// Which fixed list of features a request computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureProfile {
    /// Duration, tempo, energy, timbre and 20 MFCCs (28 keys)
    Core,
    /// Core plus HPSS, chroma, tonnetz, mel, contrast and polynomial features (37 keys)
    Extended,
}

const CORE_FEATURES: &[Feature] = &[
    Feature::Duration,
    Feature::Tempo,
    Feature::Rmse,
    Feature::ZeroCrossingRate,
    Feature::SpectralCentroid,
    Feature::SpectralBandwidth,
    Feature::SpectralRolloff,
    Feature::SpectralFlatness,
    Feature::Mfcc,
];

const EXTENDED_FEATURES: &[Feature] = &[
    Feature::Duration,
    Feature::Tempo,
    Feature::Rmse,
    Feature::ZeroCrossingRate,
    Feature::SpectralCentroid,
    Feature::SpectralBandwidth,
    Feature::SpectralRolloff,
    Feature::SpectralFlatness,
    Feature::Mfcc,
    Feature::Harmonic,
    Feature::Percussive,
    Feature::ChromaStft,
    Feature::ChromaCqt,
    Feature::ChromaCens,
    Feature::Tonnetz,
    Feature::MelSpectrogram,
    Feature::SpectralContrast,
    Feature::PolyFeatures,
];

impl FeatureProfile {
    pub fn features(self) -> &'static [Feature] {
        match self {
            FeatureProfile::Core => CORE_FEATURES,
            FeatureProfile::Extended => EXTENDED_FEATURES,
        }
    }

    /// Every key a successful extraction under this profile produces.
    pub fn keys(self) -> Vec<String> {
        self.features().iter().flat_map(|f| f.keys()).collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeatureProfile::Core => "core",
            FeatureProfile::Extended => "extended",
        }
    }
}

/// One entry of a feature profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Duration,
    Tempo,
    Rmse,
    ZeroCrossingRate,
    SpectralCentroid,
    SpectralBandwidth,
    SpectralRolloff,
    SpectralFlatness,
    Mfcc,
    Harmonic,
    Percussive,
    ChromaStft,
    ChromaCqt,
    ChromaCens,
    Tonnetz,
    MelSpectrogram,
    SpectralContrast,
    PolyFeatures,
}

impl Feature {
    pub fn name(self) -> &'static str {
        match self {
            Feature::Duration => "duration",
            Feature::Tempo => "tempo",
            Feature::Rmse => "rmse_mean",
            Feature::ZeroCrossingRate => "zero_crossing_rate_mean",
            Feature::SpectralCentroid => "spectral_centroid_mean",
            Feature::SpectralBandwidth => "spectral_bandwidth_mean",
            Feature::SpectralRolloff => "spectral_rolloff_mean",
            Feature::SpectralFlatness => "spectral_flatness_mean",
            Feature::Mfcc => "mfcc",
            Feature::Harmonic => "harmonic_mean",
            Feature::Percussive => "percussive_mean",
            Feature::ChromaStft => "chroma_stft_mean",
            Feature::ChromaCqt => "chroma_cqt_mean",
            Feature::ChromaCens => "chroma_cens_mean",
            Feature::Tonnetz => "tonnetz_mean",
            Feature::MelSpectrogram => "mel_spectrogram_mean",
            Feature::SpectralContrast => "spectral_contrast_mean",
            Feature::PolyFeatures => "poly_features_mean",
        }
    }

    /// Output keys, in order. Only MFCC produces more than one.
    pub fn keys(self) -> Vec<String> {
        match self {
            Feature::Mfcc => (1..=mel::N_MFCC).map(mfcc_key).collect(),
            other => vec![other.name().to_string()],
        }
    }

    pub fn compute(self, ctx: &AnalysisContext) -> Result<Vec<(String, f64)>> {
        let single = |value: f64| -> Result<Vec<(String, f64)>> {
            Ok(vec![(self.name().to_string(), value)])
        };
        let freqs = || fft_frequencies(ctx.sample_rate(), N_FFT);

        match self {
            Feature::Duration => single(ctx.waveform.duration_seconds()),
            Feature::Tempo => {
                let envelope = tempo::onset_strength(ctx.mel_db(), N_FFT, HOP_LENGTH);
                single(tempo::estimate(&envelope, ctx.sample_rate(), HOP_LENGTH))
            }
            Feature::Rmse => single(mean(&temporal::rms(ctx.samples()))),
            Feature::ZeroCrossingRate => single(mean(&temporal::zero_crossing_rate(ctx.samples()))),
            Feature::SpectralCentroid => single(mean_f64(ctx.centroid())),
            Feature::SpectralBandwidth => {
                let widths = spectral::bandwidth(ctx.magnitude(), &freqs(), ctx.centroid());
                single(mean_f64(&widths))
            }
            Feature::SpectralRolloff => single(mean_f64(&spectral::rolloff(ctx.magnitude(), &freqs()))),
            Feature::SpectralFlatness => single(mean_f64(&spectral::flatness(ctx.magnitude()))),
            Feature::Mfcc => {
                let coeffs = mel::mfcc(ctx.mel_db());
                Ok((0..coeffs.bins())
                    .map(|k| {
                        let row: Vec<f32> = (0..coeffs.frames()).map(|t| coeffs.get(k, t)).collect();
                        (mfcc_key(k + 1), mean(&row))
                    })
                    .collect())
            }
            Feature::Harmonic => single(mean(&ctx.separation().harmonic)),
            Feature::Percussive => single(mean(&ctx.separation().percussive)),
            Feature::ChromaStft => {
                single(chroma::chroma_stft(&ctx.power(), ctx.sample_rate(), N_FFT).mean())
            }
            Feature::ChromaCqt => single(chroma::chroma_cqt(ctx.cqt()?).mean()),
            Feature::ChromaCens => single(chroma::chroma_cens(ctx.cqt()?).mean()),
            Feature::Tonnetz => {
                let harmonic_cqt = ctx.constant_q()?.magnitude(&ctx.separation().harmonic)?;
                single(chroma::tonnetz(&chroma::chroma_cqt(&harmonic_cqt)).mean())
            }
            Feature::MelSpectrogram => single(ctx.mel_power().mean()),
            Feature::SpectralContrast => {
                let contrast = spectral::contrast(ctx.magnitude(), &freqs(), ctx.sample_rate())?;
                single(contrast.mean())
            }
            Feature::PolyFeatures => single(spectral::poly_features(ctx.magnitude(), &freqs()).mean()),
        }
    }
}

fn mfcc_key(index: usize) -> String {
    format!("mfcc_{}_mean", index)
}

fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Intermediate results shared by the extractors of one request.
///
/// Each cache is filled on first use and lives as long as the context, so
/// a profile that never asks for the constant-Q transform never builds it.
pub struct AnalysisContext<'a> {
    waveform: &'a Waveform,
    stft: Stft,
    magnitude: OnceCell<Spectrogram>,
    mel_power: OnceCell<Spectrogram>,
    mel_db: OnceCell<Spectrogram>,
    centroid: OnceCell<Vec<f64>>,
    separation: OnceCell<Separation>,
    constant_q: OnceCell<ConstantQ>,
    cqt: OnceCell<Spectrogram>,
}

impl<'a> AnalysisContext<'a> {
    pub fn new(waveform: &'a Waveform) -> Self {
        Self {
            waveform,
            stft: Stft::new(N_FFT, HOP_LENGTH),
            magnitude: OnceCell::new(),
            mel_power: OnceCell::new(),
            mel_db: OnceCell::new(),
            centroid: OnceCell::new(),
            separation: OnceCell::new(),
            constant_q: OnceCell::new(),
            cqt: OnceCell::new(),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.waveform.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.waveform.sample_rate
    }

    /// |STFT|
    pub fn magnitude(&self) -> &Spectrogram {
        self.magnitude.get_or_init(|| self.stft.magnitude(self.samples()))
    }

    /// |STFT|², not cached
    pub fn power(&self) -> Spectrogram {
        self.magnitude().map(|m| m * m)
    }

    pub fn mel_power(&self) -> &Spectrogram {
        self.mel_power
            .get_or_init(|| mel::melspectrogram(&self.power(), self.sample_rate(), N_FFT))
    }

    pub fn mel_db(&self) -> &Spectrogram {
        self.mel_db.get_or_init(|| stats::power_to_db(self.mel_power()))
    }

    fn centroid(&self) -> &[f64] {
        self.centroid.get_or_init(|| {
            spectral::centroid(self.magnitude(), &fft_frequencies(self.sample_rate(), N_FFT))
        })
    }

    pub fn separation(&self) -> &Separation {
        self.separation
            .get_or_init(|| hpss::separate(&self.stft, self.samples(), self.magnitude()))
    }

    pub fn constant_q(&self) -> Result<&ConstantQ> {
        self.constant_q
            .get_or_try_init(|| ConstantQ::new(self.sample_rate(), HOP_LENGTH))
    }

    /// Constant-Q magnitude of the full signal.
    pub fn cqt(&self) -> Result<&Spectrogram> {
        self.cqt
            .get_or_try_init(|| self.constant_q()?.magnitude(self.samples()))
    }
}

/// Named feature values, serialized as a flat JSON object.
///
/// Every value is finite and every key appears once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeMap<String, f64>);

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) -> Result<()> {
        let key = key.into();
        if !value.is_finite() {
            bail!("{} is not finite ({})", key, value);
        }
        if self.0.contains_key(&key) {
            bail!("{} computed twice", key);
        }
        self.0.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Compute every feature of `profile` for `waveform`.
///
/// Any failing extractor or non-finite value fails the whole call; no
/// partial result is returned.
pub fn extract(waveform: &Waveform, profile: FeatureProfile) -> Result<FeatureSet> {
    if waveform.is_empty() {
        bail!("waveform contains no samples");
    }
    if waveform.sample_rate == 0 {
        bail!("waveform has a sample rate of 0");
    }

    let started = Instant::now();
    let ctx = AnalysisContext::new(waveform);
    let mut features = FeatureSet::new();

    for feature in profile.features() {
        let feature_start = Instant::now();
        let values = feature
            .compute(&ctx)
            .with_context(|| format!("{} extraction failed", feature.name()))?;
        for (key, value) in values {
            features.insert(key, value)?;
        }
        tracing::debug!(
            "Computed {} in {:.1}ms",
            feature.name(),
            feature_start.elapsed().as_secs_f64() * 1000.0
        );
    }

    tracing::info!(
        "Extracted {} features ({} profile) from {:.2}s of audio in {:.2}s",
        features.len(),
        profile.as_str(),
        waveform.duration_seconds(),
        started.elapsed().as_secs_f64()
    );
    Ok(features)
}
