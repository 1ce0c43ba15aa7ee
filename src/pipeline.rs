//! # Analysis Pipeline
//!
//! One upload in, one feature set (or one classified error) out:
//!
//! 1. **Acquire**: hold the upload in memory or spool it to a temp file
//! 2. **Decode**: turn the container into mono samples at the native rate
//! 3. **Extract**: compute every feature of the configured profile
//!
//! Each stage wraps its collaborator's `anyhow` error into the matching
//! `AppError` variant. The audio source is dropped when this function
//! returns, which removes any spooled file on success and failure alike.
//!
//! Everything here is CPU-bound and synchronous; handlers run it on the
//! blocking thread pool.

use crate::audio::{AudioDecoder, AudioSource, Upload};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::features::{self, FeatureSet};
use std::time::Instant;

pub fn analyze(upload: Upload, decoder: &dyn AudioDecoder, config: &AppConfig) -> AppResult<FeatureSet> {
    let started = Instant::now();
    let filename = upload.filename.clone().unwrap_or_default();

    let source = AudioSource::acquire(upload, &config.upload)
        .map_err(|e| AppError::Internal(format!("{:#}", e)))?;
    if source.is_empty() {
        tracing::warn!("Upload '{}' has no content", filename);
        return Err(AppError::Decode("upload is empty".to_string()));
    }

    let waveform = decoder.decode(&source).map_err(|e| {
        tracing::warn!("Decoding '{}' failed: {:#}", filename, e);
        AppError::Decode(format!("{:#}", e))
    })?;
    tracing::debug!(
        "Decoded '{}': {} samples at {} Hz ({:.2}s)",
        filename,
        waveform.len(),
        waveform.sample_rate,
        waveform.duration_seconds()
    );

    let features = features::extract(&waveform, config.analysis.profile).map_err(|e| {
        tracing::error!("Feature extraction for '{}' failed: {:#}", filename, e);
        AppError::FeatureExtraction(format!("{:#}", e))
    })?;

    tracing::info!(
        "Analyzed '{}' ({} bytes) in {:.2}s",
        filename,
        source.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(features)
}
