//! # Application State Management
//!
//! State shared by every HTTP worker:
//!
//! - **Configuration**: loaded once at startup, read-only afterwards, so a
//!   plain `Arc<AppConfig>` is enough
//! - **Decoder**: the `AudioDecoder` implementation behind an `Arc<dyn ...>`
//!   so tests can swap in a fake one
//! - **Metrics**: request and analysis counters behind an `Arc<RwLock<...>>`,
//!   updated by the middleware and the analysis handler
//!
//! ## Lock poisoning
//! A panic while a metrics lock is held poisons it. Counters are still
//! meaningful after such a panic, so every access recovers the guard with
//! `PoisonError::into_inner` instead of propagating the panic.

use crate::audio::{AudioDecoder, SymphoniaDecoder};
use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The application state handed to every handler through `web::Data`.
#[derive(Clone)]
pub struct AppState {
    /// Immutable service configuration
    pub config: Arc<AppConfig>,

    /// Turns acquired uploads into waveforms
    pub decoder: Arc<dyn AudioDecoder>,

    /// Counters updated by every request
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Requests answered with a 4xx or 5xx status
    pub error_count: u64,

    /// Analyses currently running on the blocking pool
    pub analyses_in_flight: u32,

    /// Analyses that produced a feature set
    pub analyses_completed: u64,

    /// Analyses that ended in an error response
    pub analyses_failed: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a single endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Cumulative processing time (milliseconds)
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    /// State with the default symphonia decoder.
    pub fn new(config: AppConfig) -> Self {
        Self::with_decoder(config, Arc::new(SymphoniaDecoder::new()))
    }

    pub fn with_decoder(config: AppConfig, decoder: Arc<dyn AudioDecoder>) -> Self {
        Self {
            config: Arc::new(config),
            decoder,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Record one finished request for `endpoint` (e.g. "POST /analyze_audio").
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Mark an analysis as started. The returned guard updates the counters
    /// again when it is dropped.
    pub fn begin_analysis(&self) -> AnalysisGuard {
        self.write_metrics().analyses_in_flight += 1;
        AnalysisGuard {
            state: self.clone(),
            succeeded: false,
        }
    }

    /// Consistent copy of the counters, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Tracks one running analysis.
///
/// Dropping the guard decrements the in-flight counter and counts the
/// analysis as completed if `succeeded` was called, failed otherwise. An
/// analysis whose handler bails out early is therefore still accounted for.
pub struct AnalysisGuard {
    state: AppState,
    succeeded: bool,
}

impl AnalysisGuard {
    pub fn succeeded(&mut self) {
        self.succeeded = true;
    }
}

impl Drop for AnalysisGuard {
    fn drop(&mut self) {
        let mut metrics = self.state.write_metrics();
        metrics.analyses_in_flight = metrics.analyses_in_flight.saturating_sub(1);
        if self.succeeded {
            metrics.analyses_completed += 1;
        } else {
            metrics.analyses_failed += 1;
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
