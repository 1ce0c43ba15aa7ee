//! # Audio Features Service - Main Application Entry Point
//!
//! HTTP service that accepts an uploaded audio file and answers with a flat
//! JSON object of summary audio features (tempo, spectral statistics, MFCC
//! means, chroma, ...).
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, config.toml, APP_ environment variables)
//! - **state**: Shared configuration, decoder and metrics
//! - **audio**: Upload storage and decoding into a mono waveform
//! - **features**: DSP feature extractors and the feature profiles
//! - **pipeline**: acquire → decode → extract for one upload
//! - **handlers**: the `/analyze_audio` endpoint
//! - **health**: liveness and metrics endpoints
//! - **middleware**: request logging (with request ids) and metrics collection
//! - **error**: Error taxonomy and its HTTP mapping

mod audio;       // Upload storage + decoding (audio/ directory)
mod config;      // Configuration management (config.rs)
mod error;       // Error handling types (error.rs)
mod features;    // Feature extraction (features/ directory)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod middleware;  // Custom middleware (middleware/ directory)
mod pipeline;    // Per-upload analysis pipeline (pipeline.rs)
mod state;       // Application state management (state.rs)

#[cfg(test)]
mod testing;     // Synthetic signals and WAV fixtures for unit tests

use crate::config::AppConfig;
use crate::state::AppState;
use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGTERM or SIGINT has been received.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {} (profile: {}, upload limit: {} bytes, spool to disk: {})",
        config.bind_address(),
        config.analysis.profile.as_str(),
        config.upload.max_bytes,
        config.upload.spool_to_disk
    );

    let bind_addr = config.bind_address();
    let workers = config.server.workers;
    let app_state = AppState::new(config);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let mut server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware executes in reverse order for responses
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/analyze_audio", web::post().to(handlers::analyze_audio))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics)),
            )
            .route("/health", web::get().to(health::health_check))
    });

    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    let server = server.bind(&bind_addr)?.run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging filtered by `RUST_LOG`
/// (default: `audio_features_service=debug,actix_web=info`).
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_features_service=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Flip `SHUTDOWN_SIGNAL` on SIGTERM or SIGINT.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolve once `SHUTDOWN_SIGNAL` has been set, polling every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
