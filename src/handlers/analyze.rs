//! # Audio Analysis Handler
//!
//! ## Endpoint: `POST /analyze_audio`
//!
//! ## Request:
//! Multipart form data with one file part. Any field name is accepted unless
//! `upload.field_name` is configured.
//!
//! ## Response:
//! ```json
//! {
//!   "duration": 30.0,
//!   "tempo": 123.05,
//!   "rmse_mean": 0.21,
//!   "mfcc_1_mean": -183.4
//! }
//! ```
//! (one key per feature of the configured profile)
//!
//! ## Errors:
//! - 400 `No file uploaded`: no file part (or not under the configured name)
//! - 400 `No selected file`: the file part has an empty filename or no content
//! - 413: the file part is larger than `upload.max_bytes`
//! - 500 `Could not process file: ...` / `Feature extraction failed: ...`

use crate::audio::Upload;
use crate::config::UploadConfig;
use crate::error::{AppError, AppResult};
use crate::pipeline;
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use std::sync::Arc;

pub async fn analyze_audio(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let upload = read_upload(payload, &state.config.upload).await?;
    tracing::debug!(
        "Received upload '{}' ({} bytes)",
        upload.filename.as_deref().unwrap_or(""),
        upload.bytes.len()
    );

    let mut guard = state.begin_analysis();
    let decoder = Arc::clone(&state.decoder);
    let config = Arc::clone(&state.config);

    // Decoding and extraction are CPU-bound; keep them off the async workers
    let features = web::block(move || pipeline::analyze(upload, decoder.as_ref(), &config))
        .await
        .map_err(|e| AppError::Internal(format!("analysis task failed: {}", e)))??;

    guard.succeeded();
    Ok(HttpResponse::Ok().json(features))
}

/// Pull the first acceptable file part out of the multipart stream.
///
/// Parts without a filename, or with a different name than the configured
/// `field_name`, are skipped. The size limit is enforced while streaming so
/// an oversized upload is never fully buffered.
async fn read_upload(mut payload: Multipart, config: &UploadConfig) -> AppResult<Upload> {
    let mut seen_part = false;

    while let Some(item) = payload.next().await {
        let mut field: Field = match item {
            Ok(field) => field,
            // Missing content type, empty body, no boundary: nothing was uploaded
            Err(e) if !seen_part => {
                tracing::debug!("Multipart stream unusable: {}", e);
                return Err(AppError::MissingUpload);
            }
            Err(e) => return Err(AppError::BadRequest(format!("Multipart error: {}", e))),
        };
        seen_part = true;

        let (name, filename) = field
            .content_disposition()
            .map(|cd| (cd.get_name().map(str::to_string), cd.get_filename().map(str::to_string)))
            .unwrap_or((None, None));

        let name_matches = config
            .field_name
            .as_deref()
            .map_or(true, |wanted| name.as_deref() == Some(wanted));

        let Some(filename) = filename.filter(|_| name_matches) else {
            drain(&mut field).await?;
            continue;
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
            if bytes.len() + chunk.len() > config.max_bytes {
                return Err(AppError::PayloadTooLarge(config.max_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }

        if config.require_filename && (filename.is_empty() || bytes.is_empty()) {
            return Err(AppError::EmptyFilename);
        }

        let filename = Some(filename).filter(|f| !f.is_empty());
        return Ok(Upload::new(filename, bytes));
    }

    Err(AppError::MissingUpload)
}

async fn drain(field: &mut Field) -> AppResult<()> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::features::FeatureProfile;
    use crate::testing::{sine, wav_bytes};
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};

    const BOUNDARY: &str = "feature-test-boundary";

    /// A multipart part: (field name, filename, content).
    type Part<'a> = (&'a str, Option<&'a str>, &'a [u8]);

    fn multipart_body(parts: &[Part]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match filename {
                Some(filename) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n",
                            name, filename
                        )
                        .as_bytes(),
                    );
                }
                None => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                    );
                }
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn core_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.analysis.profile = FeatureProfile::Core;
        config
    }

    fn tone_wav() -> Vec<u8> {
        wav_bytes(&sine(440.0, 22050, 1.0, 0.5), 22050)
    }

    async fn post(state: AppState, parts: &[Part<'_>]) -> (StatusCode, serde_json::Value) {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/analyze_audio", web::post().to(analyze_audio)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/analyze_audio")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body(parts))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        let body: serde_json::Value = test::read_body_json(resp).await;
        (status, body)
    }

    #[actix_web::test]
    async fn test_valid_upload_returns_features() {
        let state = AppState::new(core_config());
        let wav = tone_wav();
        let (status, body) = post(state.clone(), &[("file", Some("tone.wav"), wav.as_slice())]).await;

        assert_eq!(status, StatusCode::OK);
        let object = body.as_object().unwrap();
        assert_eq!(object.len(), 28);
        assert!(object.values().all(|v| v.as_f64().map_or(false, f64::is_finite)));
        assert!((body["duration"].as_f64().unwrap() - 1.0).abs() < 1e-6);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.analyses_completed, 1);
        assert_eq!(snapshot.analyses_in_flight, 0);
    }

    #[actix_web::test]
    async fn test_text_fields_are_skipped() {
        let wav = tone_wav();
        let (status, _) = post(
            AppState::new(core_config()),
            &[("comment", None, &b"hello"[..]), ("upload", Some("tone.wav"), wav.as_slice())],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_no_file_part() {
        let (status, body) = post(AppState::new(core_config()), &[("comment", None, &b"hello"[..])]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({ "error": "No file uploaded" }));
    }

    #[actix_web::test]
    async fn test_missing_content_type() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(core_config())))
                .route("/analyze_audio", web::post().to(analyze_audio)),
        )
        .await;

        let req = test::TestRequest::post().uri("/analyze_audio").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No file uploaded");
    }

    #[actix_web::test]
    async fn test_empty_multipart_body() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(core_config())))
                .route("/analyze_audio", web::post().to(analyze_audio)),
        )
        .await;

        let closing = format!("--{}--\r\n", BOUNDARY);
        for body in [String::new(), closing] {
            let req = test::TestRequest::post()
                .uri("/analyze_audio")
                .insert_header((
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                ))
                .set_payload(body.clone())
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {:?}", body);
            let json: serde_json::Value = test::read_body_json(resp).await;
            assert_eq!(json, serde_json::json!({ "error": "No file uploaded" }));
        }
    }

    #[actix_web::test]
    async fn test_empty_filename() {
        let wav = tone_wav();
        let (status, body) = post(AppState::new(core_config()), &[("file", Some(""), wav.as_slice())]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No selected file");
    }

    #[actix_web::test]
    async fn test_empty_content() {
        let (status, body) = post(AppState::new(core_config()), &[("file", Some("a.wav"), &b""[..])]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No selected file");
    }

    #[actix_web::test]
    async fn test_configured_field_name() {
        let mut config = core_config();
        config.upload.field_name = Some("audio".to_string());
        let wav = tone_wav();

        let (status, body) = post(AppState::new(config.clone()), &[("file", Some("tone.wav"), wav.as_slice())]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file uploaded");

        let (status, _) = post(AppState::new(config), &[("audio", Some("tone.wav"), wav.as_slice())]).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_upload_too_large() {
        let mut config = core_config();
        config.upload.max_bytes = 64;
        let (status, body) = post(AppState::new(config), &[("file", Some("big.wav"), &[0u8; 1024][..])]).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].as_str().unwrap().contains("64"));
    }

    #[actix_web::test]
    async fn test_corrupt_upload() {
        let state = AppState::new(core_config());
        let (status, body) = post(state.clone(), &[("file", Some("song.mp3"), &b"not really an mp3"[..])]).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = body["error"].as_str().unwrap();
        assert!(message.starts_with("Could not process file: "), "{}", message);
        assert_eq!(body.as_object().unwrap().len(), 1);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.analyses_failed, 1);
        assert_eq!(snapshot.analyses_in_flight, 0);
    }

    /// Decoder that ignores the upload and returns a fixed waveform.
    struct FixedDecoder(crate::audio::Waveform);

    impl crate::audio::AudioDecoder for FixedDecoder {
        fn decode(&self, _source: &crate::audio::AudioSource) -> anyhow::Result<crate::audio::Waveform> {
            Ok(self.0.clone())
        }
    }

    #[actix_web::test]
    async fn test_extractor_failure() {
        // The extended profile needs a sample rate high enough for the constant-Q range
        let low_rate = crate::audio::Waveform::new(sine(440.0, 8000, 0.5, 0.5), 8000);
        let state = AppState::with_decoder(AppConfig::default(), Arc::new(FixedDecoder(low_rate)));
        let wav = tone_wav();

        let (status, body) = post(state, &[("file", Some("tone.wav"), wav.as_slice())]).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().starts_with("Feature extraction failed: "));
    }
}
