use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "analysis": {
            "profile": config.analysis.profile.as_str(),
            "feature_count": config.analysis.profile.keys().len(),
            "max_upload_bytes": config.upload.max_bytes,
            "spool_to_disk": config.upload.spool_to_disk
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "analyses_in_flight": metrics.analyses_in_flight,
            "analyses_completed": metrics.analyses_completed,
            "analyses_failed": metrics.analyses_failed
        },
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics.endpoint_metrics.iter().collect();
    endpoint_stats.sort_by(|a, b| a.0.cmp(b.0));
    let endpoint_stats: Vec<_> = endpoint_stats
        .into_iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "requests_per_second": ratio(metrics.request_count, uptime_seconds)
        },
        "analyses": {
            "in_flight": metrics.analyses_in_flight,
            "completed": metrics.analyses_completed,
            "failed": metrics.analyses_failed,
            "failure_rate": ratio(
                metrics.analyses_failed,
                metrics.analyses_completed + metrics.analyses_failed
            )
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                let kb = || {
                    line.split_whitespace()
                        .nth(1)
                        .and_then(|kb| kb.parse::<u64>().ok())
                        .unwrap_or(0)
                };
                if line.starts_with("VmRSS:") {
                    vm_rss = kb() * 1024;
                } else if line.starts_with("VmSize:") {
                    vm_size = kb() * 1024;
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available (pid {})", process::id())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_profile_and_counters() {
        let state = AppState::new(AppConfig::default());
        state.begin_analysis().succeeded();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["analysis"]["profile"], "extended");
        assert_eq!(body["analysis"]["feature_count"], 37);
        assert_eq!(body["metrics"]["analyses_completed"], 1);
        assert_eq!(body["metrics"]["analyses_in_flight"], 0);
    }

    #[actix_web::test]
    async fn test_metrics_lists_endpoints() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 4, false);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["endpoints"][0]["endpoint"], "GET /health");
        assert_eq!(body["endpoints"][0]["request_count"], 1);
        assert_eq!(body["analyses"]["failure_rate"], 0.0);
    }
}
