use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{error, info};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Logs the start and end of every request and tags both lines, plus the
/// response, with a request id. A client-supplied `x-request-id` is reused,
/// otherwise a fresh UUID v4 is generated.
pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

fn request_id(req: &ServiceRequest) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let request_id = request_id(&req);
        let method = req.method().to_string();
        let uri = req.uri().to_string();
        let remote_addr = req.connection_info().realip_remote_addr().unwrap_or("unknown").to_string();

        info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            remote_addr = %remote_addr,
            "Request started"
        );

        let fut = self.service.call(req);

        Box::pin(async move {
            let mut result = fut.await;
            let duration = start_time.elapsed();

            match &mut result {
                Ok(response) => {
                    let status = response.status();
                    info!(
                        request_id = %request_id,
                        method = %method,
                        uri = %uri,
                        status = %status.as_u16(),
                        duration_ms = %duration.as_millis(),
                        "Request completed"
                    );
                    if let Ok(value) = HeaderValue::from_str(&request_id) {
                        response
                            .headers_mut()
                            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
                    }
                }
                Err(err) => {
                    error!(
                        request_id = %request_id,
                        method = %method,
                        uri = %uri,
                        duration_ms = %duration.as_millis(),
                        error = %err,
                        "Request failed"
                    );
                }
            }

            result
        })
    }
}
