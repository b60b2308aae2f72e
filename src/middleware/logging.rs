//! Request logging middleware.
//!
//! One line per request with method, path, status and latency. Degraded
//! acquisitions (503) are logged apart from genuine server errors.

use axum::{body::Body, http::Request, http::StatusCode, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, info, warn};

pub async fn request_logging_simple(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let conditional = request.headers().contains_key(axum::http::header::IF_NONE_MATCH);

    // Health probes are too chatty to log
    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status();

    match status {
        StatusCode::SERVICE_UNAVAILABLE => warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            "Request degraded (upstream unavailable)"
        ),
        s if s.is_server_error() => warn!(
            method = %method,
            path = %path,
            status = s.as_u16(),
            latency_ms,
            "Request failed (5xx)"
        ),
        StatusCode::NOT_MODIFIED => debug!(
            method = %method,
            path = %path,
            latency_ms,
            "Request not modified"
        ),
        s => info!(
            method = %method,
            path = %path,
            status = s.as_u16(),
            latency_ms,
            conditional,
            "Request completed"
        ),
    }

    response
}
