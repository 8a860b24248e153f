use std::time::Instant;

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();

    // Successful health probes only at debug.
    if path == "/health" && status.is_success() {
        debug!(method = %method, path = %path, duration_ms = elapsed_ms, "health probe");
        return response;
    }

    info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        "request summary"
    );

    match status {
        StatusCode::UNAUTHORIZED => {
            warn!(method = %method, path = %path, "authentication failure");
        }
        StatusCode::BAD_REQUEST => {
            warn!(method = %method, path = %path, "malformed json-rpc envelope");
        }
        _ => {}
    }

    response
}
