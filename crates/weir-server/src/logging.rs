use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Generate a 16-character hex trace ID (8 random bytes).
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[derive(Debug, Clone)]
pub struct TraceId(pub String);

/// Request/response logging middleware. Attaches an `X-Trace-Id` header so
/// log lines can be correlated with responses.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // Swagger UI asset noise is not worth logging.
    if path.starts_with("/docs") {
        return next.run(req).await;
    }

    req.extensions_mut().insert(TraceId(trace_id.clone()));
    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        tracing::error!(%method, %path, %status, ?elapsed, trace_id, "request");
    } else if status.is_client_error() {
        tracing::warn!(%method, %path, %status, ?elapsed, trace_id, "request");
    } else {
        tracing::info!(%method, %path, %status, ?elapsed, trace_id, "request");
    }

    let mut response = response;
    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("X-Trace-Id", val);
    }
    response
}
