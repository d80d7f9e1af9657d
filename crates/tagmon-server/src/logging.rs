use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Newtype wrapper for trace IDs stored in request extensions.
///
/// Using a dedicated type instead of bare `String` prevents conflicts
/// with other extensions.
#[derive(Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

/// Generate a 16-character hex trace ID (8 random bytes).
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Request/response logging middleware.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    tracing::info!(trace_id = %trace_id, method = %method, path = %path, "--> request");

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed_ms = start.elapsed().as_millis();
    let status = response.status();

    if status.is_server_error() {
        tracing::error!(trace_id = %trace_id, status = status.as_u16(), elapsed_ms, "<-- response");
    } else if status.is_client_error() {
        tracing::warn!(trace_id = %trace_id, status = status.as_u16(), elapsed_ms, "<-- response");
    } else {
        tracing::info!(trace_id = %trace_id, status = status.as_u16(), elapsed_ms, "<-- response");
    }

    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("X-Trace-Id", val);
    }
    response
}
