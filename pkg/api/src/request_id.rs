use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use pkg_constants::server::REQUEST_ID_HEADER;
use pkg_metrics::metrics;
use tracing::Instrument;
use uuid::Uuid;

/// Middleware that tags every request with an id, runs it inside a tracing
/// span carrying that id and echoes it in the `x-request-id` header. An id
/// sent by the client is kept.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = req.method().clone();
    let span = tracing::info_span!(
        "api_request",
        request_id = %request_id,
        method = %method,
        path = %req.uri().path(),
    );

    let mut response = next.run(req).instrument(span).await;

    metrics().counter_inc_with(
        "kobs_requests_total",
        &[
            ("method", method.as_str()),
            ("status", response.status().as_str()),
        ],
    );
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
