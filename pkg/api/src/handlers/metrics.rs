use axum::{http::header, response::IntoResponse};
use pkg_metrics::metrics;

/// GET /metrics — Prometheus text exposition.
pub async fn render() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics().render(),
    )
}
