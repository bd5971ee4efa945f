use axum::{Json, http::StatusCode, response::IntoResponse};

/// GET /health
pub async fn handle_health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({"status": "healthy"})),
    )
}

/// GET /metrics in Prometheus text exposition format.
pub async fn handle_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        pkg_metrics::global().render(),
    )
}
