use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::app_state::AppState;

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

async fn alive() -> impl IntoResponse {
    metrics::counter!("health_checks_total", "endpoint" => "alive", "status" => "ok").increment(1);
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => {
            metrics::counter!("health_checks_total", "endpoint" => "ready", "status" => "ok")
                .increment(1);
            (StatusCode::OK, Json(json!({ "status": "ok" })))
        }
        Err(err) => {
            warn!(error = %err, "store ping failed");
            metrics::counter!("health_checks_total", "endpoint" => "ready", "status" => "error")
                .increment(1);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "errors": { "store": err.to_string() } })),
            )
        }
    }
}

async fn version() -> impl IntoResponse {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

pub fn create_health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health/alive", get(alive))
        .route("/health/ready", get(ready))
        .route("/version", get(version))
}
