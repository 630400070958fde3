use std::sync::Arc;

use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use utoipa::OpenApi;

use crate::{app_state::AppState, openapi::ApiDoc};

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

async fn openapi_yaml() -> impl IntoResponse {
    match ApiDoc::openapi().to_yaml() {
        Ok(yaml) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/yaml"))],
            yaml,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("YAML error: {e}"),
        )
            .into_response(),
    }
}

pub fn openapi_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/openapi.json", get(openapi_json))
        .route("/api/openapi.yaml", get(openapi_yaml))
}
