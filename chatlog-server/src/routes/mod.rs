use std::sync::Arc;

use axum::{Router, routing::get};

use crate::{
    app_state::AppState,
    handlers::{activity, messages},
};

pub mod health;
pub mod openapi;

/// Read endpoints, mounted under `/api`.
pub fn create_read_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/messages", get(messages::list_messages))
        .route("/streams", get(activity::list_streams))
        .route("/users", get(activity::list_users))
}
