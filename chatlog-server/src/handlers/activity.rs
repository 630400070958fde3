use std::sync::Arc;

use axum::{
    Json,
    extract::{RawQuery, State},
};
use shared::models::ActivitySummary;
use tracing::instrument;

use super::record_outcome;
use crate::{
    app_state::AppState,
    http::{AppResult, ProblemDetails},
    query::{
        Finder,
        params::{ListingParams, query_pairs},
    },
    store::AggregationField,
};

async fn most_active(
    state: &AppState,
    query: Option<&str>,
    field: AggregationField,
) -> AppResult<Vec<ActivitySummary>> {
    let params = ListingParams::from_pairs(&query_pairs(query))?;
    let response = Finder::new()
        .aggregate(field, params.limit)
        .timeout(state.query_timeout)
        .find(state.store.as_ref())
        .await?;
    Ok(response.buckets)
}

/// Channels ordered by number of logged messages.
#[utoipa::path(
    get,
    path = "/api/streams",
    params(
        ("limit" = Option<usize>, Query, description = "Number of channels, 1 to 1000, default 10"),
    ),
    responses(
        (status = 200, description = "Most active channels", body = Vec<ActivitySummary>),
        (status = 400, description = "Invalid parameter", body = String, content_type = "text/plain"),
        (status = 500, description = "Store query failed", body = ProblemDetails, content_type = "application/problem+json")
    ),
    tag = "Activity"
)]
#[instrument(skip_all)]
pub async fn list_streams(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> AppResult<Json<Vec<ActivitySummary>>> {
    let streams = most_active(&state, query.as_deref(), AggregationField::Channel).await;
    record_outcome("streams", &streams);
    streams.map(Json)
}

/// Users ordered by number of logged messages.
#[utoipa::path(
    get,
    path = "/api/users",
    params(
        ("limit" = Option<usize>, Query, description = "Number of users, 1 to 1000, default 10"),
    ),
    responses(
        (status = 200, description = "Most active users", body = Vec<ActivitySummary>),
        (status = 400, description = "Invalid parameter", body = String, content_type = "text/plain"),
        (status = 500, description = "Store query failed", body = ProblemDetails, content_type = "application/problem+json")
    ),
    tag = "Activity"
)]
#[instrument(skip_all)]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> AppResult<Json<Vec<ActivitySummary>>> {
    let users = most_active(&state, query.as_deref(), AggregationField::User).await;
    record_outcome("users", &users);
    users.map(Json)
}
