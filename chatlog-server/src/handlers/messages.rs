use std::sync::Arc;

use axum::{
    Json,
    extract::{OriginalUri, RawQuery, State},
};
use shared::models::{MessagePage, bare_channel};
use tracing::{debug, instrument};

use super::record_outcome;
use crate::{
    app_state::AppState,
    http::{AppResult, ProblemDetails},
    query::{
        Finder,
        params::{HistoryParams, query_pairs},
    },
};

/// Message history for one channel, newest first, cursor-paginated.
#[utoipa::path(
    get,
    path = "/api/messages",
    params(
        ("stream" = Option<String>, Query, description = "Channel name without `#`; omit to read every channel"),
        ("limit" = Option<usize>, Query, description = "Page size, 1 to 1000, default 10"),
        ("after_timestamp" = Option<i64>, Query, description = "Cursor timestamp (epoch ms); requires `after_id`"),
        ("after_id" = Option<String>, Query, description = "Cursor message id; requires `after_timestamp`"),
    ),
    responses(
        (status = 200, description = "One page of history", body = MessagePage),
        (status = 400, description = "Invalid parameter", body = String, content_type = "text/plain"),
        (status = 500, description = "Store query or decoding failed", body = ProblemDetails, content_type = "application/problem+json")
    ),
    tag = "Messages"
)]
#[instrument(skip_all)]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    RawQuery(query): RawQuery,
) -> AppResult<Json<MessagePage>> {
    let page = history_page(&state, uri.path(), query.as_deref()).await;
    record_outcome("messages", &page);
    page.map(Json)
}

async fn history_page(state: &AppState, path: &str, query: Option<&str>) -> AppResult<MessagePage> {
    let pairs = query_pairs(query);
    let params = HistoryParams::from_pairs(&pairs)?;
    debug!(stream = ?params.stream, limit = params.limit, cursor = ?params.cursor, "reading history");

    let response = Finder::history()
        .channel(params.stream.as_deref())
        .size(params.limit)
        .after(params.cursor)
        .timeout(state.query_timeout)
        .find(state.store.as_ref())
        .await?;

    let next_page = response
        .next
        .map(|cursor| cursor.next_page_url(path, &pairs))
        .unwrap_or_default();

    Ok(MessagePage {
        channel_name: params
            .stream
            .as_deref()
            .map(|stream| bare_channel(stream.trim()))
            .unwrap_or_default()
            .to_string(),
        messages: response.messages,
        next_page,
    })
}
