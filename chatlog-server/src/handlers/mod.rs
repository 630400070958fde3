pub mod activity;
pub mod messages;

use axum::http::StatusCode;
use tracing::warn;

use crate::http::AppResult;

/// Counts one read-API request by endpoint and response status.
fn record_outcome<T>(endpoint: &'static str, outcome: &AppResult<T>) {
    let status = match outcome {
        Ok(_) => StatusCode::OK,
        Err(err) => {
            warn!(endpoint, error = %err, "read request failed");
            err.status()
        }
    };
    metrics::counter!(
        "chatlog_query_total",
        "endpoint" => endpoint,
        "status" => status.as_u16().to_string()
    )
    .increment(1);
}
