#![allow(clippy::needless_for_each)] // Derive macro emits a for_each internally

use shared::models::{ActivitySummary, ChatMessage, MessagePage};
use utoipa::OpenApi;

use crate::http::ProblemDetails;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "chatlog read API",
        description = "Paginated chat history and activity rankings"
    ),
    paths(
        crate::handlers::messages::list_messages,
        crate::handlers::activity::list_streams,
        crate::handlers::activity::list_users,
    ),
    components(schemas(ChatMessage, MessagePage, ActivitySummary, ProblemDetails)),
    tags(
        (name = "Messages", description = "Channel history"),
        (name = "Activity", description = "Message counts per channel and per user")
    )
)]
pub struct ApiDoc;
