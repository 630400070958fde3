use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ChatMessage;

/// One page of a channel's history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MessagePage {
    /// Channel filter echoed back; empty when the page spans all channels.
    pub channel_name: String,

    /// Messages ordered by `(timestamp desc, id desc)`.
    pub messages: Vec<ChatMessage>,

    /// Relative URL of the next page, or an empty string at the end of history.
    pub next_page: String,
}

impl MessagePage {
    /// Whether another page can be requested.
    #[must_use]
    pub fn has_next(&self) -> bool {
        !self.next_page.is_empty()
    }
}
