use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Message volume for one channel or one user, computed by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ActivitySummary {
    /// Channel name (without `#`) or user nickname.
    pub name: String,

    /// Number of persisted messages for `name`.
    #[serde(rename = "num_messages_logged")]
    pub message_count: u64,
}

impl ActivitySummary {
    pub fn new(name: impl Into<String>, message_count: u64) -> Self {
        Self {
            name: name.into(),
            message_count,
        }
    }
}
