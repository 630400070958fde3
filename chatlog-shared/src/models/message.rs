use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::timestamp::{self, rfc3339_millis};

/// Channel names arrive from IRC with this presentation prefix.
pub const CHANNEL_PREFIX: char = '#';

/// Strips the IRC presentation prefix from a channel name.
#[must_use]
pub fn bare_channel(name: &str) -> &str {
    name.strip_prefix(CHANNEL_PREFIX).unwrap_or(name)
}

/// One observed chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    /// Identifier assigned by the store; absent until the message is persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Channel the line was posted in, without the `#` prefix.
    pub channel: String,

    /// Nickname of the author.
    pub user: String,

    /// Message body.
    pub text: String,

    /// When the line was received, UTC with millisecond precision.
    #[serde(with = "rfc3339_millis")]
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Creates an unpersisted message, normalizing the channel name and
    /// truncating the timestamp to milliseconds.
    pub fn new(
        channel: impl AsRef<str>,
        user: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            channel: bare_channel(channel.as_ref()).to_string(),
            user: user.into(),
            text: text.into(),
            timestamp: timestamp::truncate_to_millis(timestamp),
        }
    }

    /// Returns the same message carrying a store-assigned identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Epoch milliseconds of [`Self::timestamp`]; the primary sort key.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}
