use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::models::{ChatMessage, bare_channel, timestamp};

/// Stored representation of a [`ChatMessage`].
///
/// The identifier is not part of the document; the store assigns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDocument {
    pub channel: String,
    pub user: String,
    pub text: String,
    /// Epoch milliseconds.
    pub timestamp: StoredTimestamp,
}

/// Timestamps are written as epoch milliseconds; older documents may carry
/// RFC 3339 strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredTimestamp {
    Millis(i64),
    Text(String),
}

impl StoredTimestamp {
    /// # Errors
    /// Returns a description of the value when it is not a valid instant.
    pub fn to_datetime(&self) -> Result<DateTime<Utc>, String> {
        match self {
            Self::Millis(millis) => timestamp::from_millis(*millis)
                .ok_or_else(|| format!("timestamp {millis} is out of range")),
            Self::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|parsed| timestamp::truncate_to_millis(parsed.with_timezone(&Utc)))
                .map_err(|err| format!("timestamp '{text}': {err}")),
        }
    }

    #[must_use]
    pub fn millis(&self) -> Option<i64> {
        match self {
            Self::Millis(millis) => Some(*millis),
            Self::Text(_) => self.to_datetime().ok().map(|dt| dt.timestamp_millis()),
        }
    }
}

impl From<&ChatMessage> for MessageDocument {
    fn from(message: &ChatMessage) -> Self {
        Self {
            channel: bare_channel(&message.channel).to_string(),
            user: message.user.clone(),
            text: message.text.clone(),
            timestamp: StoredTimestamp::Millis(message.timestamp_millis()),
        }
    }
}

impl MessageDocument {
    /// Rebuilds the domain message under the store-assigned `id`.
    ///
    /// # Errors
    /// Returns a description of the first invalid field.
    pub fn into_message(self, id: impl Into<String>) -> Result<ChatMessage, String> {
        let channel = bare_channel(&self.channel);
        if channel.is_empty() {
            return Err("channel is empty".to_string());
        }
        if self.user.is_empty() {
            return Err("user is empty".to_string());
        }

        let timestamp = self.timestamp.to_datetime()?;
        Ok(ChatMessage::new(channel, self.user, self.text, timestamp).with_id(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn documents_store_epoch_millis() {
        let message = ChatMessage::new(
            "#foo",
            "bob",
            "hi",
            timestamp::from_millis(1_700_000_000_123).unwrap(),
        );

        let value = serde_json::to_value(MessageDocument::from(&message)).unwrap();
        assert_eq!(
            value,
            json!({"channel": "foo", "user": "bob", "text": "hi", "timestamp": 1_700_000_000_123_i64})
        );
    }

    #[test]
    fn legacy_rfc3339_timestamps_are_accepted() {
        let document: MessageDocument = serde_json::from_value(json!({
            "channel": "#foo",
            "user": "bob",
            "text": "hi",
            "timestamp": "2024-05-01T12:00:00.250Z"
        }))
        .unwrap();

        let message = document.into_message("7").unwrap();
        assert_eq!(message.channel, "foo");
        assert_eq!(message.id.as_deref(), Some("7"));
        assert_eq!(message.timestamp_millis() % 1000, 250);
    }

    #[test]
    fn empty_user_is_invalid() {
        let document = MessageDocument {
            channel: "foo".into(),
            user: String::new(),
            text: "hi".into(),
            timestamp: StoredTimestamp::Millis(1),
        };
        assert_eq!(document.into_message("1").unwrap_err(), "user is empty");
    }
}
