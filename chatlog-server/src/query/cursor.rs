use shared::models::ChatMessage;
use url::form_urlencoded;

use super::QueryError;

/// Query parameter carrying the cursor timestamp, epoch milliseconds.
pub const AFTER_TIMESTAMP: &str = "after_timestamp";
/// Query parameter carrying the cursor identifier.
pub const AFTER_ID: &str = "after_id";

/// Resume key of history pagination: the `(timestamp, id)` of the last
/// message already returned under `timestamp desc, id desc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor {
    timestamp_ms: i64,
    id: String,
}

impl Cursor {
    pub fn new(timestamp_ms: i64, id: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            id: id.into(),
        }
    }

    /// Cursor resuming after `message`; `None` while it has no store id.
    #[must_use]
    pub fn after(message: &ChatMessage) -> Option<Self> {
        message
            .id
            .as_ref()
            .map(|id| Self::new(message.timestamp_millis(), id.clone()))
    }

    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Reads the cursor from its two query values. Blank values count as
    /// absent; both must be present or both absent.
    ///
    /// # Errors
    /// Returns [`QueryError::InvalidNumber`] for a non-numeric timestamp and
    /// [`QueryError::IncompleteCursor`] when only one half is given.
    pub fn from_params(
        timestamp: Option<&str>,
        id: Option<&str>,
    ) -> Result<Option<Self>, QueryError> {
        let timestamp = timestamp.map(str::trim).filter(|value| !value.is_empty());
        let id = id.map(str::trim).filter(|value| !value.is_empty());

        match (timestamp, id) {
            (None, None) => Ok(None),
            (Some(timestamp), Some(id)) => {
                let timestamp_ms = timestamp.parse::<i64>().map_err(|_| {
                    QueryError::InvalidNumber {
                        param: AFTER_TIMESTAMP,
                        value: timestamp.to_string(),
                    }
                })?;
                Ok(Some(Self::new(timestamp_ms, id)))
            }
            _ => Err(QueryError::IncompleteCursor),
        }
    }

    /// Canonical URL of the page after this cursor.
    ///
    /// Every caller parameter is echoed in its original order; the cursor
    /// parameters are replaced in place, or appended when absent.
    #[must_use]
    pub fn next_page_url(&self, path: &str, params: &[(String, String)]) -> String {
        let timestamp = self.timestamp_ms.to_string();
        let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 2);
        let (mut wrote_timestamp, mut wrote_id) = (false, false);

        for (key, value) in params {
            match key.as_str() {
                AFTER_TIMESTAMP if !wrote_timestamp => {
                    pairs.push((AFTER_TIMESTAMP, timestamp.as_str()));
                    wrote_timestamp = true;
                }
                AFTER_ID if !wrote_id => {
                    pairs.push((AFTER_ID, self.id.as_str()));
                    wrote_id = true;
                }
                AFTER_TIMESTAMP | AFTER_ID => {}
                _ => pairs.push((key.as_str(), value.as_str())),
            }
        }
        if !wrote_timestamp {
            pairs.push((AFTER_TIMESTAMP, timestamp.as_str()));
        }
        if !wrote_id {
            pairs.push((AFTER_ID, self.id.as_str()));
        }

        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        format!("{path}?{query}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn next_page_appends_cursor_after_caller_params() {
        let url = Cursor::new(100, "2")
            .next_page_url("/api/messages", &params(&[("stream", "foo"), ("limit", "1")]));
        assert_eq!(
            url,
            "/api/messages?stream=foo&limit=1&after_timestamp=100&after_id=2"
        );
    }

    #[test]
    fn next_page_replaces_existing_cursor_in_place() {
        let url = Cursor::new(50, "9").next_page_url(
            "/api/messages",
            &params(&[
                ("after_id", "2"),
                ("stream", "foo"),
                ("after_timestamp", "100"),
                ("after_id", "3"),
            ]),
        );
        assert_eq!(
            url,
            "/api/messages?after_id=9&stream=foo&after_timestamp=50"
        );
    }

    #[test]
    fn next_page_encodes_values() {
        let url = Cursor::new(1, "a b").next_page_url("/m", &params(&[("stream", "fo&o")]));
        assert_eq!(url, "/m?stream=fo%26o&after_timestamp=1&after_id=a+b");
    }

    #[test]
    fn cursor_params_are_both_or_neither() {
        assert_eq!(Cursor::from_params(None, Some("  ")).unwrap(), None);
        assert_eq!(
            Cursor::from_params(Some("100"), Some("2")).unwrap(),
            Some(Cursor::new(100, "2"))
        );
        assert!(matches!(
            Cursor::from_params(Some("100"), None),
            Err(QueryError::IncompleteCursor)
        ));
        assert!(matches!(
            Cursor::from_params(Some("yesterday"), Some("2")),
            Err(QueryError::InvalidNumber { param: "after_timestamp", .. })
        ));
    }

    #[test]
    fn cursor_requires_a_persisted_message() {
        let message = ChatMessage::new(
            "foo",
            "bob",
            "hi",
            shared::models::timestamp::from_millis(100).unwrap(),
        );
        assert_eq!(Cursor::after(&message), None);
        assert_eq!(
            Cursor::after(&message.with_id("2")),
            Some(Cursor::new(100, "2"))
        );
    }
}
