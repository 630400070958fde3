//! Millisecond-precision UTC timestamps.
//!
//! Chat messages are stored and paged with millisecond resolution, so every
//! instant that enters the system is truncated once, here.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Truncates an instant to whole milliseconds.
#[must_use]
pub fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(instant.timestamp_millis()).unwrap_or(instant)
}

/// Builds an instant from Unix epoch milliseconds.
#[must_use]
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Serde adapter writing RFC 3339 with exactly three fractional digits.
pub mod rfc3339_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::{SecondsFormat, truncate_to_millis};

    /// Serializes `instant` as e.g. `2024-05-01T12:00:00.250Z`.
    ///
    /// # Errors
    /// Propagates serializer failures.
    pub fn serialize<S>(instant: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&instant.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// Parses any RFC 3339 instant and truncates it to milliseconds.
    ///
    /// # Errors
    /// Fails when the value is not a valid RFC 3339 string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| truncate_to_millis(parsed.with_timezone(&Utc)))
            .map_err(D::Error::custom)
    }
}
