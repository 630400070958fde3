//! Typed read-API parameters parsed from the raw query string.
//!
//! Parsing happens before any store access; a rejected request never
//! reaches the store.

use shared::models::{DEFAULT_LIMIT, MAX_LIMIT};
use url::form_urlencoded;

use super::{
    QueryError,
    cursor::{AFTER_ID, AFTER_TIMESTAMP, Cursor},
};

pub const LIMIT: &str = "limit";
pub const STREAM: &str = "stream";

/// Decodes a raw query string into ordered key/value pairs.
#[must_use]
pub fn query_pairs(raw: Option<&str>) -> Vec<(String, String)> {
    raw.map(|query| {
        form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect()
    })
    .unwrap_or_default()
}

/// First value of `name`, if any.
#[must_use]
pub fn first_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Parses a page or aggregation size. Absent or blank means
/// [`DEFAULT_LIMIT`].
///
/// # Errors
/// Rejects non-integers, values below 1 and values above [`MAX_LIMIT`].
pub fn parse_limit(value: Option<&str>) -> Result<usize, QueryError> {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(DEFAULT_LIMIT);
    };

    let limit = value
        .parse::<i64>()
        .map_err(|_| QueryError::InvalidNumber {
            param: LIMIT,
            value: value.to_string(),
        })?;

    if limit < 1 {
        return Err(QueryError::LimitTooSmall);
    }
    usize::try_from(limit)
        .ok()
        .filter(|limit| *limit <= MAX_LIMIT)
        .ok_or(QueryError::LimitTooLarge { max: MAX_LIMIT })
}

/// Parameters of `GET /api/messages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryParams {
    /// Bare channel name; `None` spans every channel.
    pub stream: Option<String>,
    pub limit: usize,
    pub cursor: Option<Cursor>,
}

impl HistoryParams {
    /// # Errors
    /// Returns the first invalid parameter.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, QueryError> {
        let limit = parse_limit(first_value(pairs, LIMIT))?;
        let cursor = Cursor::from_params(
            first_value(pairs, AFTER_TIMESTAMP),
            first_value(pairs, AFTER_ID),
        )?;
        let stream = first_value(pairs, STREAM)
            .map(str::trim)
            .filter(|stream| !stream.is_empty())
            .map(str::to_string);

        Ok(Self {
            stream,
            limit,
            cursor,
        })
    }
}

/// Parameters of the aggregate listings, `GET /api/streams` and
/// `GET /api/users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingParams {
    pub limit: usize,
}

impl ListingParams {
    /// # Errors
    /// Returns [`QueryError`] for an invalid `limit`.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, QueryError> {
        Ok(Self {
            limit: parse_limit(first_value(pairs, LIMIT))?,
        })
    }
}
