//! Maps raw store results into domain values.

use serde_json::Value;
use shared::models::{ActivitySummary, ChatMessage, bare_channel};
use thiserror::Error;

use crate::store::{AggregationField, MessageDocument, RawBucket, RawHit};

/// A stored record that could not be mapped. `index` is the record's
/// position in the store response.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed message at record {index} (id {id}): {reason}")]
    Message {
        index: usize,
        id: String,
        reason: String,
    },
    #[error("malformed aggregation bucket at record {index}: {reason}")]
    Bucket { index: usize, reason: String },
}

impl DecodeError {
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Message { index, .. } | Self::Bucket { index, .. } => *index,
        }
    }
}

/// Decodes hits in order, failing on the first malformed document.
///
/// # Errors
/// Returns [`DecodeError::Message`] naming the offending record.
pub fn decode_hits(hits: Vec<RawHit>) -> Result<Vec<ChatMessage>, DecodeError> {
    hits.into_iter()
        .enumerate()
        .map(|(index, hit)| {
            let RawHit { id, source } = hit;
            serde_json::from_value::<MessageDocument>(source)
                .map_err(|err| err.to_string())
                .and_then(|document| document.into_message(id.clone()))
                .map_err(|reason| DecodeError::Message { index, id, reason })
        })
        .collect()
}

/// Decodes terms buckets into summaries, stripping the `#` decoration from
/// channel keys.
///
/// # Errors
/// Returns [`DecodeError::Bucket`] for a non-string key.
pub fn decode_buckets(
    field: AggregationField,
    buckets: Vec<RawBucket>,
) -> Result<Vec<ActivitySummary>, DecodeError> {
    buckets
        .into_iter()
        .enumerate()
        .map(|(index, bucket)| match bucket.key {
            Value::String(key) => {
                let name = match field {
                    AggregationField::Channel => bare_channel(&key).to_string(),
                    AggregationField::User => key,
                };
                Ok(ActivitySummary::new(name, bucket.doc_count))
            }
            other => Err(DecodeError::Bucket {
                index,
                reason: format!("expected a string key, got {other}"),
            }),
        })
        .collect()
}
