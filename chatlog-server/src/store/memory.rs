//! Process-local [`MessageStore`] with the same query semantics as the
//! Elasticsearch backend.
//!
//! Identifiers are sequential decimal strings starting at `1` and order
//! numerically.

use std::{cmp::Ordering, collections::HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::trace;

use super::{
    AggregationField, BulkFailure, BulkResponse, MessageDocument, MessageStore, RawBucket, RawHit,
    SearchRequest, SearchResponse, SortField, SortOrder, SortSpec, StoreError, TermsAggregation,
};
use crate::query::Cursor;

#[derive(Debug, Clone)]
struct StoredDocument {
    id: u64,
    id_text: String,
    timestamp_ms: i64,
    document: MessageDocument,
}

#[derive(Debug, Default)]
struct MemoryIndex {
    last_id: u64,
    documents: Vec<StoredDocument>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    index: RwLock<MemoryIndex>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed documents.
    pub async fn len(&self) -> usize {
        self.index.read().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Orders identifiers the way sequential decimal ids sort numerically.
fn compare_ids(left: &str, right: &str) -> Ordering {
    left.len().cmp(&right.len()).then_with(|| left.cmp(right))
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn compare_documents(left: &StoredDocument, right: &StoredDocument, sort: &[SortSpec]) -> Ordering {
    sort.iter()
        .map(|spec| {
            let ordering = match spec.field {
                SortField::Timestamp => left.timestamp_ms.cmp(&right.timestamp_ms),
                SortField::Id => left.id.cmp(&right.id),
                SortField::Score => Ordering::Equal,
                SortField::Channel => left.document.channel.cmp(&right.document.channel),
                SortField::User => left.document.user.cmp(&right.document.user),
            };
            directed(ordering, spec.order)
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Whether `document` sorts strictly after `cursor` under `sort`.
fn is_after(document: &StoredDocument, cursor: &Cursor, sort: &[SortSpec]) -> bool {
    let ordering = sort
        .iter()
        .map(|spec| {
            let ordering = match spec.field {
                SortField::Timestamp => document.timestamp_ms.cmp(&cursor.timestamp_ms()),
                SortField::Id => compare_ids(&document.id_text, cursor.id()),
                _ => Ordering::Equal,
            };
            directed(ordering, spec.order)
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal);

    ordering == Ordering::Greater
}

fn validate(request: &SearchRequest) -> Result<(), StoreError> {
    if request.search_after.is_none() {
        return Ok(());
    }
    if request.sort.is_empty() {
        return Err(StoreError::InvalidRequest(
            "search_after requires an explicit sort".to_string(),
        ));
    }
    if let Some(spec) = request
        .sort
        .iter()
        .find(|spec| matches!(spec.field, SortField::Channel | SortField::User))
    {
        return Err(StoreError::InvalidRequest(format!(
            "search_after cannot resume on sort field {}",
            spec.field
        )));
    }
    Ok(())
}

fn aggregate(documents: &[&StoredDocument], aggregation: TermsAggregation) -> Vec<RawBucket> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for stored in documents {
        let key = match aggregation.field {
            AggregationField::Channel => stored.document.channel.as_str(),
            AggregationField::User => stored.document.user.as_str(),
        };
        *counts.entry(key).or_default() += 1;
    }

    let mut buckets: Vec<(&str, u64)> = counts.into_iter().collect();
    buckets.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(right.0)));
    buckets.truncate(aggregation.size);

    buckets
        .into_iter()
        .map(|(key, doc_count)| RawBucket {
            key: Value::String(key.to_string()),
            doc_count,
        })
        .collect()
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn bulk_index(
        &self,
        documents: &[MessageDocument],
    ) -> Result<BulkResponse, StoreError> {
        let mut index = self.index.write().await;
        let mut failures = Vec::new();

        for (position, document) in documents.iter().enumerate() {
            let Some(timestamp_ms) = document.timestamp.millis() else {
                failures.push(BulkFailure {
                    position,
                    status: 400,
                    reason: "failed to parse field [timestamp]".to_string(),
                });
                continue;
            };

            index.last_id += 1;
            let id = index.last_id;
            index.documents.push(StoredDocument {
                id,
                id_text: id.to_string(),
                timestamp_ms,
                document: document.clone(),
            });
        }

        trace!(
            actions = documents.len(),
            failed = failures.len(),
            "memory bulk index"
        );
        Ok(BulkResponse {
            actions: documents.len(),
            failures,
        })
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError> {
        validate(request)?;
        let index = self.index.read().await;

        let mut matching: Vec<&StoredDocument> = index
            .documents
            .iter()
            .filter(|stored| {
                request
                    .channel
                    .as_deref()
                    .is_none_or(|channel| stored.document.channel == channel)
            })
            .collect();

        let total = matching.len() as u64;
        let buckets = request
            .aggregation
            .map(|aggregation| aggregate(&matching, aggregation));

        matching.sort_by(|left, right| compare_documents(left, right, &request.sort));
        if let Some(cursor) = &request.search_after {
            matching.retain(|stored| is_after(stored, cursor, &request.sort));
        }

        let hits = matching
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .map(|stored| {
                serde_json::to_value(&stored.document)
                    .map(|source| RawHit {
                        id: stored.id_text.clone(),
                        source,
                    })
                    .map_err(|err| StoreError::Response(err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SearchResponse {
            total,
            hits,
            buckets,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_index(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
