use serde_json::Value;

/// One search hit as returned by the store, not yet decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub id: String,
    pub source: Value,
}

/// One terms-aggregation bucket, not yet decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBucket {
    pub key: Value,
    pub doc_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    /// Documents matching the filter, regardless of paging.
    pub total: u64,
    pub hits: Vec<RawHit>,
    /// Present when the request carried an aggregation.
    pub buckets: Option<Vec<RawBucket>>,
}

/// A document the store refused inside an otherwise accepted bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    /// Position of the document in the submitted batch.
    pub position: usize,
    /// Per-item HTTP status, `0` when the store sent none.
    pub status: u16,
    pub reason: String,
}

impl BulkFailure {
    /// Whether sending the same document again may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.status == 429 || self.status >= 500
    }
}

/// Outcome of one bulk write call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    /// Number of actions the store processed.
    pub actions: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkResponse {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.actions.saturating_sub(self.failures.len())
    }
}
