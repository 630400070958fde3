//! Read side: the [`Finder`] query builder, the history [`Cursor`] and the
//! result decoder.
//!
//! Every query is independent. It carries its own timeout and shares
//! nothing with other queries or with ingestion beyond the store handle.

use std::time::Duration;

use shared::models::{ActivitySummary, ChatMessage, DEFAULT_LIMIT, MAX_LIMIT, bare_channel};
use thiserror::Error;
use tracing::debug;

use crate::store::{
    AggregationField, MessageStore, SearchRequest, SortField, SortSpec, StoreError,
    TermsAggregation,
};

pub mod cursor;
pub mod decode;
pub mod params;

pub use cursor::Cursor;
pub use decode::DecodeError;

/// Applied when a caller does not set one.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// The sort required by cursor pagination: `timestamp` alone is not unique,
/// the document id breaks ties.
pub const HISTORY_SORT: [SortSpec; 2] = [
    SortSpec::desc(SortField::Timestamp),
    SortSpec::desc(SortField::Id),
];

/// Caller input the finder refuses to run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("limit cannot exceed {max}")]
    LimitTooLarge { max: usize },
    #[error("limit must be at least 1")]
    LimitTooSmall,
    #[error("{param} must be an integer, got '{value}'")]
    InvalidNumber { param: &'static str, value: String },
    #[error("after_timestamp and after_id must be given together")]
    IncompleteCursor,
    #[error("cursor pagination requires sorting by timestamp desc, _id desc")]
    CursorWithoutCompoundSort,
    #[error("cursor pagination cannot start from an offset")]
    OffsetWithCursor,
    #[error("{0}")]
    InvalidSort(String),
}

#[derive(Debug, Error)]
pub enum FinderError {
    #[error(transparent)]
    Invalid(#[from] QueryError),
    #[error("query failed: {0}")]
    Query(#[from] StoreError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Decoded result of [`Finder::find`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinderResponse {
    pub total: u64,
    pub messages: Vec<ChatMessage>,
    pub buckets: Vec<ActivitySummary>,
    /// Resume key for the following page. Only set in cursor mode, and only
    /// when the store holds more matching messages.
    pub next: Option<Cursor>,
}

/// Builds and runs one store query.
///
/// ```ignore
/// let page = Finder::history()
///     .channel(Some("foo"))
///     .size(50)
///     .after(cursor)
///     .find(store.as_ref())
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct Finder {
    channel: Option<String>,
    sort: Vec<SortSpec>,
    from: usize,
    size: Option<usize>,
    cursor_mode: bool,
    after: Option<Cursor>,
    aggregation: Option<TermsAggregation>,
    timeout: Duration,
}

impl Default for Finder {
    fn default() -> Self {
        Self {
            channel: None,
            sort: Vec::new(),
            from: 0,
            size: None,
            cursor_mode: false,
            after: None,
            aggregation: None,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl Finder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A cursor-paginated query over message history, newest first.
    #[must_use]
    pub fn history() -> Self {
        Self {
            sort: HISTORY_SORT.to_vec(),
            cursor_mode: true,
            ..Self::default()
        }
    }

    /// Restricts results to one channel; `None` or blank matches all.
    #[must_use]
    pub fn channel(mut self, channel: Option<&str>) -> Self {
        self.channel = channel
            .map(|name| bare_channel(name.trim()).to_string())
            .filter(|name| !name.is_empty());
        self
    }

    #[must_use]
    pub fn sort(mut self, spec: SortSpec) -> Self {
        self.sort.push(spec);
        self
    }

    /// Appends sort keys in compact form, `"field"` or `"-field"`.
    ///
    /// # Errors
    /// Returns [`QueryError::InvalidSort`] for unknown fields.
    pub fn sort_by(mut self, keys: &[&str]) -> Result<Self, QueryError> {
        for key in keys {
            let spec = key.parse::<SortSpec>().map_err(QueryError::InvalidSort)?;
            self.sort.push(spec);
        }
        Ok(self)
    }

    #[must_use]
    pub fn from(mut self, from: usize) -> Self {
        self.from = from;
        self
    }

    #[must_use]
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Switches to cursor pagination, resuming strictly after `cursor`
    /// (`None` starts from the newest message).
    #[must_use]
    pub fn after(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor_mode = true;
        self.after = cursor;
        self
    }

    /// Requests the `limit` most frequent values of `field`.
    #[must_use]
    pub fn aggregate(mut self, field: AggregationField, limit: usize) -> Self {
        self.aggregation = Some(TermsAggregation { field, size: limit });
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn page_size(&self) -> usize {
        self.size.unwrap_or(if self.aggregation.is_some() {
            0
        } else {
            DEFAULT_LIMIT
        })
    }

    /// Validates the parameters and produces the store request.
    ///
    /// In cursor mode one extra hit is requested; it only reveals whether a
    /// further page exists and is never returned.
    ///
    /// # Errors
    /// Returns the first [`QueryError`] found.
    pub fn build(&self) -> Result<SearchRequest, QueryError> {
        let size = self.page_size();
        if size > MAX_LIMIT {
            return Err(QueryError::LimitTooLarge { max: MAX_LIMIT });
        }

        if let Some(aggregation) = self.aggregation {
            if aggregation.size > MAX_LIMIT {
                return Err(QueryError::LimitTooLarge { max: MAX_LIMIT });
            }
            if aggregation.size == 0 {
                return Err(QueryError::LimitTooSmall);
            }
        }

        let sort = if self.sort.is_empty() {
            vec![SortSpec::desc(SortField::Score)]
        } else {
            self.sort.clone()
        };

        if self.cursor_mode {
            if sort.as_slice() != HISTORY_SORT.as_slice() {
                return Err(QueryError::CursorWithoutCompoundSort);
            }
            if self.from > 0 {
                return Err(QueryError::OffsetWithCursor);
            }
        }

        Ok(SearchRequest {
            channel: self.channel.clone(),
            sort,
            from: self.from,
            size: if self.cursor_mode { size + 1 } else { size },
            search_after: self.after.clone(),
            aggregation: self.aggregation,
            timeout: Some(self.timeout),
        })
    }

    /// Runs the query against `store` within the configured timeout.
    ///
    /// # Errors
    /// [`FinderError::Invalid`] before any store access,
    /// [`FinderError::Query`] for store failures and timeouts,
    /// [`FinderError::Decode`] for malformed stored records.
    pub async fn find(&self, store: &dyn MessageStore) -> Result<FinderResponse, FinderError> {
        let request = self.build()?;
        let response = tokio::time::timeout(self.timeout, store.search(&request))
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))??;

        let page_size = self.page_size();
        let mut hits = response.hits;
        let has_more = self.cursor_mode && hits.len() > page_size;
        hits.truncate(page_size);

        let messages = decode::decode_hits(hits)?;
        let buckets = match (self.aggregation, response.buckets) {
            (Some(aggregation), Some(buckets)) => {
                decode::decode_buckets(aggregation.field, buckets)?
            }
            _ => Vec::new(),
        };

        let next = if has_more {
            messages.last().and_then(Cursor::after)
        } else {
            None
        };

        debug!(
            total = response.total,
            returned = messages.len(),
            buckets = buckets.len(),
            has_more,
            "query completed"
        );

        Ok(FinderResponse {
            total: response.total,
            messages,
            buckets,
            next,
        })
    }
}
