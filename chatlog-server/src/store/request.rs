use std::{fmt, str::FromStr, time::Duration};

use crate::query::Cursor;

/// Fields a query may sort on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    Timestamp,
    /// Store-assigned document identifier.
    Id,
    /// Relevance; constant for filter-only queries.
    Score,
    Channel,
    User,
}

impl SortField {
    /// Name of the field in the store's query language.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::Id => "_id",
            Self::Score => "_score",
            Self::Channel => "channel",
            Self::User => "user",
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "timestamp" => Ok(Self::Timestamp),
            "_id" | "id" => Ok(Self::Id),
            "_score" | "score" => Ok(Self::Score),
            "channel" => Ok(Self::Channel),
            "user" => Ok(Self::User),
            other => Err(format!("unknown sort field '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// One `(field, direction)` sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortSpec {
    pub field: SortField,
    pub order: SortOrder,
}

impl SortSpec {
    #[must_use]
    pub const fn asc(field: SortField) -> Self {
        Self {
            field,
            order: SortOrder::Asc,
        }
    }

    #[must_use]
    pub const fn desc(field: SortField) -> Self {
        Self {
            field,
            order: SortOrder::Desc,
        }
    }
}

/// Parses the compact form: `"timestamp"` sorts ascending, `"-timestamp"`
/// descending.
impl FromStr for SortSpec {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        match value.strip_prefix('-') {
            Some(field) => Ok(Self::desc(field.parse()?)),
            None => Ok(Self::asc(value.parse()?)),
        }
    }
}

/// Keyword fields that can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationField {
    Channel,
    User,
}

impl AggregationField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::User => "user",
        }
    }
}

/// Distinct values of `field` with per-value document counts, largest
/// first, at most `size` buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermsAggregation {
    pub field: AggregationField,
    pub size: usize,
}

/// A fully specified, already validated store query.
///
/// Built by [`crate::query::Finder`]; stores execute it as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Exact match on the bare channel name.
    pub channel: Option<String>,
    pub sort: Vec<SortSpec>,
    pub from: usize,
    pub size: usize,
    /// Return only hits strictly after this key under `sort`, which then
    /// starts with `timestamp desc, _id desc`.
    pub search_after: Option<Cursor>,
    pub aggregation: Option<TermsAggregation>,
    /// Upper bound the store should apply server-side.
    pub timeout: Option<Duration>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            channel: None,
            sort: vec![SortSpec::desc(SortField::Score)],
            from: 0,
            size: 0,
            search_after: None,
            aggregation: None,
            timeout: None,
        }
    }
}
