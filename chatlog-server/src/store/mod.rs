//! Search store collaborator.
//!
//! [`MessageStore`] is the only seam between chatlog and the backend that
//! indexes messages. The bulk writer and the finder share one handle,
//! constructed once at startup by [`open`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use shared::config::{StoreBackend, StoreConfig};
use thiserror::Error;
use tracing::info;

pub mod document;
pub mod elastic;
pub mod memory;
pub mod request;
pub mod response;

pub use document::{MessageDocument, StoredTimestamp};
pub use elastic::ElasticStore;
pub use memory::MemoryStore;
pub use request::{
    AggregationField, SearchRequest, SortField, SortOrder, SortSpec, TermsAggregation,
};
pub use response::{BulkFailure, BulkResponse, RawBucket, RawHit, SearchResponse};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected store response: {0}")]
    Response(String),
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("store rejected the request: {0}")]
    InvalidRequest(String),
}

/// Write, query and liveness operations of the search store.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Indexes every document in one request. Per-document rejections are
    /// reported in the response, not as an error.
    async fn bulk_index(&self, documents: &[MessageDocument])
    -> Result<BulkResponse, StoreError>;

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Creates the message index and its mapping when absent. Never drops
    /// existing data.
    async fn ensure_index(&self) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn MessageStore>;

/// Builds the configured backend, checks it is reachable and provisions the
/// index.
///
/// # Errors
/// Returns the first failing step; callers treat this as fatal.
pub async fn open(config: &StoreConfig) -> Result<SharedStore, StoreError> {
    let store: SharedStore = match config.backend {
        StoreBackend::Elastic => Arc::new(ElasticStore::new(config)?),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };

    store.ping().await?;
    store.ensure_index().await?;
    info!(backend = ?config.backend, index = %config.index, "store ready");

    Ok(store)
}
