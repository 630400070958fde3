use std::sync::Arc;

use shared::models::ChatMessage;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::store::{BulkFailure, MessageDocument, MessageStore, StoreError};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("bulk request failed: {0}")]
    Store(#[from] StoreError),
    /// The store accepted the request but refused some documents. Every
    /// other document of the batch is persisted.
    #[error("store rejected {} of {total} documents, first: {first_reason}", .rejected.len())]
    Partial {
        /// Batch positions of the refused documents, ascending.
        rejected: Vec<usize>,
        total: usize,
        first_reason: String,
        /// At least one refusal may succeed when sent again.
        transient: bool,
    },
    /// The store answered for fewer documents than were sent.
    #[error("store acknowledged {acknowledged} of {total} documents")]
    Incomplete { acknowledged: usize, total: usize },
}

impl WriteError {
    /// Messages of the failed batch that are known to be stored.
    #[must_use]
    pub fn persisted(&self) -> usize {
        match self {
            Self::Store(_) => 0,
            Self::Partial {
                rejected, total, ..
            } => total - rejected.len(),
            Self::Incomplete { acknowledged, .. } => *acknowledged,
        }
    }

    /// Whether the unpersisted part of the batch is worth sending again.
    /// An incomplete acknowledgement is final: resending could store
    /// duplicates.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(_) => true,
            Self::Partial { transient, .. } => *transient,
            Self::Incomplete { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub written: usize,
}

/// Serializes batches to documents and submits each in one bulk request.
#[derive(Debug, Clone)]
pub struct BulkWriter {
    store: Arc<dyn MessageStore>,
}

impl BulkWriter {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Writes `batch` as a single bulk request. The batch is only borrowed
    /// for the duration of the call.
    ///
    /// # Errors
    /// Any rejected document fails the call. [`WriteError::Partial`] names
    /// the rejected positions; the rest of the batch is already stored.
    #[instrument(skip_all, fields(batch = batch.len()))]
    pub async fn write(&self, batch: &[ChatMessage]) -> Result<WriteReport, WriteError> {
        if batch.is_empty() {
            return Ok(WriteReport { written: 0 });
        }

        let documents: Vec<MessageDocument> = batch.iter().map(MessageDocument::from).collect();
        let response = self.store.bulk_index(&documents).await?;

        if let Some(first) = response.failures.first() {
            let mut rejected: Vec<usize> = response
                .failures
                .iter()
                .map(|failure| failure.position)
                .filter(|position| *position < batch.len())
                .collect();
            rejected.sort_unstable();
            rejected.dedup();
            return Err(WriteError::Partial {
                rejected,
                total: batch.len(),
                first_reason: first.reason.clone(),
                transient: response.failures.iter().any(BulkFailure::is_transient),
            });
        }
        if response.actions != batch.len() {
            return Err(WriteError::Incomplete {
                acknowledged: response.actions,
                total: batch.len(),
            });
        }

        debug!(written = response.actions, "batch written");
        Ok(WriteReport {
            written: response.actions,
        })
    }
}
