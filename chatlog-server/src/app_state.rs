use std::time::Duration;

use crate::{query::DEFAULT_QUERY_TIMEOUT, store::SharedStore};

/// Handles shared by every route. Built once at startup.
#[derive(Clone, Debug)]
pub struct AppState {
    pub(crate) store: SharedStore,
    pub(crate) query_timeout: Duration,
}

impl AppState {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}
