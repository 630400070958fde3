//! Live channel discovery through the Twitch Helix streams API.

use std::collections::HashSet;

use reqwest::Client;
use serde::Deserialize;
use shared::{config::DiscoveryConfig, models::bare_channel};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Largest `first` the streams endpoint accepts.
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("streams request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("streams API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Deserialize)]
struct StreamsPage {
    #[serde(default)]
    data: Vec<LiveStream>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct LiveStream {
    user_login: String,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StreamDirectory {
    client: Client,
    config: DiscoveryConfig,
}

impl StreamDirectory {
    /// # Errors
    /// Returns [`DiscoveryError::Http`] when the HTTP client cannot be built.
    pub fn new(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Logins of the most-viewed live channels, at most `max_channels`, in
    /// the order the API ranks them. Pages may overlap while streams move
    /// in the ranking, so the result can contain duplicates.
    ///
    /// # Errors
    /// Transport failures and non-success statuses.
    #[instrument(skip_all, fields(limit = self.config.max_channels))]
    pub async fn top_channels(&self) -> Result<Vec<String>, DiscoveryError> {
        let limit = self.config.max_channels;
        let mut channels = Vec::with_capacity(limit);
        let mut cursor: Option<String> = None;

        while channels.len() < limit {
            let wanted = (limit - channels.len()).min(MAX_PAGE_SIZE);
            let mut request = self
                .client
                .get(&self.config.api_url)
                .header("Client-Id", &self.config.client_id)
                .bearer_auth(&self.config.token)
                .query(&[("first", wanted.to_string())]);
            if let Some(after) = &cursor {
                request = request.query(&[("after", after)]);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(DiscoveryError::Status {
                    status: status.as_u16(),
                    body: response.text().await.unwrap_or_default(),
                });
            }

            let page: StreamsPage = response.json().await?;
            let fetched = page.data.len();
            channels.extend(page.data.into_iter().take(wanted).map(|stream| stream.user_login));
            debug!(fetched, total = channels.len(), "streams page");

            match page.pagination.cursor {
                Some(next) if fetched > 0 && !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        info!(discovered = channels.len(), "discovered live channels");
        Ok(channels)
    }
}

/// Configured channels first, then discovered ones. Names are lowercased
/// without `#`; blanks and repeats are dropped.
#[must_use]
pub fn merge_channels(
    configured: &[String],
    discovered: impl IntoIterator<Item = String>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    configured
        .iter()
        .cloned()
        .chain(discovered)
        .map(|raw| bare_channel(raw.trim()).to_lowercase())
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect()
}
