use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::models::bare_channel;

/// Settings for the buffer/flush coordinator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    /// Interval between timer-driven flushes, in milliseconds.
    pub flush_interval_ms: u64,

    /// Capacity of the event channel between the transport and the
    /// coordinator. The producer waits when it is full.
    pub channel_capacity: usize,

    /// Flush early once the pending batch reaches this many messages.
    /// `None` leaves batches unbounded between timer ticks.
    pub max_batch_size: Option<usize>,

    /// Retry policy for failed bulk writes.
    pub retry: RetryConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1_000,
            channel_capacity: 65_536,
            max_batch_size: None,
            retry: RetryConfig::default(),
        }
    }
}

impl IngestConfig {
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        if self.flush_interval_ms == 0 {
            errors.push("ingest.flush_interval_ms must be greater than 0".to_string());
        }
        if self.channel_capacity == 0 {
            errors.push("ingest.channel_capacity must be greater than 0".to_string());
        }
        if self.max_batch_size == Some(0) {
            errors.push("ingest.max_batch_size must be greater than 0 when set".to_string());
        }
        self.retry.validate(errors);
    }
}

/// Bounded exponential backoff for bulk writes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per batch, including the first one.
    pub max_attempts: usize,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if self.max_attempts == 0 {
            errors.push("ingest.retry.max_attempts must be at least 1".to_string());
        }
        if self.min_backoff_ms > self.max_backoff_ms {
            errors.push(
                "ingest.retry.min_backoff_ms must not exceed ingest.retry.max_backoff_ms"
                    .to_string(),
            );
        }
    }
}

/// Chat network connection settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    /// `host:port` of the IRC endpoint.
    pub address: String,
    pub nick: String,
    /// Sent as `PASS`; Twitch expects `oauth:<token>`.
    pub password: String,
    /// Channels to join, with or without the `#` prefix.
    pub channels: Vec<String>,
    /// Number of JOINs sent before pausing.
    pub join_batch_size: usize,
    /// Pause after each JOIN batch, in milliseconds.
    pub join_pause_ms: u64,
    pub discovery: DiscoveryConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: "irc.chat.twitch.tv:6667".to_string(),
            nick: String::new(),
            password: String::new(),
            channels: Vec::new(),
            join_batch_size: 50,
            join_pause_ms: 15_000,
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn join_pause(&self) -> Duration {
        Duration::from_millis(self.join_pause_ms)
    }

    /// Configured channels, lowercased, without `#`, blanks and duplicates
    /// removed, first occurrence order preserved.
    #[must_use]
    pub fn normalized_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = Vec::with_capacity(self.channels.len());
        for raw in &self.channels {
            let name = bare_channel(raw.trim()).to_lowercase();
            if !name.is_empty() && !channels.contains(&name) {
                channels.push(name);
            }
        }
        channels
    }

    /// Checks that the settings are usable for a live connection.
    ///
    /// # Errors
    /// Returns every problem found.
    pub fn validate_for_connect(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.address.trim().is_empty() {
            errors.push("transport.address must be set".to_string());
        }
        if self.nick.trim().is_empty() {
            errors.push("transport.nick must be set (CHATLOG_IRC_NICK)".to_string());
        }
        if self.join_batch_size == 0 {
            errors.push("transport.join_batch_size must be greater than 0".to_string());
        }
        if !self.discovery.enabled && self.normalized_channels().is_empty() {
            errors.push("transport.channels must name at least one channel".to_string());
        }
        self.discovery.validate(&mut errors);

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Finding live channels to join through the Twitch Helix streams API.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Also join the most-viewed live channels, after `channels`.
    pub enabled: bool,
    pub api_url: String,
    /// Sent as `Client-Id`.
    pub client_id: String,
    /// App access token, sent as `Authorization: Bearer`.
    pub token: String,
    pub max_channels: usize,
    pub request_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "https://api.twitch.tv/helix/streams".to_string(),
            client_id: String::new(),
            token: String::new(),
            max_channels: 1_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if !self.enabled {
            return;
        }
        if let Err(err) = Url::parse(&self.api_url) {
            errors.push(format!(
                "transport.discovery.api_url '{}' is not a URL: {err}",
                self.api_url
            ));
        }
        if self.client_id.trim().is_empty() {
            errors.push(
                "transport.discovery.client_id must be set (CHATLOG_TWITCH_CLIENT_ID)".to_string(),
            );
        }
        if self.token.trim().is_empty() {
            errors.push("transport.discovery.token must be set (CHATLOG_TWITCH_TOKEN)".to_string());
        }
        if self.max_channels == 0 {
            errors.push("transport.discovery.max_channels must be greater than 0".to_string());
        }
        if self.request_timeout_ms == 0 {
            errors.push("transport.discovery.request_timeout_ms must be greater than 0".to_string());
        }
    }
}
