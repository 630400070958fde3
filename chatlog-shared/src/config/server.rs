use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use super::ingest::{IngestConfig, TransportConfig};

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    #[error("unsupported configuration format for {}; use yaml, json or toml", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("invalid {key} value '{value}': {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Output format of the tracing subscriber.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Which [`StoreConfig`] implementation backs reads and writes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Elastic,
    /// Process-local store; history is lost on exit.
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "elastic" | "elasticsearch" => Ok(Self::Elastic),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Header used to propagate request ids.
    pub request_id_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_id_header: "x-request-id".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Search store connection settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub username: String,
    pub password: String,
    /// Index holding chat messages.
    pub index: String,
    /// Upper bound for a single read query.
    pub query_timeout_ms: u64,
    /// Upper bound for any other store request, bulk writes included.
    pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Elastic,
            url: "http://127.0.0.1:9200".to_string(),
            username: String::new(),
            password: String::new(),
            index: "twitch".to_string(),
            query_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Basic-auth credentials, when a username is configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        (!self.username.is_empty()).then_some((self.username.as_str(), self.password.as_str()))
    }
}

/// The main configuration structure for chatlog.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub transport: TransportConfig,
}

impl Config {
    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a `.yaml`, `.yml`, `.json` or `.toml` file.
    /// * `port_override` - Optional port number taking precedence over every other source.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when the file cannot be read or parsed, an
    /// environment variable is malformed, or the result fails validation.
    pub fn load_config(
        config_path: Option<&Path>,
        port_override: Option<u16>,
    ) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides_from(|key| env::var(key).ok())?;

        if let Some(port) = port_override {
            config.server.port = port;
        }

        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Parses a configuration file; missing keys fall back to defaults.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when the file cannot be read, has an
    /// unknown extension, or does not parse.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => {
                serde_yml::from_str(&content).map_err(|err| parse_error(err.to_string()))
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|err| parse_error(err.to_string()))
            }
            Some("toml") => toml::from_str(&content).map_err(|err| parse_error(err.to_string())),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Applies `CHATLOG_*` overrides using `lookup` to read variables.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidEnv`] for values that do not parse.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(host) = text("CHATLOG_HOST") {
            self.server.host = host;
        }
        if let Some(port) = text("CHATLOG_PORT") {
            self.server.port = parse_env("CHATLOG_PORT", &port)?;
        }
        if let Some(level) = text("CHATLOG_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = text("CHATLOG_LOG_FORMAT") {
            self.logging.format = parse_env("CHATLOG_LOG_FORMAT", &format)?;
        }
        if let Some(backend) = text("CHATLOG_STORE_BACKEND") {
            self.store.backend = parse_env("CHATLOG_STORE_BACKEND", &backend)?;
        }
        if let Some(url) = text("CHATLOG_STORE_URL") {
            self.store.url = url;
        }
        if let Some(username) = text("CHATLOG_STORE_USER") {
            self.store.username = username;
        }
        if let Some(password) = text("CHATLOG_STORE_PASS") {
            self.store.password = password;
        }
        if let Some(index) = text("CHATLOG_STORE_INDEX") {
            self.store.index = index;
        }
        if let Some(timeout) = text("CHATLOG_QUERY_TIMEOUT_MS") {
            self.store.query_timeout_ms = parse_env("CHATLOG_QUERY_TIMEOUT_MS", &timeout)?;
        }
        if let Some(interval) = text("CHATLOG_FLUSH_INTERVAL_MS") {
            self.ingest.flush_interval_ms = parse_env("CHATLOG_FLUSH_INTERVAL_MS", &interval)?;
        }
        if let Some(address) = text("CHATLOG_IRC_ADDRESS") {
            self.transport.address = address;
        }
        if let Some(nick) = text("CHATLOG_IRC_NICK") {
            self.transport.nick = nick;
        }
        if let Some(password) = text("CHATLOG_IRC_PASS") {
            self.transport.password = password;
        }
        if let Some(channels) = text("CHATLOG_CHANNELS") {
            self.transport.channels = channels
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(enabled) = text("CHATLOG_DISCOVER_CHANNELS") {
            self.transport.discovery.enabled = parse_env("CHATLOG_DISCOVER_CHANNELS", &enabled)?;
        }
        if let Some(client_id) = text("CHATLOG_TWITCH_CLIENT_ID") {
            self.transport.discovery.client_id = client_id;
        }
        if let Some(token) = text("CHATLOG_TWITCH_TOKEN") {
            self.transport.discovery.token = token;
        }

        Ok(())
    }

    /// Validates the complete configuration.
    ///
    /// # Errors
    /// Returns every problem found rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Invalid server port. Must be greater than 0.".to_string());
        }
        if self.logging.level.parse::<LevelFilter>().is_err() {
            errors.push(format!("unknown log level '{}'", self.logging.level));
        }
        if self.store.backend == StoreBackend::Elastic {
            if let Err(err) = Url::parse(&self.store.url) {
                errors.push(format!("store.url '{}' is not a URL: {err}", self.store.url));
            }
            if self.store.index.trim().is_empty() {
                errors.push("store.index must not be empty".to_string());
            }
        }
        if self.store.query_timeout_ms == 0 {
            errors.push("store.query_timeout_ms must be greater than 0".to_string());
        }
        if self.store.request_timeout_ms == 0 {
            errors.push("store.request_timeout_ms must be greater than 0".to_string());
        }
        self.ingest.validate(&mut errors);

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// `host:port` the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_env<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidEnv {
            key,
            value: value.to_string(),
            reason: err.to_string(),
        })
}
