//! # Configuration
//!
//! Settings for the HTTP read API, the ingestion pipeline, the chat
//! transport and the search store. Values resolve in layers: built-in
//! defaults, then an optional YAML/JSON/TOML file, then `CHATLOG_*`
//! environment variables, then command-line overrides.

pub mod ingest;
pub mod server;


pub use ingest::{DiscoveryConfig, IngestConfig, RetryConfig, TransportConfig};
pub use server::{
    Config, ConfigError, LogFormat, LoggingConfig, ServerConfig, StoreBackend, StoreConfig,
};
