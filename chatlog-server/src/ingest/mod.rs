//! Write side: chat events are buffered by the [`Coordinator`] and flushed
//! in bulk through the [`BulkWriter`].

use anyhow::{Context, anyhow, bail};
use shared::config::{Config, TransportConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    store,
    transport::{IrcClient, StreamDirectory, event_channel, merge_channels},
};

pub mod coordinator;
pub mod writer;

pub use coordinator::{Coordinator, CoordinatorState, IngestError, IngestSummary};
pub use writer::{BulkWriter, WriteError, WriteReport};

/// Runs the ingestion pipeline until `shutdown` is cancelled or the
/// transport disconnects, then drains.
///
/// # Errors
/// Fails when channel discovery or the store is unavailable at startup, when
/// the drain cannot be persisted, or when the transport ended with an error.
pub async fn run(
    mut config: Config,
    shutdown: CancellationToken,
) -> anyhow::Result<IngestSummary> {
    config
        .transport
        .validate_for_connect()
        .map_err(|errors| anyhow!("invalid transport configuration: {}", errors.join("; ")))?;

    if config.transport.discovery.enabled {
        let channels = tokio::select! {
            () = shutdown.cancelled() => return Ok(IngestSummary::default()),
            discovered = discover_channels(&config.transport) => discovered?,
        };
        config.transport.channels = channels;
    }

    let store = store::open(&config.store)
        .await
        .context("message store is not available")?;

    let (events, receiver) = event_channel(config.ingest.channel_capacity);
    let coordinator = Coordinator::new(
        BulkWriter::new(store),
        config.ingest.clone(),
        receiver,
        shutdown.clone(),
    );
    let coordinator = tokio::spawn(coordinator.run());
    let transport = tokio::spawn(IrcClient::new(config.transport).run(events, shutdown.clone()));

    let drained = coordinator.await.context("coordinator task panicked")?;
    shutdown.cancel();
    let transport = transport.await.context("transport task panicked")?;

    let summary = drained?;
    info!(
        flushes = summary.flushes,
        persisted = summary.persisted,
        "ingestion stopped"
    );
    if let Err(err) = transport {
        warn!(error = %err, "transport ended with an error");
        return Err(err.into());
    }
    Ok(summary)
}

/// Configured channels merged with the live ones the streams API reports.
async fn discover_channels(transport: &TransportConfig) -> anyhow::Result<Vec<String>> {
    let discovered = StreamDirectory::new(&transport.discovery)?
        .top_channels()
        .await
        .context("channel discovery failed")?;

    let channels = merge_channels(&transport.channels, discovered);
    if channels.is_empty() {
        bail!("no channels to join: none configured and none live");
    }
    info!(channels = channels.len(), "channel list resolved");
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get};
    use serde_json::{Value, json};
    use shared::config::DiscoveryConfig;
    use tokio::net::TcpListener;

    async fn helix_with(page: Value) -> String {
        let app = Router::new().route("/streams", get(move || async move { Json(page) }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/streams")
    }

    fn transport(api_url: String, channels: &[&str]) -> TransportConfig {
        TransportConfig {
            nick: "logger".into(),
            channels: channels.iter().map(ToString::to_string).collect(),
            discovery: DiscoveryConfig {
                enabled: true,
                api_url,
                client_id: "client".into(),
                token: "token".into(),
                ..DiscoveryConfig::default()
            },
            ..TransportConfig::default()
        }
    }

    #[tokio::test]
    async fn discovered_channels_follow_the_configured_ones() {
        let url = helix_with(json!({
            "data": [ { "user_login": "alpha" }, { "user_login": "foo" } ]
        }))
        .await;

        let channels = discover_channels(&transport(url, &["#Foo"])).await.unwrap();

        assert_eq!(channels, vec!["foo", "alpha"]);
    }

    #[tokio::test]
    async fn nothing_to_join_fails_startup() {
        let url = helix_with(json!({ "data": [] })).await;

        let err = discover_channels(&transport(url, &[])).await.unwrap_err();

        assert!(err.to_string().contains("no channels to join"));
    }
}
