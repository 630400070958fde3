use std::sync::{Arc, OnceLock};

use anyhow::Context;
use axum::{
    Extension, Router,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::{Config, LogFormat};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::AppState,
    middleware::request_context::{self, RequestIdState},
    routes::{self, openapi::openapi_routes},
    store, tracer,
};

/// Exit status after a second shutdown signal.
pub const FORCED_EXIT_CODE: i32 = 130;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide Prometheus handle. When a global recorder is already
/// installed the handle renders an empty, detached registry.
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|err| {
                    eprintln!("prometheus recorder not installed: {err}");
                    PrometheusBuilder::new().build_recorder().handle()
                })
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Installs the global subscriber: `RUST_LOG` wins over `logging.level`,
/// output is text or JSON per `logging.format`.
pub fn initialize_tracing(config: &Config) {
    let builder = fmt::fmt()
        .with_env_filter(build_env_filter(config))
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        builder.json().with_ansi(false).try_init()
    } else {
        builder.with_ansi(true).try_init()
    };
    if let Err(err) = installed {
        eprintln!("tracing subscriber already installed: {err}");
    }
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Read API, health, metrics and OpenAPI routes behind the request-id and
/// tracing middleware.
pub fn create_app_router(
    state: Arc<AppState>,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Router {
    let request_id_state = RequestIdState::from_config(config);

    Router::new()
        .nest("/api", routes::create_read_router())
        .merge(routes::health::create_health_router())
        .merge(openapi_routes())
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(metrics_handle))
        .layer(tracer::create_trace_layer())
        .layer(axum::middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .with_state(state)
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Cancels `token` on the first signal. A second signal exits the process
/// immediately with [`FORCED_EXIT_CODE`].
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, finishing in-flight work");
        token.cancel();

        shutdown_signal().await;
        warn!("second shutdown signal, exiting immediately");
        std::process::exit(FORCED_EXIT_CODE);
    })
}

/// Serves the read API until a shutdown signal.
///
/// # Errors
/// Fails when the store is unavailable at startup or the listener cannot
/// bind.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    info!("starting read API");

    let metrics_handle = metrics_handle();
    let store = store::open(&config.store)
        .await
        .context("message store is not available")?;
    let state = Arc::new(AppState::new(store).with_query_timeout(config.store.query_timeout()));
    let app = create_app_router(state, &config, metrics_handle);

    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("could not bind {address}"))?;
    info!(%address, "listening");

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("server error")?;

    info!("read API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use serde_json::Value;
    use std::{
        io::{self, Write},
        sync::Mutex,
    };
    use tower::ServiceExt;
    use tracing::Subscriber;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferMakeWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    struct BufferWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl<'a> MakeWriter<'a> for BufferMakeWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            BufferWriter {
                buffer: Arc::clone(&self.buffer),
            }
        }
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn subscriber_with_writer(
        config: &Config,
        writer: BufferMakeWriter,
    ) -> Box<dyn Subscriber + Send + Sync> {
        let builder = fmt::fmt()
            .with_env_filter(build_env_filter(config))
            .with_target(false)
            .with_writer(writer);

        if matches!(config.logging.format, LogFormat::Json) {
            Box::new(builder.json().with_ansi(false).finish())
        } else {
            Box::new(builder.with_ansi(false).finish())
        }
    }

    fn first_line(config: &Config) -> String {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = subscriber_with_writer(
            config,
            BufferMakeWriter {
                buffer: buffer.clone(),
            },
        );
        let dispatch = tracing::dispatcher::Dispatch::new(subscriber);
        tracing::dispatcher::with_default(&dispatch, || {
            info!(flushed = 3, "batch written");
        });

        let contents = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        contents
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap()
            .to_string()
    }

    #[test]
    fn json_log_format_produces_json_output() {
        let mut config = Config::default();
        config.logging.format = LogFormat::Json;

        let value: Value = serde_json::from_str(&first_line(&config)).unwrap();
        assert_eq!(value["fields"]["message"], "batch written");
        assert_eq!(value["fields"]["flushed"], 3);
    }

    #[test]
    fn text_log_format_emits_plain_events() {
        let mut config = Config::default();
        config.logging.format = LogFormat::Text;

        let line = first_line(&config);
        assert!(serde_json::from_str::<Value>(&line).is_err());
        assert!(line.contains("batch written"));
    }

    #[test]
    fn repeated_tracing_initialization_is_harmless() {
        let config = Config::default();
        initialize_tracing(&config);
        initialize_tracing(&config);
    }

    fn app() -> Router {
        let state = Arc::new(AppState::new(Arc::new(MemoryStore::new())));
        create_app_router(state, &Config::default(), metrics_handle())
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_payload() {
        let app = app();
        metrics::counter!("chatlog_query_total", "endpoint" => "messages", "status" => "200")
            .increment(1);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("chatlog_query_total"));
    }

    #[tokio::test]
    async fn request_id_is_echoed_or_assigned() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health/alive")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get("x-request-id").unwrap(), "abc-123");

        let response = app()
            .oneshot(Request::builder().uri("/health/alive").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let assigned = response.headers().get("x-request-id").unwrap();
        assert!(uuid::Uuid::parse_str(assigned.to_str().unwrap()).is_ok());
    }
}
