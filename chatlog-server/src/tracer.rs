//! Request spans for the read API.

use std::time::Duration;

use axum::{body::Body, http::Request};
use tower_http::{
    classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier},
    trace::{DefaultOnBodyChunk, DefaultOnEos, DefaultOnResponse, MakeSpan, TraceLayer},
};
use tracing::{Level, Span, debug, error};

use crate::middleware::request_context::RequestContext;

type ReadApiTraceLayer = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    RequestSpan,
    fn(&Request<Body>, &Span),
    DefaultOnResponse,
    DefaultOnBodyChunk,
    DefaultOnEos,
    fn(ServerErrorsFailureClass, Duration, &Span),
>;

/// Opens one span per request, tagged with the request id assigned by
/// [`crate::middleware::request_context::assign_request_id`].
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map_or("n/a", |ctx| ctx.request_id.as_str());

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            path = %request.uri().path(),
            query = request.uri().query().unwrap_or_default(),
            request_id = %request_id,
        )
    }
}

pub(crate) fn on_request(request: &Request<Body>, span: &Span) {
    span.in_scope(|| debug!(version = ?request.version(), "request received"));
}

pub(crate) fn on_failure(failure: ServerErrorsFailureClass, latency: Duration, span: &Span) {
    span.in_scope(|| error!(error = %failure, latency = ?latency, "request failed"));
}

pub fn create_trace_layer() -> ReadApiTraceLayer {
    TraceLayer::new_for_http()
        .make_span_with(RequestSpan)
        .on_request(on_request as fn(&Request<Body>, &Span))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(on_failure as fn(ServerErrorsFailureClass, Duration, &Span))
}
