#![cfg_attr(not(test), forbid(unsafe_code))]

//! Chat log ingestion into a search store, and the paginated read API over
//! it.

pub mod app_state;
mod handlers;
pub mod http;
pub mod ingest;
mod middleware;
pub mod openapi;
pub mod query;
mod routes;
pub mod server;
pub mod store;
mod tracer;
pub mod transport;
