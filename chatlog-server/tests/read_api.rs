//! End-to-end tests of the read API over the in-memory store.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use axum::http::{StatusCode, header};
use axum_test::TestServer;
use serde_json::{Value, json};
use server::{
    app_state::AppState,
    ingest::BulkWriter,
    server::{create_app_router, metrics_handle},
    store::{
        BulkResponse, MemoryStore, MessageDocument, MessageStore, RawHit, SearchRequest,
        SearchResponse, StoreError,
    },
};
use shared::{
    config::Config,
    models::{ChatMessage, MessagePage, timestamp::from_millis},
};

fn message(channel: &str, user: &str, text: &str, millis: i64) -> ChatMessage {
    ChatMessage::new(channel, user, text, from_millis(millis).unwrap())
}

async fn write(store: Arc<MemoryStore>, batch: &[ChatMessage]) {
    BulkWriter::new(store).write(batch).await.unwrap();
}

fn test_server(store: Arc<dyn MessageStore>) -> TestServer {
    let state = Arc::new(AppState::new(store));
    let app = create_app_router(state, &Config::default(), metrics_handle());
    TestServer::new(app).expect("test server")
}

/// Delegates to a memory store and counts searches.
#[derive(Debug, Default)]
struct CountingStore {
    inner: MemoryStore,
    searches: AtomicUsize,
}

#[async_trait]
impl MessageStore for CountingStore {
    async fn bulk_index(&self, documents: &[MessageDocument]) -> Result<BulkResponse, StoreError> {
        self.inner.bulk_index(documents).await
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(request).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_index(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Answers every search with a fixed result.
#[derive(Debug)]
struct CannedStore(Result<Vec<RawHit>, u16>);

#[async_trait]
impl MessageStore for CannedStore {
    async fn bulk_index(&self, _documents: &[MessageDocument]) -> Result<BulkResponse, StoreError> {
        Ok(BulkResponse::default())
    }

    async fn search(&self, _request: &SearchRequest) -> Result<SearchResponse, StoreError> {
        match &self.0 {
            Ok(hits) => Ok(SearchResponse {
                total: hits.len() as u64,
                hits: hits.clone(),
                buckets: None,
            }),
            Err(status) => Err(StoreError::Status {
                status: *status,
                body: "search_phase_execution_exception".into(),
            }),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_index(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn ties_are_paged_by_id_and_last_page_has_no_next() {
    let store = Arc::new(MemoryStore::new());
    write(
        store.clone(),
        &[
            message("#foo", "alice", "A", 100),
            message("#foo", "bob", "B", 100),
            message("#bar", "carol", "C", 200),
        ],
    )
    .await;
    let server = test_server(store);

    let response = server.get("/api/messages?stream=foo&limit=1").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let first: MessagePage = response.json();

    assert_eq!(first.channel_name, "foo");
    assert_eq!(first.messages.len(), 1);
    assert_eq!(first.messages[0].text, "B");
    assert_eq!(first.messages[0].id.as_deref(), Some("2"));
    assert_eq!(
        first.next_page,
        "/api/messages?stream=foo&limit=1&after_timestamp=100&after_id=2"
    );

    let second: MessagePage = server.get(&first.next_page).await.json();
    assert_eq!(second.messages.len(), 1);
    assert_eq!(second.messages[0].text, "A");
    assert_eq!(second.next_page, "");
}

#[tokio::test]
async fn prefixed_stream_is_echoed_as_the_bare_channel() {
    let store = Arc::new(MemoryStore::new());
    write(store.clone(), &[message("#foo", "alice", "hi", 100)]).await;

    let page: MessagePage = test_server(store)
        .get("/api/messages?stream=%23foo")
        .await
        .json();

    assert_eq!(page.channel_name, "foo");
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].channel, "foo");
}

#[tokio::test]
async fn messages_are_rendered_with_millisecond_timestamps() {
    let store = Arc::new(MemoryStore::new());
    write(store.clone(), &[message("foo", "alice", "hi", 1_714_564_800_250)]).await;

    let body: Value = test_server(store).get("/api/messages").await.json();

    assert_eq!(body["channel_name"], "");
    assert_eq!(
        body["messages"][0],
        json!({
            "id": "1",
            "channel": "foo",
            "user": "alice",
            "text": "hi",
            "timestamp": "2024-05-01T12:00:00.250Z"
        })
    );
    assert_eq!(body["next_page"], "");
}

#[tokio::test]
async fn paging_visits_every_message_once_in_order() {
    let store = Arc::new(MemoryStore::new());
    let batch: Vec<ChatMessage> = (0..23_i64)
        .map(|n| message("foo", "user", &format!("m{n}"), 1_000 + n / 3))
        .collect();
    write(store.clone(), &batch).await;
    let server = test_server(store);

    let mut url = "/api/messages?limit=5&stream=foo".to_string();
    let mut seen = HashSet::new();
    let mut keys: Vec<(i64, u64)> = Vec::new();
    let mut pages = 0;

    loop {
        let page: MessagePage = server.get(&url).await.json();
        pages += 1;
        for message in &page.messages {
            let id = message.id.clone().unwrap();
            assert!(seen.insert(id.clone()), "message {id} returned twice");
            keys.push((message.timestamp_millis(), id.parse().unwrap()));
        }
        if page.next_page.is_empty() {
            break;
        }
        assert!(page.next_page.starts_with("/api/messages?limit=5&stream=foo&"));
        url = page.next_page;
    }

    assert_eq!(pages, 5);
    assert_eq!(seen.len(), 23);
    assert!(keys.windows(2).all(|pair| pair[0] > pair[1]));
}

#[tokio::test]
async fn exact_multiple_of_page_size_ends_without_an_empty_page() {
    let store = Arc::new(MemoryStore::new());
    let batch: Vec<ChatMessage> = (0..4).map(|n| message("foo", "u", "t", n)).collect();
    write(store.clone(), &batch).await;
    let server = test_server(store);

    let first: MessagePage = server.get("/api/messages?limit=2").await.json();
    assert!(first.has_next());
    let second: MessagePage = server.get(&first.next_page).await.json();
    assert_eq!(second.messages.len(), 2);
    assert!(!second.has_next());
}

#[tokio::test]
async fn issued_cursor_is_stable_under_inserts() {
    let store = Arc::new(MemoryStore::new());
    write(
        store.clone(),
        &[
            message("foo", "u", "old", 100),
            message("foo", "u", "mid", 200),
            message("foo", "u", "new", 300),
        ],
    )
    .await;
    let server = test_server(store.clone());

    let first: MessagePage = server.get("/api/messages?limit=2").await.json();
    let returned: Vec<_> = first.messages.iter().map(|m| m.text.clone()).collect();
    assert_eq!(returned, vec!["new", "mid"]);

    // Same timestamp as the cursor, and newer than it.
    write(
        store,
        &[message("foo", "u", "tie", 200), message("foo", "u", "newest", 400)],
    )
    .await;

    let second: MessagePage = server.get(&first.next_page).await.json();
    let texts: Vec<_> = second.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["old"]);
    assert_eq!(second.next_page, "");
}

#[tokio::test]
async fn streams_and_users_rank_by_message_count() {
    let store = Arc::new(MemoryStore::new());
    write(
        store.clone(),
        &[
            message("foo", "alice", "1", 1),
            message("foo", "bob", "2", 2),
            message("bar", "alice", "3", 3),
        ],
    )
    .await;
    let server = test_server(store);

    let streams: Value = server.get("/api/streams").await.json();
    assert_eq!(
        streams,
        json!([
            { "name": "foo", "num_messages_logged": 2 },
            { "name": "bar", "num_messages_logged": 1 }
        ])
    );

    let users: Value = server.get("/api/users?limit=1").await.json();
    assert_eq!(users, json!([{ "name": "alice", "num_messages_logged": 2 }]));
}

#[tokio::test]
async fn invalid_parameters_are_rejected_before_querying() {
    let store = Arc::new(CountingStore::default());
    let server = test_server(store.clone());

    for url in [
        "/api/messages?limit=1001",
        "/api/streams?limit=1001",
        "/api/users?limit=5000",
        "/api/messages?limit=0",
        "/api/messages?limit=ten",
        "/api/messages?after_timestamp=100",
        "/api/messages?after_id=2",
        "/api/messages?after_timestamp=soon&after_id=2",
    ] {
        let response = server.get(url).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST, "{url}");
        let content_type = response.header(header::CONTENT_TYPE);
        assert!(
            content_type.to_str().unwrap().starts_with("text/plain"),
            "{url}"
        );
    }

    let response = server.get("/api/messages?limit=1001").await;
    assert_eq!(response.text(), "limit cannot exceed 1000");
    assert_eq!(store.searches.load(Ordering::SeqCst), 0);

    let response = server.get("/api/messages?limit=1000").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(store.searches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn store_failure_is_a_problem_response() {
    let server = test_server(Arc::new(CannedStore(Err(503))));

    let response = server.get("/api/messages?stream=foo").await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.header(header::CONTENT_TYPE),
        "application/problem+json"
    );
    let body: Value = response.json();
    assert_eq!(body["code"], "query_failed");
    assert_eq!(body["details"]["store_status"], 503);
}

#[tokio::test]
async fn malformed_record_fails_the_whole_page() {
    let hits = vec![
        RawHit {
            id: "1".into(),
            source: json!({ "channel": "foo", "user": "a", "text": "ok", "timestamp": 5 }),
        },
        RawHit {
            id: "2".into(),
            source: json!({ "channel": "foo", "text": "no user", "timestamp": 4 }),
        },
    ];
    let server = test_server(Arc::new(CannedStore(Ok(hits))));

    let response = server.get("/api/messages").await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["code"], "decode_failed");
    assert_eq!(body["details"]["record"], 1);
    assert_eq!(body["details"]["id"], "2");
}

#[tokio::test]
async fn health_version_and_openapi_are_served() {
    let server = test_server(Arc::new(MemoryStore::new()));

    let alive: Value = server.get("/health/alive").await.json();
    assert_eq!(alive, json!({ "status": "ok" }));
    server.get("/health/ready").await.assert_status_ok();

    let version: Value = server.get("/version").await.json();
    assert_eq!(version["version"], env!("CARGO_PKG_VERSION"));

    let doc: Value = server.get("/api/openapi.json").await.json();
    assert!(doc["paths"]["/api/messages"]["get"].is_object());

    let yaml = server.get("/api/openapi.yaml").await;
    assert!(yaml.text().contains("/api/streams"));
}

#[tokio::test]
async fn query_outcomes_are_counted() {
    let server = test_server(Arc::new(MemoryStore::new()));
    let rejected = server.get("/api/users?limit=2000").await;
    assert_eq!(rejected.status_code(), StatusCode::BAD_REQUEST);
    server.get("/api/users").await.assert_status_ok();

    let metrics = server.get("/metrics").await.text();
    assert!(metrics.contains("chatlog_query_total"));
    assert!(metrics.contains("status=\"400\""));
}
