//! Elasticsearch backend over its REST API.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, header::CONTENT_TYPE};
use serde::Serialize;
use serde_json::{Map, Value, json};
use shared::config::StoreConfig;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{
    BulkFailure, BulkResponse, MessageDocument, MessageStore, RawBucket, RawHit, SearchRequest,
    SearchResponse, SortField, StoreError,
};

/// Name of the terms aggregation inside search requests.
const AGGREGATION_NAME: &str = "groups";

/// Longest error body kept in a [`StoreError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Keyword copy of the document id. Elasticsearch 8 refuses to sort on
/// `_id`, so history ties are broken on this field instead.
pub const ID_FIELD: &str = "message_id";

fn field_properties() -> Value {
    json!({
        "channel": { "type": "keyword" },
        "user": { "type": "keyword" },
        "text": { "type": "text" },
        "timestamp": {
            "type": "date",
            "format": "epoch_millis||strict_date_optional_time"
        },
        ID_FIELD: { "type": "keyword" }
    })
}

/// Mapping applied when the index is created.
#[must_use]
pub fn index_mapping() -> Value {
    json!({ "mappings": { "properties": field_properties() } })
}

/// Name of `field` in a `_search` body.
#[must_use]
pub fn sort_field_name(field: SortField) -> &'static str {
    match field {
        SortField::Id => ID_FIELD,
        other => other.as_str(),
    }
}

/// Time-ordered identifier. UUIDv7 strings compare in creation order, so a
/// document indexed later never sorts below an earlier one with the same
/// timestamp.
#[must_use]
pub fn next_document_id() -> String {
    Uuid::now_v7().to_string()
}

#[derive(Serialize)]
struct IndexedDocument<'a> {
    #[serde(flatten)]
    document: &'a MessageDocument,
    message_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct ElasticStore {
    client: Client,
    base_url: String,
    index: String,
    credentials: Option<(String, String)>,
}

impl ElasticStore {
    /// # Errors
    /// Returns [`StoreError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            credentials: config
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = if path.is_empty() {
            format!("{}/", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        };

        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    /// Adds [`ID_FIELD`] to an index created without it. Fails when the
    /// field exists with another type, since history could not be sorted.
    async fn ensure_id_field(&self) -> Result<(), StoreError> {
        let builder = self
            .request(Method::PUT, &format!("{}/_mapping", self.index))
            .json(&json!({ "properties": { ID_FIELD: { "type": "keyword" } } }));

        Self::send_json(builder).await.map_err(|err| match err {
            StoreError::Status { status, body } => StoreError::Status {
                status,
                body: format!("index {} cannot map {ID_FIELD} as keyword: {body}", self.index),
            },
            other => other,
        })?;
        debug!(index = %self.index, "id field mapped");
        Ok(())
    }

    async fn send_json(builder: RequestBuilder) -> Result<Value, StoreError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(response.json::<Value>().await?)
    }
}

fn status_error(status: StatusCode, mut body: String) -> StoreError {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    StoreError::Status {
        status: status.as_u16(),
        body,
    }
}

/// Serializes `documents` as `_bulk` NDJSON, one `index` action each. Every
/// document gets its id from `next_id`, written both as `_id` and as
/// [`ID_FIELD`].
///
/// # Errors
/// Returns [`StoreError::InvalidRequest`] if a document does not serialize.
pub fn bulk_body(
    documents: &[MessageDocument],
    mut next_id: impl FnMut() -> String,
) -> Result<String, StoreError> {
    let mut body = String::new();
    for document in documents {
        let id = next_id();
        let lines = serde_json::to_string(&json!({ "index": { "_id": id } })).and_then(|action| {
            let source = serde_json::to_string(&IndexedDocument {
                document,
                message_id: &id,
            })?;
            Ok((action, source))
        });
        let (action, source) = lines.map_err(|err| StoreError::InvalidRequest(err.to_string()))?;
        body.push_str(&action);
        body.push('\n');
        body.push_str(&source);
        body.push('\n');
    }
    Ok(body)
}

/// Extracts per-item failures from a `_bulk` response body.
///
/// # Errors
/// Returns [`StoreError::Response`] when `items` is missing.
pub fn parse_bulk_response(value: &Value) -> Result<BulkResponse, StoreError> {
    let items = value
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Response("bulk response without items".to_string()))?;

    let failures = items
        .iter()
        .enumerate()
        .filter_map(|(position, item)| {
            let result = item.as_object()?.values().next()?;
            let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
            let error = result.get("error");
            if error.is_none() && (200..300).contains(&status) {
                return None;
            }

            let reason = error
                .and_then(|error| error.get("reason"))
                .and_then(Value::as_str)
                .map_or_else(|| format!("status {status}"), str::to_string);
            Some(BulkFailure {
                position,
                status: u16::try_from(status).unwrap_or(0),
                reason,
            })
        })
        .collect();

    Ok(BulkResponse {
        actions: items.len(),
        failures,
    })
}

/// Translates a [`SearchRequest`] into the `_search` request body.
///
/// # Errors
/// Returns [`StoreError::InvalidRequest`] when `search_after` is combined
/// with a sort key a cursor cannot carry.
pub fn search_body(request: &SearchRequest) -> Result<Value, StoreError> {
    let mut body = Map::new();

    let filter: Vec<Value> = request
        .channel
        .iter()
        .map(|channel| json!({ "term": { "channel": channel } }))
        .collect();
    body.insert("query".into(), json!({ "bool": { "filter": filter } }));

    let sort: Vec<Value> = request
        .sort
        .iter()
        .map(|spec| json!({ sort_field_name(spec.field): { "order": spec.order.as_str() } }))
        .collect();
    if !sort.is_empty() {
        body.insert("sort".into(), Value::Array(sort));
    }

    body.insert("size".into(), json!(request.size));
    body.insert("track_total_hits".into(), Value::Bool(true));

    if let Some(cursor) = &request.search_after {
        let values = request
            .sort
            .iter()
            .map(|spec| match spec.field {
                SortField::Timestamp => Ok(json!(cursor.timestamp_ms())),
                SortField::Id => Ok(json!(cursor.id())),
                other => Err(StoreError::InvalidRequest(format!(
                    "search_after cannot resume on sort field {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        body.insert("search_after".into(), Value::Array(values));
    } else if request.from > 0 {
        body.insert("from".into(), json!(request.from));
    }

    if let Some(aggregation) = request.aggregation {
        body.insert(
            "aggs".into(),
            json!({
                AGGREGATION_NAME: {
                    "terms": { "field": aggregation.field.as_str(), "size": aggregation.size }
                }
            }),
        );
    }

    if let Some(timeout) = request.timeout {
        body.insert("timeout".into(), json!(format!("{}ms", timeout.as_millis())));
    }

    Ok(Value::Object(body))
}

/// Splits a `_search` response into raw hits and buckets.
///
/// # Errors
/// Returns [`StoreError::Response`] when the envelope is malformed. Document
/// bodies are left for the decoder.
pub fn parse_search_response(mut value: Value) -> Result<SearchResponse, StoreError> {
    let hits_envelope = value
        .get_mut("hits")
        .ok_or_else(|| StoreError::Response("search response without hits".to_string()))?;

    // `total` is an object since 7.x, a bare number before.
    let total = match hits_envelope.get("total") {
        Some(Value::Number(number)) => number.as_u64().unwrap_or(0),
        Some(total) => total.get("value").and_then(Value::as_u64).unwrap_or(0),
        None => 0,
    };

    let hits = match hits_envelope.get_mut("hits").map(Value::take) {
        Some(Value::Array(hits)) => hits
            .into_iter()
            .enumerate()
            .map(|(position, mut hit)| {
                let id = hit
                    .get("_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| StoreError::Response(format!("hit {position} has no _id")))?;
                let source = hit.get_mut("_source").map(Value::take).unwrap_or(Value::Null);
                Ok(RawHit { id, source })
            })
            .collect::<Result<Vec<_>, StoreError>>()?,
        _ => Vec::new(),
    };

    let buckets = value
        .get("aggregations")
        .and_then(|aggs| aggs.get(AGGREGATION_NAME))
        .and_then(|agg| agg.get("buckets"))
        .and_then(Value::as_array)
        .map(|buckets| {
            buckets
                .iter()
                .map(|bucket| RawBucket {
                    key: bucket.get("key").cloned().unwrap_or(Value::Null),
                    doc_count: bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0),
                })
                .collect()
        });

    Ok(SearchResponse {
        total,
        hits,
        buckets,
    })
}

#[async_trait]
impl MessageStore for ElasticStore {
    #[instrument(skip_all, fields(index = %self.index, documents = documents.len()))]
    async fn bulk_index(
        &self,
        documents: &[MessageDocument],
    ) -> Result<BulkResponse, StoreError> {
        let body = bulk_body(documents, next_document_id)?;
        let builder = self
            .request(Method::POST, &format!("{}/_bulk", self.index))
            .query(&[("refresh", "wait_for")])
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);

        let value = Self::send_json(builder).await?;
        let response = parse_bulk_response(&value)?;
        debug!(
            actions = response.actions,
            failed = response.failures.len(),
            "bulk request completed"
        );
        Ok(response)
    }

    #[instrument(skip_all, fields(index = %self.index))]
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError> {
        let body = search_body(request)?;
        let mut builder = self
            .request(Method::POST, &format!("{}/_search", self.index))
            .json(&body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let value = Self::send_json(builder).await?;
        parse_search_response(value)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let value = Self::send_json(self.request(Method::GET, "")).await?;
        let version = value
            .pointer("/version/number")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        debug!(version, "store answered ping");
        Ok(())
    }

    async fn ensure_index(&self) -> Result<(), StoreError> {
        let response = self.request(Method::HEAD, &self.index).send().await?;
        match response.status() {
            status if status.is_success() => return self.ensure_id_field().await,
            StatusCode::NOT_FOUND => {}
            status => return Err(status_error(status, String::new())),
        }

        let response = self
            .request(Method::PUT, &self.index)
            .json(&index_mapping())
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            info!(index = %self.index, "created index");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        // Another process created it between the HEAD and the PUT.
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(status_error(status, body))
    }
}
