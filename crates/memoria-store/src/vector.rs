//! Vector store adapter over an OpenSearch-compatible REST API.
//!
//! Documents are untyped JSON maps with an `embedding` field for k-NN and a
//! `status` field for soft lifecycle: every search implicitly filters
//! `status=active`, while `expired_at` on the record itself is the
//! soft-invalidation mechanism. Deletes are hard.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::OpenSearchConfig;
use crate::doc::Document;
use crate::error::{Result, StoreError};

/// Lifecycle status written on every stored document.
pub const STATUS_ACTIVE: &str = "active";

/// A search request against the vector store.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Exact-match filters (field -> value).
    pub filters: Document,
    /// Multi-value filters (field -> allowed values).
    pub terms_filters: HashMap<String, Vec<String>>,
    /// Range filters (field -> {gte/lte/gt/lt -> value}).
    pub range_filters: HashMap<String, Map<String, Value>>,
    /// Query vector for k-NN search.
    pub embedding: Vec<f32>,
    /// Full-text query over `raw_content` and `content`.
    pub text_query: String,
    /// Combine k-NN and full-text into one weighted query.
    pub hybrid: bool,
    /// Drop hits scoring below this threshold (0 disables).
    pub score_threshold: f64,
    /// Maximum hits; 0 means the default of 10.
    pub limit: usize,
    /// Fields that must be absent (e.g. `expired_at` for live records).
    pub missing_fields: Vec<String>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn with_terms(mut self, field: impl Into<String>, values: Vec<String>) -> Self {
        self.terms_filters.insert(field.into(), values);
        self
    }

    pub fn with_range(
        mut self,
        field: impl Into<String>,
        op: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        let entry = self.range_filters.entry(field.into()).or_default();
        entry.insert(op.into(), value.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_query = text.into();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_score_threshold(mut self, threshold: f64) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Require the field to be absent on every hit.
    pub fn without_field(mut self, field: impl Into<String>) -> Self {
        self.missing_fields.push(field.into());
        self
    }

    /// Effective hit limit.
    pub fn k(&self) -> usize {
        if self.limit == 0 { 10 } else { self.limit }
    }
}

/// Typed-document CRUD and search over the vector store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert a document with immediate refresh. A missing `status` field
    /// defaults to `active`.
    async fn store(&self, id: &str, doc: Document) -> Result<()>;

    /// Fetch a document by id.
    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Run a search; hits carry a `_score` annotation.
    async fn search(&self, query: SearchQuery) -> Result<Vec<Document>>;

    /// Hard-delete a document by id.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete all active documents matching the filters, returning the count.
    async fn delete_by_query(&self, filters: Document) -> Result<usize>;

    /// Count active documents matching the filters.
    async fn count(&self, filters: Document) -> Result<usize>;

    /// Partially update a document's fields via inline script.
    async fn update_fields(&self, id: &str, fields: Document) -> Result<()>;

    /// Release the connection.
    async fn close(&self) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Query building
// ─────────────────────────────────────────────────────────────────────────────

/// Assemble the filter clauses, always including `status=active`.
fn build_filters(
    filters: &Document,
    terms: &HashMap<String, Vec<String>>,
    ranges: &HashMap<String, Map<String, Value>>,
) -> Vec<Value> {
    let mut clauses = vec![json!({"term": {"status": STATUS_ACTIVE}})];

    for (field, value) in filters {
        clauses.push(json!({"term": {field.clone(): value.clone()}}));
    }
    for (field, values) in terms {
        clauses.push(json!({"terms": {field.clone(): values.clone()}}));
    }
    for (field, bounds) in ranges {
        clauses.push(json!({"range": {field.clone(): Value::Object(bounds.clone())}}));
    }

    clauses
}

/// Build the `_search` request body for a query.
///
/// Shapes, by available criteria:
/// - embedding + text + hybrid: weighted `bool` of k-NN and `multi_match`
///   `should` clauses (text boost 0.5 of vector)
/// - embedding only: k-NN `must` with filters
/// - text only: `multi_match` over `raw_content^2, content`
/// - neither: filters sorted by `created_at` descending
pub(crate) fn build_search_body(query: &SearchQuery) -> Value {
    let filters = build_filters(&query.filters, &query.terms_filters, &query.range_filters);
    let k = query.k();

    let has_embedding = !query.embedding.is_empty();
    let has_text = !query.text_query.is_empty();

    let mut body = if query.hybrid && has_embedding && has_text {
        json!({
            "size": k,
            "query": {
                "bool": {
                    "should": [
                        {"knn": {"embedding": {"vector": query.embedding, "k": k}}},
                        {"multi_match": {
                            "query": query.text_query,
                            "fields": ["raw_content^2", "content"],
                            "type": "best_fields",
                            "boost": 0.5,
                        }},
                    ],
                    "minimum_should_match": 1,
                    "filter": filters,
                }
            }
        })
    } else if has_embedding {
        json!({
            "size": k,
            "query": {
                "bool": {
                    "must": {"knn": {"embedding": {"vector": query.embedding, "k": k}}},
                    "filter": filters,
                }
            }
        })
    } else if has_text {
        json!({
            "size": k,
            "query": {
                "bool": {
                    "must": {"multi_match": {
                        "query": query.text_query,
                        "fields": ["raw_content^2", "content"],
                        "type": "best_fields",
                    }},
                    "filter": filters,
                }
            }
        })
    } else {
        json!({
            "size": k,
            "sort": [{"created_at": {"order": "desc"}}],
            "query": {"bool": {"filter": filters}},
        })
    };

    if !query.missing_fields.is_empty() {
        let must_not: Vec<Value> = query
            .missing_fields
            .iter()
            .map(|field| json!({"exists": {"field": field}}))
            .collect();
        if let Some(bool_query) = body
            .pointer_mut("/query/bool")
            .and_then(Value::as_object_mut)
        {
            bool_query.insert("must_not".to_string(), Value::Array(must_not));
        }
    }

    body
}

/// Build the inline-script body for a partial field update.
pub(crate) fn build_update_script(fields: &Document) -> Value {
    let mut source_parts = Vec::with_capacity(fields.len());
    let mut params = Map::new();

    for (field, value) in fields {
        let param = format!("p_{field}");
        source_parts.push(format!("ctx._source.{field} = params.{param}"));
        params.insert(param, value.clone());
    }

    json!({
        "script": {
            "source": source_parts.join("; "),
            "params": Value::Object(params),
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenSearch adapter
// ─────────────────────────────────────────────────────────────────────────────

/// Vector store over the OpenSearch REST API.
pub struct OpenSearchStore {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    index: String,
    embedding_dim: usize,
}

impl OpenSearchStore {
    pub fn new(config: OpenSearchConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_ssl)
            .build()
            .map_err(|e| StoreError::Vector(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.addresses[0].trim_end_matches('/').to_string(),
            username: config.username,
            password: config.password,
            index: config.index,
            embedding_dim: config.embedding_dim,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, format!("{}{}", self.base_url, path));
        if !self.username.is_empty() {
            builder = builder.basic_auth(&self.username, Some(&self.password));
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value> {
        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::Vector(e.to_string()))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Vector(e.to_string()))?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(body.to_string()));
        }
        if !status.is_success() {
            return Err(StoreError::Vector(format!("{status}: {body}")));
        }
        Ok(body)
    }

    /// Create the index with a k-NN mapping if it does not exist yet.
    ///
    /// Called once at startup from the composition root; bounded by the
    /// caller's init timeout.
    pub async fn ensure_index(&self) -> Result<()> {
        let head = self
            .request(reqwest::Method::HEAD, &format!("/{}", self.index))
            .send()
            .await
            .map_err(|e| StoreError::Vector(e.to_string()))?;
        if head.status().is_success() {
            return Ok(());
        }

        let mapping = json!({
            "settings": {"index": {"knn": true}},
            "mappings": {
                "properties": {
                    "embedding": {"type": "knn_vector", "dimension": self.embedding_dim},
                    "topic_embedding": {"type": "knn_vector", "dimension": self.embedding_dim},
                    "type": {"type": "keyword"},
                    "status": {"type": "keyword"},
                    "agent_id": {"type": "keyword"},
                    "user_id": {"type": "keyword"},
                    "session_id": {"type": "keyword"},
                    "memory_type": {"type": "keyword"},
                    "role": {"type": "keyword"},
                    "created_at": {"type": "date"},
                    "content": {"type": "text"},
                    "raw_content": {"type": "text"},
                }
            }
        });

        self.send(
            self.request(reqwest::Method::PUT, &format!("/{}", self.index))
                .json(&mapping),
        )
        .await?;
        debug!(index = %self.index, dim = self.embedding_dim, "vector index created");
        Ok(())
    }

    /// Validate a document's embedding dimension before writing.
    fn check_dimension(&self, doc: &Document) -> Result<()> {
        for field in crate::doc::EMBEDDING_FIELDS {
            if let Some(Value::Array(values)) = doc.get(*field) {
                if !values.is_empty() && values.len() != self.embedding_dim {
                    return Err(StoreError::Schema(format!(
                        "field {field} has dimension {}, index expects {}",
                        values.len(),
                        self.embedding_dim
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for OpenSearchStore {
    async fn store(&self, id: &str, mut doc: Document) -> Result<()> {
        self.check_dimension(&doc)?;
        doc.entry("status".to_string())
            .or_insert_with(|| Value::String(STATUS_ACTIVE.to_string()));

        self.send(
            self.request(
                reqwest::Method::PUT,
                &format!("/{}/_doc/{}?refresh=true", self.index, id),
            )
            .json(&Value::Object(doc)),
        )
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let body = match self
            .send(self.request(
                reqwest::Method::GET,
                &format!("/{}/_doc/{}", self.index, id),
            ))
            .await
        {
            Ok(body) => body,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(other) => return Err(other),
        };

        if body.get("found").and_then(Value::as_bool) != Some(true) {
            return Ok(None);
        }
        match body.get("_source") {
            Some(Value::Object(source)) => Ok(Some(source.clone())),
            _ => Ok(None),
        }
    }

    async fn search(&self, query: SearchQuery) -> Result<Vec<Document>> {
        let body = build_search_body(&query);
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/{}/_search", self.index),
                )
                .json(&body),
            )
            .await?;

        let hits = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let score = hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0);
            if query.score_threshold > 0.0 && score < query.score_threshold {
                continue;
            }
            let Some(Value::Object(mut source)) = hit.get("_source").cloned() else {
                continue;
            };
            source.insert("_score".to_string(), Value::from(score));
            results.push(source);
        }

        Ok(results)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.send(self.request(
            reqwest::Method::DELETE,
            &format!("/{}/_doc/{}?refresh=true", self.index, id),
        ))
        .await?;
        Ok(())
    }

    async fn delete_by_query(&self, filters: Document) -> Result<usize> {
        let clauses = build_filters(&filters, &HashMap::new(), &HashMap::new());
        let body = json!({"query": {"bool": {"filter": clauses}}});

        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/{}/_delete_by_query?refresh=true", self.index),
                )
                .json(&body),
            )
            .await?;

        Ok(response
            .get("deleted")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    async fn count(&self, filters: Document) -> Result<usize> {
        let clauses = build_filters(&filters, &HashMap::new(), &HashMap::new());
        let body = json!({"query": {"bool": {"filter": clauses}}});

        let response = self
            .send(
                self.request(reqwest::Method::POST, &format!("/{}/_count", self.index))
                    .json(&body),
            )
            .await?;

        Ok(response.get("count").and_then(Value::as_u64).unwrap_or(0) as usize)
    }

    async fn update_fields(&self, id: &str, fields: Document) -> Result<()> {
        let body = build_update_script(&fields);
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/{}/_update/{}", self.index, id),
            )
            .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_query() -> SearchQuery {
        SearchQuery::new()
            .with_filter("type", "summary")
            .with_filter("agent_id", "jarvis")
    }

    #[test]
    fn test_filters_always_include_active_status() {
        let body = build_search_body(&base_query());
        let filters = body.pointer("/query/bool/filter").unwrap().as_array().unwrap();
        assert!(filters.contains(&json!({"term": {"status": "active"}})));
        assert!(filters.contains(&json!({"term": {"type": "summary"}})));
    }

    #[test]
    fn test_knn_body() {
        let body = build_search_body(&base_query().with_embedding(vec![0.1, 0.2]).with_limit(5));
        assert_eq!(body["size"], json!(5));
        let knn = body.pointer("/query/bool/must/knn/embedding").unwrap();
        assert_eq!(knn["k"], json!(5));
        assert_eq!(knn["vector"], json!([0.1f32, 0.2f32]));
    }

    #[test]
    fn test_text_body_weights_raw_content() {
        let body = build_search_body(&base_query().with_text("咖啡"));
        let mm = body.pointer("/query/bool/must/multi_match").unwrap();
        assert_eq!(mm["fields"], json!(["raw_content^2", "content"]));
    }

    #[test]
    fn test_hybrid_body() {
        let mut query = base_query()
            .with_embedding(vec![0.1])
            .with_text("咖啡");
        query.hybrid = true;
        let body = build_search_body(&query);

        let should = body.pointer("/query/bool/should").unwrap().as_array().unwrap();
        assert_eq!(should.len(), 2);
        assert!(should[0].get("knn").is_some());
        assert_eq!(should[1].pointer("/multi_match/boost"), Some(&json!(0.5)));
        assert_eq!(body.pointer("/query/bool/minimum_should_match"), Some(&json!(1)));
    }

    #[test]
    fn test_filter_only_body_sorts_by_recency() {
        let body = build_search_body(&base_query());
        assert_eq!(
            body["sort"],
            json!([{"created_at": {"order": "desc"}}])
        );
    }

    #[test]
    fn test_range_filter() {
        let body = build_search_body(&base_query().with_range("created_at", "gt", "2024-01-01"));
        let filters = body.pointer("/query/bool/filter").unwrap().as_array().unwrap();
        assert!(filters.contains(&json!({"range": {"created_at": {"gt": "2024-01-01"}}})));
    }

    #[test]
    fn test_default_limit() {
        assert_eq!(SearchQuery::new().k(), 10);
        assert_eq!(SearchQuery::new().with_limit(3).k(), 3);
    }

    #[test]
    fn test_missing_fields_become_must_not() {
        let body = build_search_body(&base_query().without_field("expired_at"));
        assert_eq!(
            body.pointer("/query/bool/must_not"),
            Some(&json!([{"exists": {"field": "expired_at"}}]))
        );
    }

    #[test]
    fn test_update_script() {
        let mut fields = Document::new();
        fields.insert("access_count".into(), json!(4));
        let body = build_update_script(&fields);
        assert_eq!(
            body.pointer("/script/source"),
            Some(&json!("ctx._source.access_count = params.p_access_count"))
        );
        assert_eq!(
            body.pointer("/script/params/p_access_count"),
            Some(&json!(4))
        );
    }

    #[test]
    fn test_dimension_check() {
        let store = OpenSearchStore::new(OpenSearchConfig {
            addresses: vec!["http://localhost:9200".into()],
            username: String::new(),
            password: String::new(),
            index: "memoria".into(),
            embedding_dim: 4,
            insecure_ssl: false,
        })
        .unwrap();

        let mut doc = Document::new();
        doc.insert("embedding".into(), json!([0.1, 0.2, 0.3]));
        assert!(matches!(
            store.check_dimension(&doc),
            Err(StoreError::Schema(_))
        ));

        doc.insert("embedding".into(), json!([0.1, 0.2, 0.3, 0.4]));
        assert!(store.check_dimension(&doc).is_ok());
    }
}
