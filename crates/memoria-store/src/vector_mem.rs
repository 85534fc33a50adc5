//! In-memory vector store double for tests.
//!
//! Mirrors the adapter's observable semantics: implicit `status=active`
//! filtering, cosine-scored k-NN, substring text match with `raw_content`
//! weighted double, `_score` annotation, and hard deletes.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use memoria_types::time::parse_flexible;

use crate::doc::{embedding_to_f32, Document};
use crate::error::{Result, StoreError};
use crate::vector::{SearchQuery, VectorStore, STATUS_ACTIVE};

/// In-memory [`VectorStore`] implementation.
#[derive(Default)]
pub struct MemoryVectorStore {
    docs: RwLock<HashMap<String, Document>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held, regardless of status.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    fn matches(doc: &Document, query: &SearchQuery) -> bool {
        let status = doc.get("status").and_then(Value::as_str).unwrap_or("");
        if status != STATUS_ACTIVE {
            return false;
        }

        for (field, expected) in &query.filters {
            if doc.get(field) != Some(expected) {
                return false;
            }
        }

        for (field, allowed) in &query.terms_filters {
            let Some(actual) = doc.get(field).and_then(Value::as_str) else {
                return false;
            };
            if !allowed.iter().any(|v| v == actual) {
                return false;
            }
        }

        for field in &query.missing_fields {
            if doc.get(field).is_some_and(|v| !v.is_null()) {
                return false;
            }
        }

        for (field, bounds) in &query.range_filters {
            let Some(actual) = doc.get(field) else {
                return false;
            };
            for (op, bound) in bounds {
                let ordering = match compare_values(actual, bound) {
                    Some(ordering) => ordering,
                    None => return false,
                };
                let ok = match op.as_str() {
                    "gt" => ordering.is_gt(),
                    "gte" => ordering.is_ge(),
                    "lt" => ordering.is_lt(),
                    "lte" => ordering.is_le(),
                    _ => false,
                };
                if !ok {
                    return false;
                }
            }
        }

        true
    }

    fn score(doc: &Document, query: &SearchQuery) -> f64 {
        let mut vector_score = 0.0;
        if !query.embedding.is_empty() {
            if let Some(stored) = doc.get("embedding").and_then(|v| embedding_to_f32(v)) {
                vector_score = cosine(&query.embedding, &stored);
            }
        }

        let mut text_score = 0.0;
        if !query.text_query.is_empty() {
            let raw = doc.get("raw_content").and_then(Value::as_str).unwrap_or("");
            let content = doc.get("content").and_then(Value::as_str).unwrap_or("");
            if raw.contains(&query.text_query) {
                text_score = 2.0;
            } else if content.contains(&query.text_query) {
                text_score = 1.0;
            }
        }

        if query.hybrid {
            vector_score + 0.5 * text_score
        } else if !query.embedding.is_empty() {
            vector_score
        } else {
            text_score
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..a.len() {
        dot += a[i] as f64 * b[i] as f64;
        norm_a += (a[i] as f64).powi(2);
        norm_b += (b[i] as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Compare two JSON scalars, parsing timestamps when both sides parse.
fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b);
    }
    let (a, b) = (a.as_str()?, b.as_str()?);
    if let (Some(a), Some(b)) = (parse_flexible(a), parse_flexible(b)) {
        return Some(a.cmp(&b));
    }
    Some(a.cmp(b))
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn store(&self, id: &str, mut doc: Document) -> Result<()> {
        doc.entry("status".to_string())
            .or_insert_with(|| Value::String(STATUS_ACTIVE.to_string()));
        self.docs.write().insert(id.to_string(), doc);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().get(id).cloned())
    }

    async fn search(&self, query: SearchQuery) -> Result<Vec<Document>> {
        let docs = self.docs.read();
        let has_criteria = !query.embedding.is_empty() || !query.text_query.is_empty();

        let mut hits: Vec<(f64, Document)> = docs
            .values()
            .filter(|doc| Self::matches(doc, &query))
            .map(|doc| (Self::score(doc, &query), doc.clone()))
            .filter(|(score, _)| query.score_threshold <= 0.0 || *score >= query.score_threshold)
            .collect();

        if has_criteria {
            hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        } else {
            hits.sort_by(|a, b| {
                let created = |doc: &Document| {
                    doc.get("created_at")
                        .and_then(Value::as_str)
                        .and_then(parse_flexible)
                };
                created(&b.1).cmp(&created(&a.1))
            });
        }

        hits.truncate(query.k());

        Ok(hits
            .into_iter()
            .map(|(score, mut doc)| {
                doc.insert("_score".to_string(), Value::from(score));
                doc
            })
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.docs.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn delete_by_query(&self, filters: Document) -> Result<usize> {
        let query = SearchQuery {
            filters,
            ..Default::default()
        };
        let mut docs = self.docs.write();
        let ids: Vec<String> = docs
            .iter()
            .filter(|(_, doc)| Self::matches(doc, &query))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            docs.remove(id);
        }
        Ok(ids.len())
    }

    async fn count(&self, filters: Document) -> Result<usize> {
        let query = SearchQuery {
            filters,
            ..Default::default()
        };
        Ok(self
            .docs
            .read()
            .values()
            .filter(|doc| Self::matches(doc, &query))
            .count())
    }

    async fn update_fields(&self, id: &str, fields: Document) -> Result<()> {
        let mut docs = self.docs.write();
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        for (field, value) in fields {
            doc.insert(field, value);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
