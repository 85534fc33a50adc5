//! Typed decode/encode at the document boundary.
//!
//! Adapters move untyped JSON maps across the wire; the core works with the
//! tagged record types from `memoria-types`. All conversion hooks live here:
//! embedding arrays back to `f32`, the `_score` annotation, and the `type` /
//! `status` envelope fields the vector store requires on every document.
//! Multi-format timestamp parsing is handled by the serde adapters on the
//! record types themselves (`memoria_types::time`).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// An untyped document as exchanged with the vector store.
pub type Document = Map<String, Value>;

/// Fields that hold dense vectors and need `f32` re-materialization.
pub const EMBEDDING_FIELDS: &[&str] = &["embedding", "content_embedding", "topic_embedding"];

/// Decode a stored document into a typed record.
pub fn decode<T: DeserializeOwned>(doc: Document) -> Result<T> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| StoreError::Schema(e.to_string()))
}

/// Encode a typed record as a document carrying the given `type` tag.
pub fn encode<T: Serialize>(record: &T, doc_type: &str) -> Result<Document> {
    let value = serde_json::to_value(record).map_err(|e| StoreError::Schema(e.to_string()))?;
    let Value::Object(mut doc) = value else {
        return Err(StoreError::Schema("record did not encode to an object".into()));
    };
    doc.insert("type".to_string(), Value::String(doc_type.to_string()));
    Ok(doc)
}

/// Read the transient `_score` annotation off a search hit.
pub fn score_of(doc: &Document) -> f64 {
    doc.get("_score").and_then(Value::as_f64).unwrap_or(0.0)
}

/// Decode a search hit, carrying its `_score` into the record's `score`
/// field.
pub fn decode_scored<T: DeserializeOwned>(mut doc: Document) -> Result<T> {
    let score = score_of(&doc);
    doc.insert("score".to_string(), Value::from(score));
    doc.remove("_score");
    decode(doc)
}

/// Convert a JSON array value into an `f32` vector, if it is one.
pub fn embedding_to_f32(value: &Value) -> Option<Vec<f32>> {
    let array = value.as_array()?;
    let mut out = Vec::with_capacity(array.len());
    for item in array {
        out.push(item.as_f64()? as f32);
    }
    Some(out)
}

/// Read a named embedding field off a document.
pub fn embedding_field(doc: &Document, field: &str) -> Vec<f32> {
    doc.get(field)
        .and_then(embedding_to_f32)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use memoria_types::{EventTriplet, MemoryType, SummaryMemory};
    use serde_json::json;

    fn memory() -> SummaryMemory {
        let now = Utc::now();
        SummaryMemory {
            id: "mem_1".into(),
            agent_id: "jarvis".into(),
            user_id: "axin".into(),
            content: "用户喜欢原味咖啡".into(),
            memory_type: MemoryType::Fact,
            importance: 0.8,
            keywords: vec!["咖啡".into()],
            embedding: vec![0.1, 0.2],
            access_count: 0,
            last_accessed_at: now,
            is_protected: false,
            created_at: now,
            updated_at: now,
            expired_at: None,
            score: 0.0,
        }
    }

    #[test]
    fn test_encode_adds_type_tag() {
        let doc = encode(&memory(), "summary").unwrap();
        assert_eq!(doc.get("type"), Some(&json!("summary")));
        assert_eq!(doc.get("memory_type"), Some(&json!("fact")));
    }

    #[test]
    fn test_roundtrip() {
        let doc = encode(&memory(), "summary").unwrap();
        let back: SummaryMemory = decode(doc).unwrap();
        assert_eq!(back.id, "mem_1");
        assert_eq!(back.embedding, vec![0.1, 0.2]);
    }

    #[test]
    fn test_decode_scored() {
        let mut doc = encode(&memory(), "summary").unwrap();
        doc.insert("_score".to_string(), json!(0.92));
        let back: SummaryMemory = decode_scored(doc).unwrap();
        assert!((back.score - 0.92).abs() < 1e-9);
    }

    #[test]
    fn test_decode_event_from_loose_doc() {
        let doc: Document = serde_json::from_value(json!({
            "id": "evt_1",
            "agent_id": "a",
            "user_id": "u",
            "trigger_word": "去了",
            "argument1": "用户",
            "argument2": "星巴克",
            "embedding": [0.5, 0.5],
            "access_count": 3,
            "last_accessed_at": "2024-06-01 10:00:00",
            "created_at": "2024-06-01"
        }))
        .unwrap();
        let event: EventTriplet = decode(doc).unwrap();
        assert_eq!(event.argument2, "星巴克");
        assert_eq!(event.access_count, 3);
    }

    #[test]
    fn test_embedding_to_f32() {
        assert_eq!(embedding_to_f32(&json!([0.25, 1.0])), Some(vec![0.25, 1.0]));
        assert_eq!(embedding_to_f32(&json!("not an array")), None);
        assert_eq!(embedding_to_f32(&json!([1.0, "x"])), None);
    }

    #[test]
    fn test_decode_schema_mismatch() {
        let doc: Document = serde_json::from_value(json!({"id": "mem_1"})).unwrap();
        assert!(matches!(
            decode::<SummaryMemory>(doc),
            Err(StoreError::Schema(_))
        ));
    }
}
