//! Consistency check: expire older facts contradicted by new ones.
//!
//! Runs as a fire-and-forget task on the server-scoped cancellation token,
//! so a caller hanging up cannot cut conflict resolution short but a server
//! shutdown still does. Never blocks the response, never retries, and
//! swallows every failure beyond logging.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use memoria_store::{decode, Document, SearchQuery, VectorStore};
use memoria_types::{MemoryType, SummaryMemory};

use crate::context::{WriteContext, WriteHandler};
use crate::handlers::DOC_SUMMARY;

/// Importance at or above which a new fact triggers conflict detection.
pub const CONFLICT_IMPORTANCE: f64 = 0.7;

/// Similarity score at or above which an existing fact counts as a conflict.
pub const CONFLICT_SCORE: f64 = 0.8;

/// Schedules asynchronous conflict detection for high-importance facts.
pub struct ConsistencyCheck {
    vector: Arc<dyn VectorStore>,
    server_scope: CancellationToken,
}

impl ConsistencyCheck {
    pub fn new(vector: Arc<dyn VectorStore>, server_scope: CancellationToken) -> Self {
        Self {
            vector,
            server_scope,
        }
    }
}

#[async_trait]
impl WriteHandler for ConsistencyCheck {
    fn name(&self) -> &'static str {
        "consistency"
    }

    async fn handle(&self, ctx: &mut WriteContext) {
        let high_importance: Vec<SummaryMemory> = ctx
            .memories
            .iter()
            .filter(|m| m.memory_type == MemoryType::Fact && m.importance >= CONFLICT_IMPORTANCE)
            .cloned()
            .collect();

        if high_importance.is_empty() {
            ctx.next().await;
            return;
        }

        let vector = Arc::clone(&self.vector);
        let scope = self.server_scope.clone();
        let agent_id = ctx.agent_id.clone();
        let user_id = ctx.user_id.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = scope.cancelled() => {}
                _ = detect_conflicts(vector, agent_id, user_id, high_importance) => {}
            }
        });

        ctx.next().await;
    }
}

async fn detect_conflicts(
    vector: Arc<dyn VectorStore>,
    agent_id: String,
    user_id: String,
    new_facts: Vec<SummaryMemory>,
) {
    for new_fact in new_facts {
        if new_fact.embedding.is_empty() {
            continue;
        }

        let query = SearchQuery::new()
            .with_filter("type", DOC_SUMMARY)
            .with_filter("memory_type", MemoryType::Fact.as_str())
            .with_filter("agent_id", agent_id.as_str())
            .with_filter("user_id", user_id.as_str())
            .with_embedding(new_fact.embedding.clone())
            .with_score_threshold(CONFLICT_SCORE)
            .with_limit(5);

        let hits = match vector.search(query).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "conflict search failed");
                continue;
            }
        };

        for hit in hits {
            let existing: SummaryMemory = match decode(hit) {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(error = %e, "failed to decode conflicting fact");
                    continue;
                }
            };

            if existing.id == new_fact.id || existing.expired_at.is_some() {
                continue;
            }

            info!(
                new_id = %new_fact.id,
                old_id = %existing.id,
                new_content = %new_fact.content,
                old_content = %existing.content,
                "conflict detected"
            );

            let mut fields = Document::new();
            fields.insert("expired_at".into(), json!(Utc::now().to_rfc3339()));
            if let Err(e) = vector.update_fields(&existing.id, fields).await {
                warn!(id = %existing.id, error = %e, "failed to expire old fact");
            }
        }
    }
}
