//! Summary-memory extraction: distilled facts and working memories.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use memoria_llm::LlmFacade;
use memoria_store::{encode, VectorStore};
use memoria_types::{new_id, MemoryType, SummaryMemory, MEMORY_PREFIX, PROTECTED_IMPORTANCE};

use crate::context::{WriteContext, WriteHandler};
use crate::handlers::{cancellable, DOC_SUMMARY};
use crate::util::{language_name, prompt_input};

#[derive(Debug, Deserialize)]
struct ExtractedMemory {
    content: String,
    #[serde(default)]
    importance: f64,
    #[serde(default)]
    memory_type: String,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MemoryExtractOutput {
    #[serde(default)]
    memories: Vec<ExtractedMemory>,
}

/// Distills the conversation into typed, importance-scored memories.
///
/// An extraction failure here is local: the pipeline proceeds without
/// memories. Per-memory persistence failures skip that memory.
pub struct MemoryExtraction {
    llm: LlmFacade,
    vector: Arc<dyn VectorStore>,
}

impl MemoryExtraction {
    pub fn new(llm: LlmFacade, vector: Arc<dyn VectorStore>) -> Self {
        Self { llm, vector }
    }
}

#[async_trait]
impl WriteHandler for MemoryExtraction {
    fn name(&self) -> &'static str {
        "memory_extract"
    }

    async fn handle(&self, ctx: &mut WriteContext) {
        if ctx.messages.is_empty() {
            ctx.next().await;
            return;
        }

        let token = ctx.cancellation.clone();
        let input = prompt_input([
            ("conversation", json!(ctx.messages.format())),
            ("language", json!(language_name(&ctx.language))),
        ]);

        let output = match cancellable(
            &token,
            self.llm
                .generate::<MemoryExtractOutput>("memory_extract", &input),
        )
        .await
        {
            Err(cancelled) => {
                ctx.set_error(cancelled);
                return;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "memory extraction failed");
                ctx.next().await;
                return;
            }
            Ok(Ok((output, usage))) => {
                ctx.add_usage(self.name(), usage);
                output
            }
        };

        let now = Utc::now();
        for raw in output.memories {
            let embedding = match cancellable(&token, self.llm.embed(&raw.content)).await {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "failed to embed memory");
                    continue;
                }
                Ok(Ok(embedding)) => embedding,
            };

            let importance = raw.importance.clamp(0.0, 1.0);
            let memory = SummaryMemory {
                id: new_id(MEMORY_PREFIX),
                agent_id: ctx.agent_id.clone(),
                user_id: ctx.user_id.clone(),
                content: raw.content,
                memory_type: match raw.memory_type.as_str() {
                    "fact" => MemoryType::Fact,
                    _ => MemoryType::Working,
                },
                importance,
                keywords: raw.keywords,
                embedding,
                access_count: 0,
                last_accessed_at: now,
                is_protected: importance >= PROTECTED_IMPORTANCE,
                created_at: now,
                updated_at: now,
                expired_at: None,
                score: 0.0,
            };

            let doc = match encode(&memory, DOC_SUMMARY) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(id = %memory.id, error = %e, "failed to encode memory");
                    continue;
                }
            };
            match cancellable(&token, self.vector.store(&memory.id, doc)).await {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => {
                    warn!(id = %memory.id, error = %e, "failed to store memory");
                    continue;
                }
                Ok(Ok(())) => {}
            }

            ctx.memories.push(memory);
        }

        info!(memories = ctx.memories.len(), "memory extraction completed");
        ctx.next().await;
    }
}
