//! Episode storage: one vector-store document per dialog turn.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use memoria_llm::LlmFacade;
use memoria_store::{encode, VectorStore};
use memoria_types::{new_id, Episode, EPISODE_PREFIX};

use crate::context::{WriteContext, WriteHandler};
use crate::handlers::{cancellable, DOC_EPISODE};
use crate::util::{language_name, prompt_input};

/// Output of the `topic` prompt.
#[derive(Debug, Deserialize)]
struct TopicOutput {
    topic: String,
}

/// Stores each request message as an episode with content and topic
/// embeddings.
///
/// Per-message failures (embedding, topic generation, persistence) drop that
/// message with a warning; cancellation aborts the whole pipeline.
pub struct EpisodeStorage {
    llm: LlmFacade,
    vector: Arc<dyn VectorStore>,
}

impl EpisodeStorage {
    pub fn new(llm: LlmFacade, vector: Arc<dyn VectorStore>) -> Self {
        Self { llm, vector }
    }
}

#[async_trait]
impl WriteHandler for EpisodeStorage {
    fn name(&self) -> &'static str {
        "episode_storage"
    }

    async fn handle(&self, ctx: &mut WriteContext) {
        if ctx.messages.is_empty() {
            ctx.next().await;
            return;
        }

        info!(
            session_id = %ctx.session_id,
            message_count = ctx.messages.len(),
            "storing episodes"
        );

        let token = ctx.cancellation.clone();
        let language = ctx.language.clone();
        let now = Utc::now();
        let messages: Vec<_> = ctx.messages.iter().cloned().collect();

        for (index, msg) in messages.into_iter().enumerate() {
            if token.is_cancelled() {
                ctx.set_error(crate::error::EngineError::Cancelled);
                return;
            }

            let embedding = match cancellable(&token, self.llm.embed(&msg.content)).await {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => {
                    warn!(index, error = %e, "failed to embed message");
                    continue;
                }
                Ok(Ok(embedding)) => embedding,
            };

            let input = prompt_input([
                ("content", json!(msg.content)),
                ("language", json!(language_name(&language))),
            ]);
            let topic = match cancellable(&token, self.llm.generate::<TopicOutput>("topic", &input))
                .await
            {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => {
                    warn!(index, error = %e, "failed to generate topic");
                    continue;
                }
                Ok(Ok((output, usage))) => {
                    ctx.add_usage(self.name(), usage);
                    output.topic
                }
            };

            let topic_embedding = match cancellable(&token, self.llm.embed(&topic)).await {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => {
                    warn!(index, error = %e, "failed to embed topic");
                    continue;
                }
                Ok(Ok(embedding)) => embedding,
            };

            let episode = Episode {
                id: new_id(EPISODE_PREFIX),
                agent_id: ctx.agent_id.clone(),
                user_id: ctx.user_id.clone(),
                session_id: ctx.session_id.clone(),
                role: msg.role.as_str().to_string(),
                name: msg.name.clone(),
                topic,
                topic_embedding,
                content: msg.content.clone(),
                embedding,
                timestamp: now,
                created_at: now,
                score: 0.0,
            };

            let doc = match encode(&episode, DOC_EPISODE) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(index, error = %e, "failed to encode episode");
                    continue;
                }
            };
            match cancellable(&token, self.vector.store(&episode.id, doc)).await {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => {
                    warn!(index, id = %episode.id, error = %e, "failed to store episode");
                    continue;
                }
                Ok(Ok(())) => {}
            }

            ctx.episodes.push(episode);
        }

        info!(count = ctx.episodes.len(), "episodes stored");
        ctx.next().await;
    }
}
