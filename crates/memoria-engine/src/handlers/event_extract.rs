//! Event-triplet extraction plus causal/temporal relation persistence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use memoria_llm::LlmFacade;
use memoria_store::{encode, RelationStore, VectorStore};
use memoria_types::{
    new_id, EventRelation, EventTriplet, RelationType, EVENT_PREFIX, RELATION_PREFIX,
};

use crate::context::{WriteContext, WriteHandler};
use crate::handlers::{cancellable, DOC_EVENT};
use crate::util::{language_name, prompt_input};

#[derive(Debug, Deserialize)]
struct ExtractedEvent {
    trigger_word: String,
    argument1: String,
    #[serde(default)]
    argument2: String,
}

#[derive(Debug, Deserialize)]
struct ExtractedEventRelation {
    from_index: i64,
    to_index: i64,
    #[serde(default)]
    relation_type: String,
}

#[derive(Debug, Deserialize)]
struct EventExtractOutput {
    #[serde(default)]
    events: Vec<ExtractedEvent>,
    #[serde(default)]
    relations: Vec<ExtractedEventRelation>,
}

/// Extracts event triplets into the vector store and their relations into
/// the relational store.
///
/// Relations referencing out-of-range indices are dropped. The relational
/// upsert does not require the events to exist first.
pub struct EventExtraction {
    llm: LlmFacade,
    vector: Arc<dyn VectorStore>,
    relation: Arc<dyn RelationStore>,
}

impl EventExtraction {
    pub fn new(
        llm: LlmFacade,
        vector: Arc<dyn VectorStore>,
        relation: Arc<dyn RelationStore>,
    ) -> Self {
        Self {
            llm,
            vector,
            relation,
        }
    }
}

#[async_trait]
impl WriteHandler for EventExtraction {
    fn name(&self) -> &'static str {
        "event_extraction"
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
                .generate::<EventExtractOutput>("event_extract", &input),
        )
        .await
        {
            Err(cancelled) => {
                ctx.set_error(cancelled);
                return;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "event extraction failed");
                ctx.next().await;
                return;
            }
            Ok(Ok((output, usage))) => {
                ctx.add_usage(self.name(), usage);
                output
            }
        };

        if output.events.is_empty() {
            ctx.next().await;
            return;
        }

        let now = Utc::now();
        let mut event_ids = Vec::with_capacity(output.events.len());

        for raw in output.events {
            if token.is_cancelled() {
                ctx.set_error(crate::error::EngineError::Cancelled);
                return;
            }

            let mut event = EventTriplet {
                id: new_id(EVENT_PREFIX),
                agent_id: ctx.agent_id.clone(),
                user_id: ctx.user_id.clone(),
                trigger_word: raw.trigger_word,
                argument1: raw.argument1,
                argument2: raw.argument2,
                embedding: Vec::new(),
                access_count: 0,
                last_accessed_at: now,
                created_at: now,
                score: 0.0,
            };

            let text = format!(
                "{} {} {}",
                event.argument1, event.trigger_word, event.argument2
            );
            match cancellable(&token, self.llm.embed(&text)).await {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => warn!(error = %e, "failed to embed event trigger"),
                Ok(Ok(embedding)) => event.embedding = embedding,
            }

            match encode(&event, DOC_EVENT) {
                Ok(doc) => {
                    if let Ok(Err(e)) = cancellable(&token, self.vector.store(&event.id, doc)).await
                    {
                        warn!(id = %event.id, error = %e, "failed to store event");
                    }
                }
                Err(e) => warn!(id = %event.id, error = %e, "failed to encode event"),
            }

            event_ids.push(event.id.clone());
            ctx.events.push(event);
        }

        for raw in output.relations {
            let (Ok(from), Ok(to)) = (usize::try_from(raw.from_index), usize::try_from(raw.to_index))
            else {
                continue;
            };
            if from >= event_ids.len() || to >= event_ids.len() {
                continue;
            }
            let Some(relation_type) = RelationType::parse(&raw.relation_type) else {
                warn!(relation_type = %raw.relation_type, "unknown event relation type");
                continue;
            };

            let relation = EventRelation {
                id: new_id(RELATION_PREFIX),
                relation_type,
                from_event_id: event_ids[from].clone(),
                to_event_id: event_ids[to].clone(),
                created_at: now,
            };

            match cancellable(&token, self.relation.create_relation(&relation)).await {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "failed to store event relation");
                    continue;
                }
                Ok(Ok(())) => {}
            }

            ctx.event_relations.push(relation);
        }

        info!(
            events = ctx.events.len(),
            relations = ctx.event_relations.len(),
            "event extraction completed"
        );
        ctx.next().await;
    }
}
