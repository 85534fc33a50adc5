//! Entity and edge extraction into the knowledge graph.
//!
//! The graph store holds the primary copies; the vector store holds
//! searchable mirrors. A failed graph write drops the record, a failed
//! vector mirror is logged only.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use memoria_llm::LlmFacade;
use memoria_store::{encode, Document, GraphStore, NodeRef, VectorStore};
use memoria_types::time::parse_flexible;
use memoria_types::{new_id, Edge, Entity, EntityType, EDGE_PREFIX, ENTITY_PREFIX};

use crate::context::{WriteContext, WriteHandler};
use crate::error::EngineError;
use crate::handlers::{cancellable, entity_key, DOC_EDGE, DOC_ENTITY, LABEL_ENTITY};
use crate::util::{language_name, prompt_input};

#[derive(Debug, Deserialize)]
struct ExtractedEntity {
    name: String,
    #[serde(default, rename = "type")]
    entity_type: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ExtractedRelation {
    subject: String,
    predicate: String,
    object: String,
    #[serde(default)]
    fact: String,
}

#[derive(Debug, Deserialize)]
struct ExtractionOutput {
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
    #[serde(default)]
    relations: Vec<ExtractedRelation>,
}

/// Extracts entities and predicate edges from the conversation.
///
/// A failed extraction call fails the pipeline; everything downstream of it
/// is per-record and local.
pub struct EntityExtraction {
    llm: LlmFacade,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
}

impl EntityExtraction {
    pub fn new(llm: LlmFacade, vector: Arc<dyn VectorStore>, graph: Arc<dyn GraphStore>) -> Self {
        Self { llm, vector, graph }
    }

    /// Graph node properties for an entity, including the scoped merge key.
    fn node_properties(&self, entity: &Entity, session_id: &str) -> Document {
        let mut props = Document::new();
        props.insert("id".into(), json!(entity.id));
        props.insert("key".into(), json!(entity_key(&entity.agent_id, &entity.user_id, &entity.name)));
        props.insert("name".into(), json!(entity.name));
        props.insert("entity_type".into(), json!(entity.entity_type));
        props.insert("description".into(), json!(entity.description));
        props.insert("agent_id".into(), json!(entity.agent_id));
        props.insert("user_id".into(), json!(entity.user_id));
        props.insert("session_id".into(), json!(session_id));
        props.insert("created_at".into(), json!(entity.created_at.to_rfc3339()));
        props.insert("updated_at".into(), json!(entity.updated_at.to_rfc3339()));
        props
    }
}

#[async_trait]
impl WriteHandler for EntityExtraction {
    fn name(&self) -> &'static str {
        "extraction"
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

        let extracted = match cancellable(
            &token,
            self.llm.generate::<ExtractionOutput>("extraction", &input),
        )
        .await
        {
            Err(cancelled) => {
                ctx.set_error(cancelled);
                return;
            }
            Ok(Err(e)) => {
                // Extraction failure is global: the whole write aborts.
                warn!(error = %e, "extraction failed");
                ctx.set_error(EngineError::Llm(e));
                return;
            }
            Ok(Ok((output, usage))) => {
                ctx.add_usage(self.name(), usage);
                output
            }
        };

        let now = Utc::now();
        let episode_ids: Vec<String> = ctx.episodes.iter().map(|e| e.id.clone()).collect();

        // Build and persist entities; track the ones whose graph write
        // succeeded so edges only reference resolvable endpoints.
        let mut stored_by_name: HashMap<String, Entity> = HashMap::new();
        for raw in extracted.entities {
            let mut entity = Entity {
                id: new_id(ENTITY_PREFIX),
                agent_id: ctx.agent_id.clone(),
                user_id: ctx.user_id.clone(),
                name: raw.name,
                entity_type: EntityType::parse_lossy(&raw.entity_type),
                description: raw.description,
                embedding: Vec::new(),
                created_at: now,
                updated_at: now,
                score: 0.0,
            };

            let text = format!("{} {}", entity.name, entity.description);
            match cancellable(&token, self.llm.embed(&text)).await {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => warn!(name = %entity.name, error = %e, "failed to embed entity"),
                Ok(Ok(embedding)) => entity.embedding = embedding,
            }

            let key = entity_key(&ctx.agent_id, &ctx.user_id, &entity.name);

            // Re-extraction reuses the existing node's id and creation time;
            // only the description and updated_at move forward.
            match cancellable(
                &token,
                self.graph
                    .get_node(LABEL_ENTITY, "key", Value::String(key.clone())),
            )
            .await
            {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => warn!(name = %entity.name, error = %e, "failed to look up entity"),
                Ok(Ok(Some(existing))) => {
                    if let Some(id) = existing.get("id").and_then(Value::as_str) {
                        entity.id = id.to_string();
                    }
                    if let Some(created_at) = existing
                        .get("created_at")
                        .and_then(Value::as_str)
                        .and_then(parse_flexible)
                    {
                        entity.created_at = created_at;
                    }
                }
                Ok(Ok(None)) => {}
            }

            let labels = vec![
                LABEL_ENTITY.to_string(),
                entity.entity_type.as_str().to_string(),
            ];
            let merge = self.graph.merge_node(
                &labels,
                "key",
                Value::String(key),
                self.node_properties(&entity, &ctx.session_id),
            );
            match cancellable(&token, merge).await {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => {
                    warn!(id = %entity.id, error = %e, "failed to store entity to graph");
                    continue;
                }
                Ok(Ok(())) => {}
            }

            let mut doc = match encode(&entity, DOC_ENTITY) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(id = %entity.id, error = %e, "failed to encode entity");
                    continue;
                }
            };
            doc.insert("session_id".into(), json!(ctx.session_id));
            if let Ok(Err(e)) = cancellable(&token, self.vector.store(&entity.id, doc)).await {
                warn!(id = %entity.id, error = %e, "failed to mirror entity to vector store");
            }

            stored_by_name.insert(entity.name.clone(), entity.clone());
            ctx.entities.push(entity);
        }

        // Resolve relations against the stored entities; orphans are dropped.
        for raw in extracted.relations {
            let (Some(source), Some(target)) = (
                stored_by_name.get(&raw.subject),
                stored_by_name.get(&raw.object),
            ) else {
                warn!(subject = %raw.subject, object = %raw.object, "relation references unknown entity");
                continue;
            };

            let mut edge = Edge {
                id: new_id(EDGE_PREFIX),
                source_id: source.id.clone(),
                target_id: target.id.clone(),
                relation: raw.predicate,
                fact: raw.fact,
                embedding: Vec::new(),
                valid_at: None,
                invalid_at: None,
                created_at: now,
                expired_at: None,
                episode_ids: episode_ids.clone(),
                score: 0.0,
            };

            match cancellable(&token, self.llm.embed(&edge.fact)).await {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => warn!(fact = %edge.fact, error = %e, "failed to embed edge"),
                Ok(Ok(embedding)) => edge.embedding = embedding,
            }

            let mut rel_props = Document::new();
            rel_props.insert("id".into(), json!(edge.id));
            rel_props.insert("fact".into(), json!(edge.fact));
            rel_props.insert("episode_ids".into(), json!(edge.episode_ids));
            rel_props.insert("session_id".into(), json!(ctx.session_id));
            rel_props.insert("created_at".into(), json!(edge.created_at.to_rfc3339()));

            let source_ref = NodeRef::new(
                LABEL_ENTITY,
                "key",
                entity_key(&ctx.agent_id, &ctx.user_id, &source.name),
            );
            let target_ref = NodeRef::new(
                LABEL_ENTITY,
                "key",
                entity_key(&ctx.agent_id, &ctx.user_id, &target.name),
            );
            let write = self
                .graph
                .create_relationship(source_ref, target_ref, &edge.relation, rel_props);
            match cancellable(&token, write).await {
                Err(cancelled) => {
                    ctx.set_error(cancelled);
                    return;
                }
                Ok(Err(e)) => {
                    warn!(id = %edge.id, error = %e, "failed to store edge to graph");
                    continue;
                }
                Ok(Ok(())) => {}
            }

            let mut doc = match encode(&edge, DOC_EDGE) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(id = %edge.id, error = %e, "failed to encode edge");
                    continue;
                }
            };
            doc.insert("agent_id".into(), json!(ctx.agent_id));
            doc.insert("user_id".into(), json!(ctx.user_id));
            doc.insert("session_id".into(), json!(ctx.session_id));
            if let Ok(Err(e)) = cancellable(&token, self.vector.store(&edge.id, doc)).await {
                warn!(id = %edge.id, error = %e, "failed to mirror edge to vector store");
            }

            ctx.edges.push(edge);
        }

        info!(
            entities = ctx.entities.len(),
            edges = ctx.edges.len(),
            "extraction completed"
        );
        ctx.next().await;
    }
}
