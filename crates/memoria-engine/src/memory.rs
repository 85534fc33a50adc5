//! The memory facade: the four operations transports call.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use memoria_llm::LlmFacade;
use memoria_store::{GraphStore, RelationStore, ShortTermStore, StoreError, VectorStore};
use memoria_types::id::{has_prefix, EVENT_PREFIX};
use memoria_types::{
    AddRequest, AddResponse, ForgetRequest, ForgetResponse, Messages, RetrieveRequest,
    RetrieveResponse,
};

use crate::chain::{ReadChain, WriteChain};
use crate::config::EngineConfig;
use crate::context::{ReadContext, WriteContext};
use crate::error::{EngineError, Result};
use crate::forgetting::ForgettingJob;
use crate::format::format_memory_context;
use crate::handlers::{
    CognitiveRetrieval, ConsistencyCheck, EntityExtraction, EpisodeStorage, EventExtraction,
    MemoryExtraction, ShortTermAppend, ShortTermRecall, TopicSummary,
};

/// Coordinates the write/read pipelines and the forgetting job over a fixed
/// set of injected stores.
///
/// Only `Validation` and `Cancelled` errors reach callers of `add` and
/// `retrieve`; every other failure degrades into partial results, because a
/// degraded memory beats failing the containing LLM call.
pub struct Memory {
    llm: LlmFacade,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    relation: Arc<dyn RelationStore>,
    short_term: Arc<ShortTermStore>,
    config: EngineConfig,
    /// Server-level scope for fire-and-forget tasks; cancelled on shutdown.
    server_scope: CancellationToken,
}

impl Memory {
    pub fn new(
        llm: LlmFacade,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        relation: Arc<dyn RelationStore>,
        config: EngineConfig,
    ) -> Self {
        let short_term = Arc::new(ShortTermStore::new(config.window_size));
        Self {
            llm,
            vector,
            graph,
            relation,
            short_term,
            config,
            server_scope: CancellationToken::new(),
        }
    }

    /// The server-level cancellation scope; cancel it on shutdown to stop
    /// in-flight background work.
    pub fn server_scope(&self) -> &CancellationToken {
        &self.server_scope
    }

    /// Ingest dialog turns through the write pipeline.
    pub async fn add(&self, cancellation: CancellationToken, req: AddRequest) -> Result<AddResponse> {
        let messages = Messages::from(req.messages);
        let (agent_id, user_id) = infer_scope(&req.agent_id, &req.user_id, &messages);

        info!(
            agent_id = %agent_id,
            user_id = %user_id,
            session_id = %req.session_id,
            message_count = messages.len(),
            "add"
        );

        // Nothing to ingest: succeed without touching the LLM or any store.
        if messages.is_empty() {
            return Ok(AddResponse {
                success: true,
                ..Default::default()
            });
        }

        let chain = WriteChain::new()
            .with(Arc::new(ShortTermAppend::new(Arc::clone(&self.short_term))))
            .with(Arc::new(EpisodeStorage::new(
                self.llm.clone(),
                Arc::clone(&self.vector),
            )))
            .with(Arc::new(EntityExtraction::new(
                self.llm.clone(),
                Arc::clone(&self.vector),
                Arc::clone(&self.graph),
            )))
            .with(Arc::new(MemoryExtraction::new(
                self.llm.clone(),
                Arc::clone(&self.vector),
            )))
            .with(Arc::new(EventExtraction::new(
                self.llm.clone(),
                Arc::clone(&self.vector),
                Arc::clone(&self.relation),
            )))
            .with(Arc::new(TopicSummary::new(
                self.llm.clone(),
                Arc::clone(&self.vector),
                self.config.topic_threshold,
            )))
            .with(Arc::new(ConsistencyCheck::new(
                Arc::clone(&self.vector),
                self.server_scope.clone(),
            )));

        let mut ctx = WriteContext::new(cancellation, agent_id, user_id, req.session_id);
        ctx.language = self.config.language.clone();
        ctx.messages = messages;

        match chain.run(&mut ctx).await {
            Ok(()) => {}
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(EngineError::Validation(msg)) => return Err(EngineError::Validation(msg)),
            Err(e) => {
                // Degraded write: report what the pipeline managed to produce.
                warn!(error = %e, "write pipeline degraded");
            }
        }

        let usage = ctx.tokens.total();
        info!(
            episodes = ctx.episodes.len(),
            entities = ctx.entities.len(),
            edges = ctx.edges.len(),
            memories = ctx.memories.len(),
            events = ctx.events.len(),
            relations = ctx.event_relations.len(),
            summaries = ctx.summaries.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "add completed"
        );

        Ok(AddResponse {
            success: true,
            episodes: ctx.episodes,
            entities: ctx.entities,
            edges: ctx.edges,
            summaries: ctx.summaries,
            memories: ctx.memories,
            events: ctx.events,
            event_relations: ctx.event_relations,
        })
    }

    /// Retrieve a token-budgeted memory context through the read pipeline.
    pub async fn retrieve(
        &self,
        cancellation: CancellationToken,
        req: RetrieveRequest,
    ) -> Result<RetrieveResponse> {
        if req.agent_id.is_empty() || req.user_id.is_empty() {
            return Err(EngineError::Validation(
                "agent_id and user_id are required".into(),
            ));
        }
        if req.query.is_empty() {
            return Err(EngineError::Validation("query is required".into()));
        }

        info!(
            agent_id = %req.agent_id,
            user_id = %req.user_id,
            query = %req.query,
            "retrieve"
        );

        let chain = ReadChain::new()
            .with(Arc::new(ShortTermRecall::new(Arc::clone(&self.short_term))))
            .with(Arc::new(CognitiveRetrieval::new(
                self.llm.clone(),
                Arc::clone(&self.vector),
                Arc::clone(&self.graph),
                self.server_scope.clone(),
            )));

        let mut ctx = ReadContext::new(
            cancellation,
            req.agent_id,
            req.user_id,
            req.session_id,
            req.query,
        );
        ctx.language = self.config.language.clone();
        ctx.limit = if req.limit > 0 {
            req.limit as usize
        } else {
            self.config.default_limit
        };
        ctx.options = req.options;

        match chain.run(&mut ctx).await {
            Ok(()) => {}
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(EngineError::Validation(msg)) => return Err(EngineError::Validation(msg)),
            Err(e) => warn!(error = %e, "read pipeline degraded"),
        }

        let memory_context = format_memory_context(&ctx);
        let total = ctx.total_results();

        info!(
            facts = ctx.facts.len(),
            working = ctx.working.len(),
            events = ctx.events.len(),
            entities = ctx.entities.len(),
            short_term = ctx.short_term.len(),
            total,
            "retrieve completed"
        );

        Ok(RetrieveResponse {
            success: true,
            facts: ctx.facts,
            working: ctx.working,
            events: ctx.events,
            entities: ctx.entities,
            short_term: ctx.short_term,
            total,
            memory_context,
        })
    }

    /// Run the forgetting job for a scope.
    pub async fn forget(&self, req: ForgetRequest) -> Result<ForgetResponse> {
        if req.agent_id.is_empty() || req.user_id.is_empty() {
            return Err(EngineError::Validation(
                "agent_id and user_id are required".into(),
            ));
        }

        let job = ForgettingJob::new(Arc::clone(&self.vector), Arc::clone(&self.relation));
        Ok(job.execute(&req.agent_id, &req.user_id).await)
    }

    /// Hard-delete one record by id.
    ///
    /// `evt_`-prefixed ids cascade into the relational store. Unknown ids
    /// surface `NotFound`.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(EngineError::Validation("id is required".into()));
        }

        info!(id, "delete");
        match self.vector.delete(id).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                return Err(EngineError::Store(StoreError::NotFound(id.to_string())));
            }
            Err(e) => return Err(e.into()),
        }

        if has_prefix(id, EVENT_PREFIX) {
            if let Err(e) = self.relation.delete_by_event_id(id).await {
                warn!(id, error = %e, "failed to cascade event relations");
            }
        }

        Ok(())
    }

    /// Drop a session's short-term window.
    pub fn clear_session(&self, agent_id: &str, user_id: &str, session_id: &str) {
        self.short_term.clear(agent_id, user_id, session_id);
    }
}

/// Infer missing scope ids from the first named user/assistant messages.
fn infer_scope(agent_id: &str, user_id: &str, messages: &Messages) -> (String, String) {
    let agent_id = if agent_id.is_empty() {
        messages.assistant_name()
    } else {
        agent_id.to_string()
    };
    let user_id = if user_id.is_empty() {
        messages.user_name()
    } else {
        user_id.to_string()
    };
    (agent_id, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_types::{Message, Role};

    #[test]
    fn test_infer_scope_from_messages() {
        let messages = Messages(vec![
            Message::new(Role::User, "axin", "hi"),
            Message::new(Role::Assistant, "jarvis", "hello"),
        ]);
        assert_eq!(
            infer_scope("", "", &messages),
            ("jarvis".to_string(), "axin".to_string())
        );
        assert_eq!(
            infer_scope("agent", "user1", &messages),
            ("agent".to_string(), "user1".to_string())
        );
    }

    #[test]
    fn test_infer_scope_fallback_literals() {
        let messages = Messages(vec![Message::new(Role::User, "", "hi")]);
        assert_eq!(
            infer_scope("", "", &messages),
            ("assistant".to_string(), "user".to_string())
        );
    }
}
