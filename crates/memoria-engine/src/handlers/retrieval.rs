//! Cognitive retrieval: 3-bucket token-budgeted recall.
//!
//! The token budget is split 50/20/30 across facts, events (the graph
//! bucket), and working memories, with the graph bucket floored at 400
//! tokens. The graph bucket fills first, then facts, then working; unused
//! capacity is redistributed into an extended fact pull. Results are always
//! cut at the bucket boundary, never split.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use memoria_llm::LlmFacade;
use memoria_store::{decode, decode_scored, Direction, Document, GraphStore, NodeRef,
    SearchQuery, VectorStore};
use memoria_types::{Entity, EventTriplet, MemoryType, RetrieveOptions, SummaryMemory};

use crate::context::{ReadContext, ReadHandler};
use crate::handlers::{cancellable, entity_key, DOC_ENTITY, DOC_EVENT, DOC_SUMMARY, LABEL_ENTITY};
use crate::util::estimate_tokens;

/// Default total token budget.
pub const DEFAULT_MAX_TOKENS: i64 = 2000;

/// Minimum graph-bucket quota unless the bucket is explicitly disabled.
pub const GRAPH_MIN_TOKENS: i64 = 400;

/// 3-bucket token budget with per-bucket usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub fact: i64,
    pub graph: i64,
    pub working: i64,
    pub fact_used: i64,
    pub graph_used: i64,
    pub working_used: i64,
}

impl TokenBudget {
    /// Resolve the budget from request options.
    ///
    /// An absent `max_tokens` means the 2000-token default; an explicit
    /// non-positive value zeroes every bucket. Per-bucket overrides:
    /// negative disables, zero keeps the share, positive replaces it.
    pub fn resolve(options: &RetrieveOptions) -> Self {
        let total = match options.max_tokens {
            None => DEFAULT_MAX_TOKENS,
            Some(t) if t > 0 => t,
            Some(_) => 0,
        };

        let (fact, graph, working) = if total == 0 {
            (0, 0, 0)
        } else {
            (
                total * 50 / 100,
                (total * 20 / 100).max(GRAPH_MIN_TOKENS),
                total * 30 / 100,
            )
        };

        Self {
            fact: apply_override(options.max_facts, fact),
            graph: apply_override(options.max_graph, graph),
            working: apply_override(options.max_working, working),
            fact_used: 0,
            graph_used: 0,
            working_used: 0,
        }
    }

    pub fn unused(&self) -> i64 {
        (self.fact - self.fact_used)
            + (self.graph - self.graph_used)
            + (self.working - self.working_used)
    }
}

fn apply_override(value: i64, default: i64) -> i64 {
    if value > 0 {
        value
    } else if value < 0 {
        0
    } else {
        default
    }
}

/// Fills the three buckets from the vector store and optionally expands
/// entities through the graph.
pub struct CognitiveRetrieval {
    llm: LlmFacade,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    server_scope: CancellationToken,
}

impl CognitiveRetrieval {
    pub fn new(
        llm: LlmFacade,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        server_scope: CancellationToken,
    ) -> Self {
        Self {
            llm,
            vector,
            graph,
            server_scope,
        }
    }

    fn scoped(&self, ctx: &ReadContext) -> SearchQuery {
        SearchQuery::new()
            .with_filter("agent_id", ctx.agent_id.as_str())
            .with_filter("user_id", ctx.user_id.as_str())
            .with_embedding(ctx.embedding.clone())
            .with_limit(ctx.limit)
    }

    /// Floor-fill the graph bucket with event triplets.
    async fn search_events(&self, ctx: &mut ReadContext, budget: &mut TokenBudget) {
        if budget.graph <= 0 {
            return;
        }

        let query = self.scoped(ctx).with_filter("type", DOC_EVENT);
        let docs = match self.vector.search(query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "event search failed");
                return;
            }
        };

        for doc in docs {
            let event: EventTriplet = match decode_scored(doc) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "failed to decode event");
                    continue;
                }
            };

            let text = format!(
                "{} {} {}",
                event.argument1, event.trigger_word, event.argument2
            );
            let tokens = estimate_tokens(&text);
            if budget.graph_used + tokens > budget.graph {
                break;
            }

            budget.graph_used += tokens;
            ctx.events.push(event);
        }
    }

    async fn search_memories(
        &self,
        ctx: &ReadContext,
        memory_type: MemoryType,
        quota: i64,
        used: &mut i64,
        out: &mut Vec<SummaryMemory>,
    ) {
        if quota <= 0 {
            return;
        }

        let query = self
            .scoped(ctx)
            .with_filter("type", DOC_SUMMARY)
            .with_filter("memory_type", memory_type.as_str())
            .without_field("expired_at");
        let docs = match self.vector.search(query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(memory_type = memory_type.as_str(), error = %e, "memory search failed");
                return;
            }
        };

        for doc in docs {
            let memory: SummaryMemory = match decode_scored(doc) {
                Ok(memory) => memory,
                Err(e) => {
                    warn!(error = %e, "failed to decode memory");
                    continue;
                }
            };

            let tokens = estimate_tokens(&memory.content);
            if *used + tokens > quota {
                break;
            }

            *used += tokens;
            out.push(memory);
        }
    }

    /// Spend leftover bucket capacity on additional facts not yet included.
    async fn redistribute_unused(&self, ctx: &mut ReadContext, budget: &TokenBudget) {
        let extra = budget.unused();
        if extra <= 0 || budget.fact - budget.fact_used <= 0 {
            return;
        }

        let query = self
            .scoped(ctx)
            .with_filter("type", DOC_SUMMARY)
            .with_filter("memory_type", MemoryType::Fact.as_str())
            .without_field("expired_at")
            .with_limit(ctx.limit * 2);
        let docs = match self.vector.search(query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "extended fact search failed");
                return;
            }
        };

        let seen: std::collections::HashSet<String> =
            ctx.facts.iter().map(|f| f.id.clone()).collect();

        let mut used = 0;
        for doc in docs {
            let memory: SummaryMemory = match decode_scored(doc) {
                Ok(memory) => memory,
                Err(_) => continue,
            };
            if seen.contains(&memory.id) {
                continue;
            }

            let tokens = estimate_tokens(&memory.content);
            if used + tokens > extra {
                break;
            }

            used += tokens;
            ctx.facts.push(memory);
        }
    }

    /// Anchor entities by vector similarity, then widen through the graph.
    async fn expand_graph(&self, ctx: &mut ReadContext) {
        let max_hops = ctx.options.max_hops;
        if max_hops <= 0 {
            return;
        }

        let query = self
            .scoped(ctx)
            .with_filter("type", DOC_ENTITY)
            .with_limit(5);
        let anchors = match self.vector.search(query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "entity anchor search failed");
                return;
            }
        };

        let mut seen = std::collections::HashSet::new();
        for doc in anchors {
            let anchor: Entity = match decode_scored(doc) {
                Ok(entity) => entity,
                Err(_) => continue,
            };

            let start = NodeRef::new(
                LABEL_ENTITY,
                "key",
                entity_key(&ctx.agent_id, &ctx.user_id, &anchor.name),
            );
            let related = match self
                .graph
                .traverse(start, &[], Direction::Both, max_hops as usize, ctx.limit)
                .await
            {
                Ok(nodes) => nodes,
                Err(e) => {
                    warn!(anchor = %anchor.name, error = %e, "graph expansion failed");
                    Vec::new()
                }
            };

            if seen.insert(anchor.id.clone()) {
                ctx.entities.push(anchor);
            }
            for node in related {
                if let Ok(entity) = decode::<Entity>(node) {
                    if seen.insert(entity.id.clone()) {
                        ctx.entities.push(entity);
                    }
                }
            }
        }
    }

    /// Bump access stats on everything returned, off the request path.
    fn spawn_access_stats(&self, ctx: &ReadContext) {
        let mut updates: Vec<(String, u64)> = Vec::new();
        for memory in ctx.facts.iter().chain(ctx.working.iter()) {
            updates.push((memory.id.clone(), memory.access_count));
        }
        for event in &ctx.events {
            updates.push((event.id.clone(), event.access_count));
        }
        if updates.is_empty() {
            return;
        }

        let vector = Arc::clone(&self.vector);
        let scope = self.server_scope.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = scope.cancelled() => {}
                _ = async move {
                    let now = Utc::now().to_rfc3339();
                    for (id, access_count) in updates {
                        let mut fields = Document::new();
                        fields.insert("access_count".into(), json!(access_count + 1));
                        fields.insert("last_accessed_at".into(), json!(now.clone()));
                        if let Err(e) = vector.update_fields(&id, fields).await {
                            warn!(id = %id, error = %e, "failed to update access stats");
                        }
                    }
                } => {}
            }
        });
    }
}

#[async_trait]
impl ReadHandler for CognitiveRetrieval {
    fn name(&self) -> &'static str {
        "cognitive_retrieval"
    }

    async fn handle(&self, ctx: &mut ReadContext) {
        info!(query = %ctx.query, limit = ctx.limit, "cognitive retrieval");

        let token = ctx.cancellation.clone();
        match cancellable(&token, self.llm.embed(&ctx.query)).await {
            Err(cancelled) => {
                ctx.set_error(cancelled);
                return;
            }
            Ok(Err(e)) => {
                // Degrade to short-term-only rather than failing the read.
                warn!(error = %e, "failed to embed query");
                ctx.next().await;
                return;
            }
            Ok(Ok(embedding)) => ctx.embedding = embedding,
        }

        let mut budget = TokenBudget::resolve(&ctx.options);

        // Graph bucket is floor-filled first, then greedy priority order.
        self.search_events(ctx, &mut budget).await;

        let (fact_quota, working_quota) = (budget.fact, budget.working);
        let mut fact_used = 0;
        let mut facts = Vec::new();
        self.search_memories(ctx, MemoryType::Fact, fact_quota, &mut fact_used, &mut facts)
            .await;
        budget.fact_used = fact_used;
        ctx.facts = facts;

        let mut working_used = 0;
        let mut working = Vec::new();
        self.search_memories(
            ctx,
            MemoryType::Working,
            working_quota,
            &mut working_used,
            &mut working,
        )
        .await;
        budget.working_used = working_used;
        ctx.working = working;

        self.redistribute_unused(ctx, &budget).await;
        self.expand_graph(ctx).await;
        self.spawn_access_stats(ctx);

        info!(
            facts = ctx.facts.len(),
            working = ctx.working.len(),
            events = ctx.events.len(),
            tokens_fact = budget.fact_used,
            tokens_graph = budget.graph_used,
            tokens_working = budget.working_used,
            "cognitive retrieval completed"
        );

        ctx.next().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(max_tokens: Option<i64>, facts: i64, graph: i64, working: i64) -> RetrieveOptions {
        RetrieveOptions {
            max_tokens,
            max_facts: facts,
            max_graph: graph,
            max_working: working,
            max_hops: 0,
        }
    }

    #[test]
    fn test_default_budget() {
        let budget = TokenBudget::resolve(&options(None, 0, 0, 0));
        assert_eq!((budget.fact, budget.graph, budget.working), (1000, 400, 600));
    }

    #[test]
    fn test_graph_floor() {
        // 20% of 1000 is 200, floored to 400.
        let budget = TokenBudget::resolve(&options(Some(1000), 0, 0, 0));
        assert_eq!(budget.graph, GRAPH_MIN_TOKENS);
        assert_eq!(budget.fact, 500);
        assert_eq!(budget.working, 300);
    }

    #[test]
    fn test_explicit_zero_total_disables_everything() {
        let budget = TokenBudget::resolve(&options(Some(0), 0, 0, 0));
        assert_eq!((budget.fact, budget.graph, budget.working), (0, 0, 0));
    }

    #[test]
    fn test_negative_override_disables_bucket() {
        let budget = TokenBudget::resolve(&options(None, -1, -1, -1));
        assert_eq!((budget.fact, budget.graph, budget.working), (0, 0, 0));
    }

    #[test]
    fn test_positive_override_replaces_share() {
        let budget = TokenBudget::resolve(&options(None, 1200, 0, 100));
        assert_eq!(budget.fact, 1200);
        assert_eq!(budget.graph, 400);
        assert_eq!(budget.working, 100);
    }

    #[test]
    fn test_unused_accounting() {
        let mut budget = TokenBudget::resolve(&options(None, 0, 0, 0));
        budget.fact_used = 900;
        budget.graph_used = 400;
        budget.working_used = 100;
        assert_eq!(budget.unused(), 100 + 0 + 500);
    }
}
