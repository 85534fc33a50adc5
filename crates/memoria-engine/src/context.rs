//! Request-scoped pipeline contexts and the handler traits.
//!
//! A context carries the request's cancellation scope, its scope IDs, the
//! mutable input/output collections, a metadata map, a per-handler token
//! ledger, and the chain-control state (cursor, abort flag, sticky error).
//!
//! The runtime keeps a cursor that starts at −1; [`WriteContext::next`]
//! advances it and invokes handlers until the chain is aborted or done. A
//! handler may call `next` itself mid-logic to wrap the tail of the chain;
//! if it returns without doing so, the loop advances on its behalf.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use memoria_types::{
    Edge, Entity, Episode, EventRelation, EventTriplet, Messages, RetrieveOptions, Summary,
    SummaryMemory, TokenUsage,
};

use crate::error::EngineError;

/// Per-handler token usage ledger.
#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    usages: HashMap<String, TokenUsage>,
}

impl TokenLedger {
    /// Accumulate usage under a handler name.
    pub fn add(&mut self, handler: &str, usage: TokenUsage) {
        self.usages.entry(handler.to_string()).or_default().add(usage);
    }

    /// Usage recorded for one handler.
    pub fn get(&self, handler: &str) -> TokenUsage {
        self.usages.get(handler).copied().unwrap_or_default()
    }

    /// Sum of all per-handler entries.
    pub fn total(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for usage in self.usages.values() {
            total.add(*usage);
        }
        total
    }

    pub fn entries(&self) -> &HashMap<String, TokenUsage> {
        &self.usages
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Write pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// A stage of the write pipeline.
#[async_trait]
pub trait WriteHandler: Send + Sync {
    fn name(&self) -> &'static str;
    async fn handle(&self, ctx: &mut WriteContext);
}

/// Shared state for one write-pipeline run.
pub struct WriteContext {
    /// Request-scope cancellation; checked at every suspension point.
    pub cancellation: CancellationToken,

    pub agent_id: String,
    pub user_id: String,
    pub session_id: String,
    /// Language tag for prompt rendering (e.g. `zh_CN`).
    pub language: String,

    /// The dialog turns being ingested.
    pub messages: Messages,

    /// Outputs, filled stage by stage.
    pub episodes: Vec<Episode>,
    pub entities: Vec<Entity>,
    pub edges: Vec<Edge>,
    pub summaries: Vec<Summary>,
    pub memories: Vec<SummaryMemory>,
    pub events: Vec<EventTriplet>,
    pub event_relations: Vec<EventRelation>,

    pub metadata: HashMap<String, Value>,
    pub tokens: TokenLedger,

    handlers: Vec<Arc<dyn WriteHandler>>,
    cursor: i64,
    aborted: bool,
    error: Option<EngineError>,
}

impl WriteContext {
    pub fn new(
        cancellation: CancellationToken,
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            cancellation,
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            language: "zh_CN".to_string(),
            messages: Messages::default(),
            episodes: Vec::new(),
            entities: Vec::new(),
            edges: Vec::new(),
            summaries: Vec::new(),
            memories: Vec::new(),
            events: Vec::new(),
            event_relations: Vec::new(),
            metadata: HashMap::new(),
            tokens: TokenLedger::default(),
            handlers: Vec::new(),
            cursor: -1,
            aborted: false,
            error: None,
        }
    }

    /// Install the chain and reset the cursor. Called by the runtime.
    pub(crate) fn install(&mut self, handlers: Vec<Arc<dyn WriteHandler>>) {
        self.handlers = handlers;
        self.cursor = -1;
    }

    /// Advance the chain, invoking handlers until it is exhausted or
    /// aborted. Safe to call from inside a handler to wrap the tail.
    pub async fn next(&mut self) {
        self.cursor += 1;
        while (self.cursor as usize) < self.handlers.len() {
            if self.aborted {
                return;
            }
            let handler = Arc::clone(&self.handlers[self.cursor as usize]);
            handler.handle(self).await;
            self.cursor += 1;
        }
    }

    /// Stop the chain without recording an error.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Record a sticky error and abort the chain.
    pub fn set_error(&mut self, error: EngineError) {
        self.error = Some(error);
        self.aborted = true;
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }

    pub(crate) fn take_error(&mut self) -> Option<EngineError> {
        self.error.take()
    }

    /// Record token usage for a handler.
    pub fn add_usage(&mut self, handler: &str, usage: TokenUsage) {
        self.tokens.add(handler, usage);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Read pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// A stage of the read pipeline.
#[async_trait]
pub trait ReadHandler: Send + Sync {
    fn name(&self) -> &'static str;
    async fn handle(&self, ctx: &mut ReadContext);
}

/// Shared state for one read-pipeline run.
pub struct ReadContext {
    pub cancellation: CancellationToken,

    pub agent_id: String,
    pub user_id: String,
    pub session_id: String,
    pub language: String,

    pub query: String,
    /// Query embedding, filled by the retrieval stage.
    pub embedding: Vec<f32>,
    /// Per-search hit limit.
    pub limit: usize,
    pub options: RetrieveOptions,

    /// Results, layer by layer.
    pub facts: Vec<SummaryMemory>,
    pub working: Vec<SummaryMemory>,
    pub events: Vec<EventTriplet>,
    pub entities: Vec<Entity>,
    pub short_term: Messages,

    pub metadata: HashMap<String, Value>,
    pub tokens: TokenLedger,

    handlers: Vec<Arc<dyn ReadHandler>>,
    cursor: i64,
    aborted: bool,
    error: Option<EngineError>,
}

impl ReadContext {
    pub fn new(
        cancellation: CancellationToken,
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            cancellation,
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            language: "zh_CN".to_string(),
            query: query.into(),
            embedding: Vec::new(),
            limit: 10,
            options: RetrieveOptions::default(),
            facts: Vec::new(),
            working: Vec::new(),
            events: Vec::new(),
            entities: Vec::new(),
            short_term: Messages::default(),
            metadata: HashMap::new(),
            tokens: TokenLedger::default(),
            handlers: Vec::new(),
            cursor: -1,
            aborted: false,
            error: None,
        }
    }

    pub(crate) fn install(&mut self, handlers: Vec<Arc<dyn ReadHandler>>) {
        self.handlers = handlers;
        self.cursor = -1;
    }

    /// Advance the chain; see [`WriteContext::next`].
    pub async fn next(&mut self) {
        self.cursor += 1;
        while (self.cursor as usize) < self.handlers.len() {
            if self.aborted {
                return;
            }
            let handler = Arc::clone(&self.handlers[self.cursor as usize]);
            handler.handle(self).await;
            self.cursor += 1;
        }
    }

    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn set_error(&mut self, error: EngineError) {
        self.error = Some(error);
        self.aborted = true;
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }

    pub(crate) fn take_error(&mut self) -> Option<EngineError> {
        self.error.take()
    }

    pub fn add_usage(&mut self, handler: &str, usage: TokenUsage) {
        self.tokens.add(handler, usage);
    }

    /// Total result count across layers.
    pub fn total_results(&self) -> usize {
        self.facts.len()
            + self.working.len()
            + self.events.len()
            + self.entities.len()
            + self.short_term.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_totals_sum_entries() {
        let mut ledger = TokenLedger::default();
        ledger.add("episode_storage", TokenUsage::new(10, 5));
        ledger.add("episode_storage", TokenUsage::new(4, 1));
        ledger.add("extraction", TokenUsage::new(20, 8));

        assert_eq!(ledger.get("episode_storage"), TokenUsage::new(14, 6));
        assert_eq!(ledger.get("unknown"), TokenUsage::default());
        assert_eq!(ledger.total(), TokenUsage::new(34, 14));

        let entry_sum: u64 = ledger
            .entries()
            .values()
            .map(|u| u.input_tokens + u.output_tokens)
            .sum();
        let total = ledger.total();
        assert_eq!(entry_sum, total.input_tokens + total.output_tokens);
    }

    #[test]
    fn test_set_error_aborts() {
        let mut ctx = WriteContext::new(CancellationToken::new(), "a", "u", "s");
        assert!(!ctx.is_aborted());
        ctx.set_error(EngineError::Cancelled);
        assert!(ctx.is_aborted());
        assert!(ctx.error().unwrap().is_cancelled());
    }
}
