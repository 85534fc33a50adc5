//! Request and response types for the four external memory operations.

use serde::{Deserialize, Serialize};

use crate::memory::{
    Edge, Entity, Episode, EventRelation, EventTriplet, Summary, SummaryMemory,
};
use crate::message::{Message, Messages};

/// Token usage reported per pipeline handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Add
// ─────────────────────────────────────────────────────────────────────────────

/// Request to ingest dialog turns into memory.
///
/// `agent_id` / `user_id` may be empty, in which case they are inferred from
/// the first named assistant/user message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddRequest {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    pub messages: Vec<Message>,
}

/// Everything produced by one write-pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episodes: Vec<Episode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summaries: Vec<Summary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memories: Vec<SummaryMemory>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventTriplet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_relations: Vec<EventRelation>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Retrieve
// ─────────────────────────────────────────────────────────────────────────────

/// Per-bucket token overrides for retrieval.
///
/// For each bucket: negative disables it, zero keeps the default share,
/// positive overrides the quota in tokens.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RetrieveOptions {
    /// Total token budget. Absent means the default of 2000; an explicit
    /// zero or negative value disables every bucket.
    #[serde(default)]
    pub max_tokens: Option<i64>,
    /// Fact-bucket override (default 50% of the budget).
    #[serde(default)]
    pub max_facts: i64,
    /// Graph/event-bucket override (default 20%, floored at 400).
    #[serde(default)]
    pub max_graph: i64,
    /// Working-bucket override (default 30%).
    #[serde(default)]
    pub max_working: i64,
    /// Graph-expansion depth for entity anchoring; 0 disables expansion.
    #[serde(default)]
    pub max_hops: i64,
}

/// Request to retrieve a token-budgeted memory context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub agent_id: String,
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    pub query: String,
    /// Per-search hit limit; 0 means the default of 10.
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub options: RetrieveOptions,
}

/// Layered retrieval results plus the formatted context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facts: Vec<SummaryMemory>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub working: Vec<SummaryMemory>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventTriplet>,
    /// Entities reached by graph expansion when `max_hops > 0`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Messages::is_empty")]
    pub short_term: Messages,
    pub total: usize,
    /// Markdown memory context to prepend to an LLM prompt.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory_context: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Forget
// ─────────────────────────────────────────────────────────────────────────────

/// Request to run the forgetting job for one scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgetRequest {
    pub agent_id: String,
    pub user_id: String,
}

/// Counts removed by one forgetting run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ForgetResponse {
    pub success: bool,
    pub working_forgot: usize,
    pub events_forgot: usize,
    pub facts_expired: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_add() {
        let mut usage = TokenUsage::new(10, 5);
        usage.add(TokenUsage::new(3, 7));
        assert_eq!(usage, TokenUsage::new(13, 12));
    }

    #[test]
    fn test_retrieve_options_defaults() {
        let opts: RetrieveOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.max_tokens, None);
        assert_eq!(opts.max_facts, 0);
        assert_eq!(opts.max_hops, 0);
    }

    #[test]
    fn test_retrieve_options_explicit_zero_budget() {
        let opts: RetrieveOptions = serde_json::from_str("{\"max_tokens\": 0}").unwrap();
        assert_eq!(opts.max_tokens, Some(0));
    }

    #[test]
    fn test_add_request_infers_nothing_here() {
        let req: AddRequest = serde_json::from_value(serde_json::json!({
            "messages": [{"role": "user", "content": "hi", "name": "axin"}]
        }))
        .unwrap();
        assert!(req.agent_id.is_empty());
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn test_empty_response_serializes_lean() {
        let resp = RetrieveResponse {
            success: true,
            total: 0,
            ..Default::default()
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("facts").is_none());
        assert!(json.get("memory_context").is_none());
    }
}
