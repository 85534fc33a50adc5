//! Shared domain types for the memoria memory service.
//!
//! Every record in the system is scoped by an `(agent_id, user_id)` pair;
//! `session_id` additionally scopes short-term and episode data. The layered
//! model mirrors human memory:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Short-term window   — last N raw messages (in process)     │
//! │  Episodes            — verbatim dialog turns (vector store) │
//! │  Entities + Edges    — knowledge graph (graph store)        │
//! │  Summary memories    — distilled facts / working memories   │
//! │  Event triplets      — (subject, trigger, object)           │
//! │  Event relations     — causal/temporal links (relational)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All IDs are opaque strings with a typed prefix (`ep_`, `ent_`, `edge_`,
//! `mem_`, `evt_`, `rel_`, `sum_`), see [`id`].

pub mod api;
pub mod id;
pub mod memory;
pub mod message;
pub mod time;

pub use api::{
    AddRequest, AddResponse, ForgetRequest, ForgetResponse, RetrieveOptions, RetrieveRequest,
    RetrieveResponse, TokenUsage,
};
pub use id::{new_id, EDGE_PREFIX, ENTITY_PREFIX, EPISODE_PREFIX, EVENT_PREFIX, MEMORY_PREFIX,
    RELATION_PREFIX, SUMMARY_PREFIX};
pub use memory::{
    Edge, Entity, EntityType, Episode, EventRelation, EventTriplet, MemoryType, RelationType,
    ShortTermWindow, Summary, SummaryMemory, PROTECTED_IMPORTANCE,
};
pub use message::{Message, Messages, Role};
