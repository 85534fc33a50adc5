//! Stored record shapes for the layered memory model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Messages;
use crate::time::{flexible, flexible_opt};

fn is_zero(score: &f64) -> bool {
    *score == 0.0
}

// ─────────────────────────────────────────────────────────────────────────────
// Episode
// ─────────────────────────────────────────────────────────────────────────────

/// One verbatim dialog turn, stored in the vector store.
///
/// Immutable after ingest except for `score`, which is filled transiently at
/// query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub agent_id: String,
    pub user_id: String,
    pub session_id: String,

    /// Speaker role (`user` / `assistant` / `system`).
    pub role: String,
    /// Speaker name.
    #[serde(default)]
    pub name: String,

    /// Derived topic label (2-4 characters/words).
    #[serde(default)]
    pub topic: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topic_embedding: Vec<f32>,

    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,

    /// Conversation time.
    #[serde(with = "flexible")]
    pub timestamp: DateTime<Utc>,
    /// Ingest time.
    #[serde(with = "flexible")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub score: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a noun extracted from dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Place,
    Thing,
    Event,
    Emotion,
    Activity,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Place => "place",
            EntityType::Thing => "thing",
            EntityType::Event => "event",
            EntityType::Emotion => "emotion",
            EntityType::Activity => "activity",
        }
    }

    /// Parse an LLM-provided type string, treating anything unrecognized as
    /// `thing`.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "person" => EntityType::Person,
            "place" => EntityType::Place,
            "event" => EntityType::Event,
            "emotion" => EntityType::Emotion,
            "activity" => EntityType::Activity,
            _ => EntityType::Thing,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A noun in the knowledge graph, keyed by name within its scope.
///
/// Re-extraction updates the description and timestamps but never the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub agent_id: String,
    pub user_id: String,
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub description: String,

    /// Embedding of `name + " " + description`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,

    #[serde(with = "flexible")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "flexible")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub score: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Edge
// ─────────────────────────────────────────────────────────────────────────────

/// A directed fact between two entities, bi-temporal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    /// Predicate, e.g. `喜欢` / `住在`.
    pub relation: String,
    /// Free-text statement of the fact.
    pub fact: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,

    /// When the fact became true in the real world.
    #[serde(default, with = "flexible_opt", skip_serializing_if = "Option::is_none")]
    pub valid_at: Option<DateTime<Utc>>,
    /// When the fact stopped being true in the real world.
    #[serde(default, with = "flexible_opt", skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<DateTime<Utc>>,

    #[serde(with = "flexible")]
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker set when a newer fact supersedes this one.
    #[serde(default, with = "flexible_opt", skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,

    /// Episodes this fact was extracted from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episode_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub score: f64,
}

impl Edge {
    /// Whether the fact holds at instant `at`.
    ///
    /// Holds when `at` falls inside the `[valid_at, invalid_at]` window
    /// (either end open when absent) and the record has not been expired by
    /// conflict resolution.
    pub fn is_valid(&self, at: DateTime<Utc>) -> bool {
        if self.expired_at.is_some() {
            return false;
        }
        if let Some(valid_at) = self.valid_at {
            if at < valid_at {
                return false;
            }
        }
        if let Some(invalid_at) = self.invalid_at {
            if at > invalid_at {
                return false;
            }
        }
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Summary (consolidated episode digest)
// ─────────────────────────────────────────────────────────────────────────────

/// A free-text digest of a run of episodes, produced on topic change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub agent_id: String,
    pub user_id: String,
    /// Episodes covered by this digest.
    #[serde(default)]
    pub episode_ids: Vec<String>,
    /// Topic label of the first covered episode.
    #[serde(default)]
    pub topic: String,
    pub content: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,

    #[serde(with = "flexible")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "flexible")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub score: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Summary memory (distilled fact / working memory)
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a distilled summary memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Durable user-level fact.
    Fact,
    /// Task-scoped working memory, subject to forgetting.
    Working,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::Working => "working",
        }
    }
}

/// Importance at or above which a memory becomes protected from forgetting.
pub const PROTECTED_IMPORTANCE: f64 = 0.9;

/// A distilled, typed, importance-scored user-level memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryMemory {
    pub id: String,
    pub agent_id: String,
    pub user_id: String,
    pub content: String,
    pub memory_type: MemoryType,
    /// Importance in `[0, 1]`.
    pub importance: f64,
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,

    #[serde(default)]
    pub access_count: u64,
    #[serde(with = "flexible")]
    pub last_accessed_at: DateTime<Utc>,

    /// Protected rows are never removed by the forgetting job.
    #[serde(default)]
    pub is_protected: bool,

    #[serde(with = "flexible")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "flexible")]
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker set by conflict resolution.
    #[serde(default, with = "flexible_opt", skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub score: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Event triplet & relation
// ─────────────────────────────────────────────────────────────────────────────

/// A predicate-argument structure extracted from dialog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTriplet {
    pub id: String,
    pub agent_id: String,
    pub user_id: String,
    /// The verb.
    pub trigger_word: String,
    /// Subject.
    pub argument1: String,
    /// Object.
    #[serde(default)]
    pub argument2: String,

    /// Embedding of `argument1 + " " + trigger_word + " " + argument2`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,

    #[serde(default)]
    pub access_count: u64,
    #[serde(with = "flexible")]
    pub last_accessed_at: DateTime<Utc>,
    #[serde(with = "flexible")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub score: f64,
}

/// Kind of a link between two event triplets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Causal,
    Temporal,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Causal => "causal",
            RelationType::Temporal => "temporal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "causal" => Some(RelationType::Causal),
            "temporal" => Some(RelationType::Temporal),
            _ => None,
        }
    }
}

/// A directed causal/temporal link between two event triplets.
///
/// `(from_event_id, to_event_id, relation_type)` is unique in the relational
/// store; re-inserts overwrite `id` and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRelation {
    pub id: String,
    pub relation_type: RelationType,
    pub from_event_id: String,
    pub to_event_id: String,
    #[serde(with = "flexible")]
    pub created_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Short-term window
// ─────────────────────────────────────────────────────────────────────────────

/// Per-(agent, user, session) sliding window of recent messages.
///
/// Lives in process memory only; not persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortTermWindow {
    pub agent_id: String,
    pub user_id: String,
    pub session_id: String,
    pub messages: Messages,
    #[serde(with = "flexible")]
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn edge(valid: Option<i64>, invalid: Option<i64>, expired: bool) -> Edge {
        let base = Utc::now();
        Edge {
            id: "edge_1".into(),
            source_id: "ent_1".into(),
            target_id: "ent_2".into(),
            relation: "喜欢".into(),
            fact: "用户喜欢咖啡".into(),
            embedding: vec![],
            valid_at: valid.map(|d| base + Duration::days(d)),
            invalid_at: invalid.map(|d| base + Duration::days(d)),
            created_at: base,
            expired_at: expired.then_some(base),
            episode_ids: vec![],
            score: 0.0,
        }
    }

    #[test]
    fn test_edge_valid_open_window() {
        assert!(edge(None, None, false).is_valid(Utc::now()));
    }

    #[test]
    fn test_edge_valid_inside_window() {
        let e = edge(Some(-10), Some(10), false);
        assert!(e.is_valid(Utc::now()));
    }

    #[test]
    fn test_edge_invalid_before_valid_at() {
        let e = edge(Some(1), None, false);
        assert!(!e.is_valid(Utc::now()));
    }

    #[test]
    fn test_edge_invalid_after_invalid_at() {
        let e = edge(None, Some(-1), false);
        assert!(!e.is_valid(Utc::now()));
    }

    #[test]
    fn test_edge_expired_never_valid() {
        let e = edge(None, None, true);
        assert!(!e.is_valid(Utc::now()));
    }

    #[test]
    fn test_entity_type_parse_lossy() {
        assert_eq!(EntityType::parse_lossy("place"), EntityType::Place);
        assert_eq!(EntityType::parse_lossy("organization"), EntityType::Thing);
    }

    #[test]
    fn test_memory_type_serde() {
        let mt: MemoryType = serde_json::from_str("\"working\"").unwrap();
        assert_eq!(mt, MemoryType::Working);
        assert_eq!(serde_json::to_string(&MemoryType::Fact).unwrap(), "\"fact\"");
    }

    #[test]
    fn test_summary_memory_roundtrip_flexible_time() {
        let json = serde_json::json!({
            "id": "mem_1",
            "agent_id": "a",
            "user_id": "u",
            "content": "用户住在北京",
            "memory_type": "fact",
            "importance": 0.95,
            "keywords": ["住在"],
            "access_count": 2,
            "last_accessed_at": "2024-06-01 08:00:00",
            "is_protected": true,
            "created_at": "2024-06-01",
            "updated_at": "2024-06-01T08:00:00Z"
        });
        let mem: SummaryMemory = serde_json::from_value(json).unwrap();
        assert!(mem.is_protected);
        assert_eq!(mem.access_count, 2);
        assert!(mem.expired_at.is_none());
    }
}
