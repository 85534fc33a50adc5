//! Typed record identifiers.
//!
//! Every persisted record carries an opaque string id with a short prefix
//! naming its kind, e.g. `ep_1a2b3c4d`. The prefix makes ids self-describing
//! in logs and lets the delete path route cascades by kind.

use uuid::Uuid;

/// Prefix for dialog-turn episodes.
pub const EPISODE_PREFIX: &str = "ep";
/// Prefix for graph entities.
pub const ENTITY_PREFIX: &str = "ent";
/// Prefix for entity-to-entity edges.
pub const EDGE_PREFIX: &str = "edge";
/// Prefix for distilled summary memories.
pub const MEMORY_PREFIX: &str = "mem";
/// Prefix for event triplets.
pub const EVENT_PREFIX: &str = "evt";
/// Prefix for event relations.
pub const RELATION_PREFIX: &str = "rel";
/// Prefix for consolidated episode summaries.
pub const SUMMARY_PREFIX: &str = "sum";

/// Generate a fresh id for the given kind prefix.
///
/// Uses the first 8 hex characters of a v4 UUID, which is enough entropy for
/// per-scope uniqueness while keeping ids log-friendly.
pub fn new_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &uuid[..8])
}

/// Returns true if the id carries the given kind prefix.
pub fn has_prefix(id: &str, prefix: &str) -> bool {
    id.starts_with(prefix) && id.as_bytes().get(prefix.len()) == Some(&b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_shape() {
        let id = new_id(EPISODE_PREFIX);
        assert!(id.starts_with("ep_"));
        assert_eq!(id.len(), "ep_".len() + 8);
    }

    #[test]
    fn test_new_id_unique() {
        let a = new_id(MEMORY_PREFIX);
        let b = new_id(MEMORY_PREFIX);
        assert_ne!(a, b);
    }

    #[test]
    fn test_has_prefix() {
        assert!(has_prefix("evt_12345678", EVENT_PREFIX));
        assert!(!has_prefix("event_12345678", EVENT_PREFIX));
        assert!(!has_prefix("evt", EVENT_PREFIX));
        assert!(!has_prefix("ent_12345678", EVENT_PREFIX));
    }
}
