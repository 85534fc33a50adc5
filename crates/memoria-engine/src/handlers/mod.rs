//! Pipeline handlers for the write and read flows.

pub mod consistency;
pub mod episode;
pub mod event_extract;
pub mod extraction;
pub mod memory_extract;
pub mod retrieval;
pub mod short_term;
pub mod topic_summary;

pub use consistency::ConsistencyCheck;
pub use episode::EpisodeStorage;
pub use event_extract::EventExtraction;
pub use extraction::EntityExtraction;
pub use memory_extract::MemoryExtraction;
pub use retrieval::CognitiveRetrieval;
pub use short_term::{ShortTermAppend, ShortTermRecall};
pub use topic_summary::TopicSummary;

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};

/// Document `type` tags in the vector store.
pub const DOC_EPISODE: &str = "episode";
pub const DOC_ENTITY: &str = "entity";
pub const DOC_EDGE: &str = "edge";
pub const DOC_SUMMARY: &str = "summary";
pub const DOC_EVENT: &str = "event";

/// Graph label shared by all entity nodes.
pub const LABEL_ENTITY: &str = "Entity";

/// Scoped merge key for entity nodes: unique per `(agent, user, name)`.
pub fn entity_key(agent_id: &str, user_id: &str, name: &str) -> String {
    format!("{agent_id}:{user_id}:{name}")
}

/// Await a future unless the scope is cancelled first.
pub(crate) async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = T> + Send,
) -> Result<T> {
    tokio::select! {
        _ = token.cancelled() => Err(EngineError::Cancelled),
        result = fut => Ok(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellable_passes_result() {
        let token = CancellationToken::new();
        let value = cancellable(&token, async { 42 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_cancellable_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let err = cancellable(&token, std::future::pending::<()>()).await;
        assert!(matches!(err, Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_entity_key() {
        assert_eq!(entity_key("jarvis", "axin", "星巴克"), "jarvis:axin:星巴克");
    }
}
