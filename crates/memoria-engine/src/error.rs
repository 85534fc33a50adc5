//! Error types for the engine.

use thiserror::Error;

use memoria_llm::LlmError;
use memoria_store::StoreError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by pipelines and the facade.
///
/// Callers of the facade only ever see `Validation`, `Cancelled`, and (for
/// `delete`) `Store(NotFound)`; every other failure degrades into partial
/// results inside the pipelines.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required request field is missing or out of range.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The request's parent scope was cancelled.
    #[error("context cancelled")]
    Cancelled,

    /// LLM generation or embedding failed.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// A store adapter failed.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => EngineError::Cancelled,
            other => EngineError::Store(other),
        }
    }
}

impl EngineError {
    /// Whether this error must abort the pipeline and reach the caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_cancelled_maps_to_cancelled() {
        let err: EngineError = StoreError::Cancelled.into();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_store_other_stays_store() {
        let err: EngineError = StoreError::Vector("down".into()).into();
        assert!(!err.is_cancelled());
        assert!(err.to_string().contains("vector"));
    }
}
