//! Error types for the LLM crate.

use thiserror::Error;

/// Result type alias using the LLM error type.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors from LLM generation and embedding.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The model errored, returned an empty response, or refused.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The embedder errored or returned an empty vector.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The response did not match the expected output schema.
    #[error("response schema mismatch: {0}")]
    Schema(String),

    /// No prompt registered under the requested name.
    #[error("prompt not found: {0}")]
    PromptNotFound(String),

    /// Network/connectivity failure talking to the provider.
    #[error("network error: {0}")]
    Network(String),

    /// Backend misconfiguration (missing key, bad base URL).
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Network(format!("request timed out: {err}"))
        } else if err.is_connect() {
            LlmError::Network(format!("connection failed: {err}"))
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = LlmError::Schema("missing field `topic`".into());
        assert!(err.to_string().contains("schema mismatch"));
        assert!(err.to_string().contains("topic"));
    }
}
