//! Error types for the store adapters.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the storage adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Vector-store operation failed.
    #[error("vector store error: {0}")]
    Vector(String),

    /// Graph-store operation failed.
    #[error("graph store error: {0}")]
    Graph(String),

    /// Relational-store operation failed.
    #[error("relational store error: {0}")]
    Relational(String),

    /// Requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored data does not match the expected shape (e.g. embedding
    /// dimension mismatch discovered at write time).
    #[error("schema mismatch: {0}")]
    Schema(String),

    /// The request's scope was cancelled mid-call.
    #[error("context cancelled")]
    Cancelled,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            other => StoreError::Relational(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert!(StoreError::Vector("boom".into()).to_string().contains("vector"));
        assert_eq!(StoreError::Cancelled.to_string(), "context cancelled");
    }
}
