//! Error mapping from the engine onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use memoria_engine::EngineError;
use memoria_store::StoreError;

/// Server-surface error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Request failed validation.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Request scope was cancelled before completion.
    #[error("request cancelled")]
    Cancelled,

    /// Target record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for ServerError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => ServerError::BadRequest(msg),
            EngineError::Cancelled => ServerError::Cancelled,
            EngineError::Store(StoreError::NotFound(id)) => ServerError::NotFound(id),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServerError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "cancelled"),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let message = self.to_string();
        match &self {
            ServerError::Internal(_) => tracing::error!(code, error = %message, "server error"),
            _ => tracing::warn!(code, error = %message, "client error"),
        }

        (status, Json(ErrorBody { code, message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_mapping() {
        assert!(matches!(
            ServerError::from(EngineError::Validation("x".into())),
            ServerError::BadRequest(_)
        ));
        assert!(matches!(
            ServerError::from(EngineError::Cancelled),
            ServerError::Cancelled
        ));
        assert!(matches!(
            ServerError::from(EngineError::Store(StoreError::NotFound("mem_1".into()))),
            ServerError::NotFound(_)
        ));
        assert!(matches!(
            ServerError::from(EngineError::Store(StoreError::Vector("down".into()))),
            ServerError::Internal(_)
        ));
    }
}
