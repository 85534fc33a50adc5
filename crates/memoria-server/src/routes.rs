//! Memory endpoints.

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};

use memoria_types::{
    AddRequest, AddResponse, ForgetRequest, ForgetResponse, RetrieveRequest, RetrieveResponse,
};

use crate::error::ServerError;
use crate::state::AppState;

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/memory/add", post(add))
        .route("/api/v1/memory/retrieve", post(retrieve))
        .route("/api/v1/memory/forget", post(forget))
        .route("/api/v1/memory/{id}", delete(delete_record))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn add(
    State(state): State<AppState>,
    Json(req): Json<AddRequest>,
) -> Result<Json<AddResponse>, ServerError> {
    let token = state.memory.server_scope().child_token();
    let resp = state.memory.add(token, req).await?;
    Ok(Json(resp))
}

async fn retrieve(
    State(state): State<AppState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, ServerError> {
    let token = state.memory.server_scope().child_token();
    let resp = state.memory.retrieve(token, req).await?;
    Ok(Json(resp))
}

async fn forget(
    State(state): State<AppState>,
    Json(req): Json<ForgetRequest>,
) -> Result<Json<ForgetResponse>, ServerError> {
    let resp = state.memory.forget(req).await?;
    Ok(Json(resp))
}

async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    state.memory.delete(&id).await?;
    Ok(Json(json!({"success": true})))
}
