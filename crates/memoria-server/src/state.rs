//! Shared application state.

use std::sync::Arc;

use memoria_engine::Memory;

/// State handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub memory: Arc<Memory>,
}

impl AppState {
    pub fn new(memory: Arc<Memory>) -> Self {
        Self { memory }
    }
}
