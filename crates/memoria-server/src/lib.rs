//! HTTP transport and composition root for the memoria memory service.
//!
//! The server decodes requests, hands them to the engine facade, and maps
//! engine errors onto HTTP statuses. All store and LLM clients are built
//! once at startup and injected into the facade; nothing in the engine
//! holds process-wide state.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::ServerError;
pub use state::AppState;
