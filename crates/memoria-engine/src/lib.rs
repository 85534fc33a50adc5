//! The memoria engine: pipelines, forgetting, and the memory facade.
//!
//! Two pipelines and a maintenance job compose over the stores and the LLM
//! facade:
//!
//! - **Write** ([`Memory::add`]): short-term append → episode storage →
//!   entity/edge extraction → summary-memory extraction → event extraction →
//!   topic-change summary → consistency check.
//! - **Read** ([`Memory::retrieve`]): short-term recall → query embedding →
//!   3-bucket token-budgeted retrieval → optional graph expansion → context
//!   formatting.
//! - **Forget** ([`Memory::forget`]): scores and evicts working memories and
//!   events, expires old unprotected facts.
//!
//! Pipelines run as ordered handler chains sharing a request-scoped context
//! (see [`context`]); a handler may invoke the rest of the chain mid-logic
//! and abort or fail the whole run. Fire-and-forget work (conflict expiry,
//! access-stat bumps) runs on a server-scoped cancellation token so caller
//! disconnects cannot cut it short.

pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod format;
pub mod forgetting;
pub mod handlers;
pub mod memory;
pub mod util;

pub use chain::{ReadChain, WriteChain};
pub use config::EngineConfig;
pub use context::{ReadContext, ReadHandler, TokenLedger, WriteContext, WriteHandler};
pub use error::{EngineError, Result};
pub use forgetting::{event_forget_score, working_forget_score, ForgettingJob, FORGET_THRESHOLD};
pub use memory::Memory;
