//! Storage adapters for the memoria memory service.
//!
//! Three external stores plus one in-process store back the layered memory
//! model:
//!
//! - [`vector::VectorStore`] — typed-document store with k-NN, BM25, and
//!   hybrid search (OpenSearch-compatible REST API). Owns episodes, summary
//!   memories, event triplets, and the searchable copies of entities/edges.
//! - [`graph::GraphStore`] — entity/relationship graph with bounded
//!   traversal (Neo4j HTTP transactional Cypher API). Owns the primary
//!   copies of entities and edges.
//! - [`relation::RelationStore`] — event-relation rows with a unique
//!   constraint (PostgreSQL via sqlx).
//! - [`shortterm::ShortTermStore`] — per-session sliding message window in
//!   process memory.
//!
//! Untyped `serde_json` documents cross the adapter wire boundary; typed
//! decoding lives centrally in [`doc`]. Each external adapter has an
//! in-memory double (`Memory*Store`) with matching semantics for tests.

pub mod config;
pub mod doc;
pub mod error;
pub mod graph;
pub mod relation;
pub mod shortterm;
pub mod vector;
pub mod vector_mem;

pub use config::{Neo4jConfig, OpenSearchConfig, PostgresConfig};
pub use doc::{decode, decode_scored, embedding_field, encode, score_of, Document};
pub use error::{Result, StoreError};
pub use graph::{Direction, GraphStore, MemoryGraphStore, Neo4jStore, NodeRef};
pub use relation::{MemoryRelationStore, PostgresRelationStore, RelationStore};
pub use shortterm::{ShortTermStore, DEFAULT_WINDOW_SIZE};
pub use vector::{OpenSearchStore, SearchQuery, VectorStore, STATUS_ACTIVE};
pub use vector_mem::MemoryVectorStore;
