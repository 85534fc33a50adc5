//! Event-relation storage in PostgreSQL.
//!
//! One table, `event_relations`, with a unique index on
//! `(from_event_id, to_event_id, relation_type)`. Inserts are upserts: a
//! colliding row keeps the link but takes the new `id` and `created_at`.
//! Events themselves live in the vector store; rows here may reference
//! events that do not exist yet.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use memoria_types::EventRelation;

use crate::config::PostgresConfig;
use crate::error::Result;

/// Event-relation upserts and cascading deletes.
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Insert or update a relation on the unique
    /// `(from_event_id, to_event_id, relation_type)` index.
    async fn create_relation(&self, relation: &EventRelation) -> Result<()>;

    /// Delete every relation where the event appears on either side,
    /// returning the number of rows removed.
    async fn delete_by_event_id(&self, event_id: &str) -> Result<u64>;

    /// Release the connection pool.
    async fn close(&self) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Postgres adapter
// ─────────────────────────────────────────────────────────────────────────────

const SCHEMA_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS event_relations (
        id              TEXT        PRIMARY KEY,
        from_event_id   TEXT        NOT NULL,
        to_event_id     TEXT        NOT NULL,
        relation_type   TEXT        NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS idx_event_relations_from ON event_relations (from_event_id)",
    "CREATE INDEX IF NOT EXISTS idx_event_relations_to   ON event_relations (to_event_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_event_relations_unique
        ON event_relations (from_event_id, to_event_id, relation_type)",
];

/// [`RelationStore`] over PostgreSQL via sqlx.
pub struct PostgresRelationStore {
    pool: PgPool,
}

impl PostgresRelationStore {
    /// Connect with a bounded wait and auto-create the schema.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.dsn())
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!(host = %config.host, database = %config.database, "relational store ready");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        for ddl in SCHEMA_DDL {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RelationStore for PostgresRelationStore {
    async fn create_relation(&self, relation: &EventRelation) -> Result<()> {
        sqlx::query(
            "INSERT INTO event_relations (id, from_event_id, to_event_id, relation_type, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (from_event_id, to_event_id, relation_type)
             DO UPDATE SET id = EXCLUDED.id, created_at = EXCLUDED.created_at",
        )
        .bind(&relation.id)
        .bind(&relation.from_event_id)
        .bind(&relation.to_event_id)
        .bind(relation.relation_type.as_str())
        .bind(relation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_by_event_id(&self, event_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM event_relations WHERE from_event_id = $1 OR to_event_id = $1",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory double
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory [`RelationStore`] double keyed by the unique index.
#[derive(Default)]
pub struct MemoryRelationStore {
    rows: Mutex<HashMap<(String, String, String), EventRelation>>,
}

impl MemoryRelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Fetch a row by the unique key, for assertions.
    pub fn get(&self, from: &str, to: &str, relation_type: &str) -> Option<EventRelation> {
        self.rows
            .lock()
            .get(&(from.to_string(), to.to_string(), relation_type.to_string()))
            .cloned()
    }
}

#[async_trait]
impl RelationStore for MemoryRelationStore {
    async fn create_relation(&self, relation: &EventRelation) -> Result<()> {
        let key = (
            relation.from_event_id.clone(),
            relation.to_event_id.clone(),
            relation.relation_type.as_str().to_string(),
        );
        self.rows.lock().insert(key, relation.clone());
        Ok(())
    }

    async fn delete_by_event_id(&self, event_id: &str) -> Result<u64> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|_, r| r.from_event_id != event_id && r.to_event_id != event_id);
        Ok((before - rows.len()) as u64)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use memoria_types::RelationType;

    fn relation(id: &str, from: &str, to: &str) -> EventRelation {
        EventRelation {
            id: id.to_string(),
            relation_type: RelationType::Causal,
            from_event_id: from.to_string(),
            to_event_id: to.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_takes_latest_id() {
        let store = MemoryRelationStore::new();
        store.create_relation(&relation("rel_1", "evt_a", "evt_b")).await.unwrap();
        store.create_relation(&relation("rel_2", "evt_a", "evt_b")).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("evt_a", "evt_b", "causal").unwrap().id, "rel_2");
    }

    #[tokio::test]
    async fn test_distinct_relation_types_coexist() {
        let store = MemoryRelationStore::new();
        store.create_relation(&relation("rel_1", "evt_a", "evt_b")).await.unwrap();
        let mut temporal = relation("rel_2", "evt_a", "evt_b");
        temporal.relation_type = RelationType::Temporal;
        store.create_relation(&temporal).await.unwrap();

        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_by_event_id_both_sides() {
        let store = MemoryRelationStore::new();
        store.create_relation(&relation("rel_1", "evt_a", "evt_b")).await.unwrap();
        store.create_relation(&relation("rel_2", "evt_c", "evt_a")).await.unwrap();
        store.create_relation(&relation("rel_3", "evt_c", "evt_d")).await.unwrap();

        let removed = store.delete_by_event_id("evt_a").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
    }
}
