//! Graph store adapter over the Neo4j HTTP transactional Cypher API.
//!
//! Entities are nodes labeled `Entity` plus their entity-type label, keyed
//! by `name` within a scope; facts are relationships typed by predicate.
//! All write operations use merge semantics so re-extraction converges on
//! the same node/edge.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::Neo4jConfig;
use crate::doc::Document;
use crate::error::{Result, StoreError};

/// Traversal direction relative to the start node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A node address: label plus a key/value match.
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub label: String,
    pub key: String,
    pub value: Value,
}

impl NodeRef {
    pub fn new(label: impl Into<String>, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Entity/relationship storage with bounded traversal.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create or update a node matched by `(labels[0..], match_key)`.
    async fn merge_node(
        &self,
        labels: &[String],
        match_key: &str,
        match_value: Value,
        properties: Document,
    ) -> Result<()>;

    /// Fetch a node's properties by label and key match.
    async fn get_node(&self, label: &str, key: &str, value: Value) -> Result<Option<Document>>;

    /// Find nodes with the given label matching all property filters.
    async fn find_nodes(
        &self,
        label: &str,
        filters: Document,
        limit: usize,
    ) -> Result<Vec<Document>>;

    /// Delete a node and every relationship attached to it.
    async fn delete_node(&self, label: &str, key: &str, value: Value) -> Result<()>;

    /// Merge a typed relationship between two matched nodes.
    ///
    /// Missing endpoints make this a no-op, matching Cypher `MATCH` + `MERGE`
    /// semantics.
    async fn create_relationship(
        &self,
        from: NodeRef,
        to: NodeRef,
        rel_type: &str,
        properties: Document,
    ) -> Result<()>;

    /// Find outgoing relationships from a node, optionally typed.
    async fn find_relationships(
        &self,
        from: NodeRef,
        rel_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Document>>;

    /// Delete relationships matching a property value (e.g. by `id`).
    async fn delete_relationship(&self, key: &str, value: Value) -> Result<()>;

    /// Collect nodes reachable from `start` within `max_depth` hops.
    async fn traverse(
        &self,
        start: NodeRef,
        rel_types: &[String],
        direction: Direction,
        max_depth: usize,
        limit: usize,
    ) -> Result<Vec<Document>>;

    /// Run multiple write statements in one transaction.
    async fn run_write_batch(&self, queries: &[String], params: &[Document]) -> Result<()>;

    /// Connectivity probe.
    async fn health(&self) -> Result<()>;

    /// Release the connection.
    async fn close(&self) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Cypher building
// ─────────────────────────────────────────────────────────────────────────────

fn label_fragment(labels: &[String]) -> String {
    labels
        .iter()
        .map(|l| format!(":{l}"))
        .collect::<Vec<_>>()
        .join("")
}

fn rel_type_fragment(rel_types: &[String]) -> String {
    if rel_types.is_empty() {
        String::new()
    } else {
        format!(":{}", rel_types.join("|"))
    }
}

fn direction_arrows(direction: Direction) -> (&'static str, &'static str) {
    match direction {
        Direction::Outgoing => ("-", "->"),
        Direction::Incoming => ("<-", "-"),
        Direction::Both => ("-", "-"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Neo4j adapter
// ─────────────────────────────────────────────────────────────────────────────

/// Graph store over Neo4j's HTTP transactional endpoint.
pub struct Neo4jStore {
    client: reqwest::Client,
    tx_url: String,
    username: String,
    password: String,
}

impl Neo4jStore {
    pub fn new(config: Neo4jConfig) -> Result<Self> {
        config.validate()?;
        let base = config.uri.trim_end_matches('/');
        Ok(Self {
            client: reqwest::Client::new(),
            tx_url: format!("{base}/db/{}/tx/commit", config.database),
            username: config.username,
            password: config.password,
        })
    }

    /// Run statements in one auto-commit transaction and return the rows of
    /// the first result.
    async fn run(&self, statements: Vec<Value>) -> Result<Vec<Vec<Value>>> {
        let mut request = self
            .client
            .post(&self.tx_url)
            .json(&json!({"statements": statements}));
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Graph(e.to_string()))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Graph(e.to_string()))?;

        if !status.is_success() {
            return Err(StoreError::Graph(format!("{status}: {body}")));
        }

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if let Some(first) = errors.first() {
                return Err(StoreError::Graph(first.to_string()));
            }
        }

        let rows = body
            .pointer("/results/0/data")
            .and_then(Value::as_array)
            .map(|data| {
                data.iter()
                    .filter_map(|entry| entry.get("row").and_then(Value::as_array).cloned())
                    .collect()
            })
            .unwrap_or_default();

        Ok(rows)
    }

    async fn run_write(&self, cypher: String, params: Value) -> Result<()> {
        self.run(vec![json!({"statement": cypher, "parameters": params})])
            .await?;
        Ok(())
    }

    fn statement(cypher: String, params: Value) -> Value {
        json!({"statement": cypher, "parameters": params})
    }
}

fn row_object(row: &[Value]) -> Option<Document> {
    match row.first() {
        Some(Value::Object(map)) => Some(map.clone()),
        _ => None,
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn merge_node(
        &self,
        labels: &[String],
        match_key: &str,
        match_value: Value,
        properties: Document,
    ) -> Result<()> {
        if labels.is_empty() {
            return Err(StoreError::Graph("at least one label is required".into()));
        }

        let cypher = format!(
            "MERGE (n{} {{{}: $match_value}}) SET n += $props",
            label_fragment(labels),
            match_key
        );
        self.run_write(
            cypher,
            json!({"match_value": match_value, "props": Value::Object(properties)}),
        )
        .await
    }

    async fn get_node(&self, label: &str, key: &str, value: Value) -> Result<Option<Document>> {
        let cypher = format!("MATCH (n:{label} {{{key}: $value}}) RETURN n LIMIT 1");
        let rows = self
            .run(vec![Self::statement(cypher, json!({"value": value}))])
            .await?;
        Ok(rows.first().and_then(|row| row_object(row)))
    }

    async fn find_nodes(
        &self,
        label: &str,
        filters: Document,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let limit = if limit == 0 { 100 } else { limit };
        let mut params = Map::new();
        let mut where_parts = Vec::new();
        for (i, (field, value)) in filters.into_iter().enumerate() {
            let param = format!("p{i}");
            where_parts.push(format!("n.{field} = ${param}"));
            params.insert(param, value);
        }
        let where_clause = if where_parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_parts.join(" AND "))
        };

        let cypher = format!("MATCH (n:{label}){where_clause} RETURN n LIMIT {limit}");
        let rows = self
            .run(vec![Self::statement(cypher, Value::Object(params))])
            .await?;
        Ok(rows.iter().filter_map(|row| row_object(row)).collect())
    }

    async fn delete_node(&self, label: &str, key: &str, value: Value) -> Result<()> {
        let cypher = format!("MATCH (n:{label} {{{key}: $value}}) DETACH DELETE n");
        self.run_write(cypher, json!({"value": value})).await
    }

    async fn create_relationship(
        &self,
        from: NodeRef,
        to: NodeRef,
        rel_type: &str,
        properties: Document,
    ) -> Result<()> {
        let cypher = format!(
            "MATCH (from:{} {{{}: $from_value}}) \
             MATCH (to:{} {{{}: $to_value}}) \
             MERGE (from)-[r:{}]->(to) SET r += $props",
            from.label, from.key, to.label, to.key, rel_type
        );
        self.run_write(
            cypher,
            json!({
                "from_value": from.value,
                "to_value": to.value,
                "props": Value::Object(properties),
            }),
        )
        .await
    }

    async fn find_relationships(
        &self,
        from: NodeRef,
        rel_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let limit = if limit == 0 { 100 } else { limit };
        let rel = rel_type.map(|t| format!(":{t}")).unwrap_or_default();
        let cypher = format!(
            "MATCH (from:{} {{{}: $from_value}})-[r{}]->(to) \
             RETURN r, type(r) AS rel_type LIMIT {}",
            from.label, from.key, rel, limit
        );

        let rows = self
            .run(vec![Self::statement(cypher, json!({"from_value": from.value}))])
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let mut props = row_object(row)?;
                if let Some(Value::String(rel_type)) = row.get(1) {
                    props.insert("rel_type".to_string(), Value::String(rel_type.clone()));
                }
                Some(props)
            })
            .collect())
    }

    async fn delete_relationship(&self, key: &str, value: Value) -> Result<()> {
        let cypher = format!("MATCH ()-[r {{{key}: $value}}]->() DELETE r");
        self.run_write(cypher, json!({"value": value})).await
    }

    async fn traverse(
        &self,
        start: NodeRef,
        rel_types: &[String],
        direction: Direction,
        max_depth: usize,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let max_depth = if max_depth == 0 { 2 } else { max_depth };
        let limit = if limit == 0 { 100 } else { limit };
        let (left, right) = direction_arrows(direction);

        let cypher = format!(
            "MATCH (start:{} {{{}: $start_value}}){}[{}*1..{}]{}(related) \
             RETURN DISTINCT related LIMIT {}",
            start.label,
            start.key,
            left,
            rel_type_fragment(rel_types),
            max_depth,
            right,
            limit
        );

        let rows = self
            .run(vec![Self::statement(cypher, json!({"start_value": start.value}))])
            .await?;
        Ok(rows.iter().filter_map(|row| row_object(row)).collect())
    }

    async fn run_write_batch(&self, queries: &[String], params: &[Document]) -> Result<()> {
        if queries.len() != params.len() {
            return Err(StoreError::Graph("queries and params length mismatch".into()));
        }
        let statements = queries
            .iter()
            .zip(params.iter())
            .map(|(q, p)| Self::statement(q.clone(), Value::Object(p.clone())))
            .collect();
        self.run(statements).await?;
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        self.run(vec![Self::statement("RETURN 1".to_string(), json!({}))])
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory double
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredNode {
    labels: Vec<String>,
    match_key: String,
    match_value: Value,
    properties: Document,
}

#[derive(Debug, Clone)]
struct StoredRel {
    from: String,
    to: String,
    rel_type: String,
    properties: Document,
}

/// In-memory [`GraphStore`] double for tests.
///
/// Nodes merge on `(primary label, match key, match value)`; relationships
/// merge on `(from, to, type)`. `run_write_batch` records the statements for
/// assertion instead of interpreting Cypher.
#[derive(Default)]
pub struct MemoryGraphStore {
    nodes: parking_lot::RwLock<Vec<StoredNode>>,
    rels: parking_lot::RwLock<Vec<StoredRel>>,
    batches: parking_lot::RwLock<Vec<String>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn rel_count(&self) -> usize {
        self.rels.read().len()
    }

    /// Statements recorded by `run_write_batch`.
    pub fn recorded_batches(&self) -> Vec<String> {
        self.batches.read().clone()
    }

    fn node_key(label: &str, key: &str, value: &Value) -> String {
        format!("{label}\u{1}{key}\u{1}{value}")
    }

    fn find_node_key(&self, label: &str, key: &str, value: &Value) -> Option<String> {
        self.nodes.read().iter().find_map(|n| {
            (n.labels.iter().any(|l| l == label) && n.match_key == key && &n.match_value == value)
                .then(|| Self::node_key(&n.labels[0], &n.match_key, &n.match_value))
        })
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn merge_node(
        &self,
        labels: &[String],
        match_key: &str,
        match_value: Value,
        properties: Document,
    ) -> Result<()> {
        if labels.is_empty() {
            return Err(StoreError::Graph("at least one label is required".into()));
        }

        let mut nodes = self.nodes.write();
        if let Some(existing) = nodes.iter_mut().find(|n| {
            n.labels[0] == labels[0] && n.match_key == match_key && n.match_value == match_value
        }) {
            for (field, value) in properties {
                existing.properties.insert(field, value);
            }
            existing.labels = labels.to_vec();
        } else {
            nodes.push(StoredNode {
                labels: labels.to_vec(),
                match_key: match_key.to_string(),
                match_value,
                properties,
            });
        }
        Ok(())
    }

    async fn get_node(&self, label: &str, key: &str, value: Value) -> Result<Option<Document>> {
        Ok(self.nodes.read().iter().find_map(|n| {
            (n.labels.iter().any(|l| l == label) && n.match_key == key && n.match_value == value)
                .then(|| n.properties.clone())
        }))
    }

    async fn find_nodes(
        &self,
        label: &str,
        filters: Document,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let limit = if limit == 0 { 100 } else { limit };
        Ok(self
            .nodes
            .read()
            .iter()
            .filter(|n| n.labels.iter().any(|l| l == label))
            .filter(|n| {
                filters
                    .iter()
                    .all(|(field, value)| n.properties.get(field) == Some(value))
            })
            .take(limit)
            .map(|n| n.properties.clone())
            .collect())
    }

    async fn delete_node(&self, label: &str, key: &str, value: Value) -> Result<()> {
        let Some(node_key) = self.find_node_key(label, key, &value) else {
            return Ok(());
        };
        self.nodes.write().retain(|n| {
            Self::node_key(&n.labels[0], &n.match_key, &n.match_value) != node_key
        });
        self.rels
            .write()
            .retain(|r| r.from != node_key && r.to != node_key);
        Ok(())
    }

    async fn create_relationship(
        &self,
        from: NodeRef,
        to: NodeRef,
        rel_type: &str,
        properties: Document,
    ) -> Result<()> {
        let (Some(from_key), Some(to_key)) = (
            self.find_node_key(&from.label, &from.key, &from.value),
            self.find_node_key(&to.label, &to.key, &to.value),
        ) else {
            // MATCH found no endpoint: Cypher silently writes nothing.
            debug!(rel_type, "relationship endpoints missing, skipping");
            return Ok(());
        };

        let mut rels = self.rels.write();
        if let Some(existing) = rels
            .iter_mut()
            .find(|r| r.from == from_key && r.to == to_key && r.rel_type == rel_type)
        {
            for (field, value) in properties {
                existing.properties.insert(field, value);
            }
        } else {
            rels.push(StoredRel {
                from: from_key,
                to: to_key,
                rel_type: rel_type.to_string(),
                properties,
            });
        }
        Ok(())
    }

    async fn find_relationships(
        &self,
        from: NodeRef,
        rel_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let limit = if limit == 0 { 100 } else { limit };
        let Some(from_key) = self.find_node_key(&from.label, &from.key, &from.value) else {
            return Ok(Vec::new());
        };

        Ok(self
            .rels
            .read()
            .iter()
            .filter(|r| r.from == from_key)
            .filter(|r| rel_type.is_none_or(|t| r.rel_type == t))
            .take(limit)
            .map(|r| {
                let mut props = r.properties.clone();
                props.insert("rel_type".to_string(), Value::String(r.rel_type.clone()));
                props
            })
            .collect())
    }

    async fn delete_relationship(&self, key: &str, value: Value) -> Result<()> {
        self.rels
            .write()
            .retain(|r| r.properties.get(key) != Some(&value));
        Ok(())
    }

    async fn traverse(
        &self,
        start: NodeRef,
        rel_types: &[String],
        direction: Direction,
        max_depth: usize,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let max_depth = if max_depth == 0 { 2 } else { max_depth };
        let limit = if limit == 0 { 100 } else { limit };
        let Some(start_key) = self.find_node_key(&start.label, &start.key, &start.value) else {
            return Ok(Vec::new());
        };

        let rels = self.rels.read();
        let mut frontier = vec![start_key.clone()];
        let mut seen = std::collections::HashSet::from([start_key]);
        let mut reached = Vec::new();

        for _ in 0..max_depth {
            let mut next = Vec::new();
            for node in &frontier {
                for rel in rels.iter() {
                    if !rel_types.is_empty() && !rel_types.contains(&rel.rel_type) {
                        continue;
                    }
                    let neighbor = if &rel.from == node
                        && matches!(direction, Direction::Outgoing | Direction::Both)
                    {
                        Some(rel.to.clone())
                    } else if &rel.to == node
                        && matches!(direction, Direction::Incoming | Direction::Both)
                    {
                        Some(rel.from.clone())
                    } else {
                        None
                    };
                    if let Some(neighbor) = neighbor {
                        if seen.insert(neighbor.clone()) {
                            reached.push(neighbor.clone());
                            next.push(neighbor);
                        }
                    }
                }
            }
            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }

        let nodes = self.nodes.read();
        Ok(reached
            .iter()
            .take(limit)
            .filter_map(|key| {
                nodes
                    .iter()
                    .find(|n| Self::node_key(&n.labels[0], &n.match_key, &n.match_value) == *key)
                    .map(|n| n.properties.clone())
            })
            .collect())
    }

    async fn run_write_batch(&self, queries: &[String], params: &[Document]) -> Result<()> {
        if queries.len() != params.len() {
            return Err(StoreError::Graph("queries and params length mismatch".into()));
        }
        self.batches.write().extend(queries.iter().cloned());
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(fields: Value) -> Document {
        match fields {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn labels(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_merge_node_idempotent() {
        let store = MemoryGraphStore::new();
        store
            .merge_node(
                &labels(&["Entity", "place"]),
                "name",
                json!("星巴克"),
                props(json!({"id": "ent_1", "description": "咖啡店"})),
            )
            .await
            .unwrap();
        store
            .merge_node(
                &labels(&["Entity", "place"]),
                "name",
                json!("星巴克"),
                props(json!({"id": "ent_1", "description": "连锁咖啡店"})),
            )
            .await
            .unwrap();

        assert_eq!(store.node_count(), 1);
        let node = store
            .get_node("Entity", "name", json!("星巴克"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node["description"], json!("连锁咖啡店"));
    }

    #[tokio::test]
    async fn test_relationship_merge_and_missing_endpoint() {
        let store = MemoryGraphStore::new();
        store
            .merge_node(&labels(&["Entity"]), "name", json!("axin"), props(json!({})))
            .await
            .unwrap();

        // Object node missing: write is silently skipped.
        store
            .create_relationship(
                NodeRef::new("Entity", "name", "axin"),
                NodeRef::new("Entity", "name", "星巴克"),
                "去过",
                props(json!({"fact": "axin 去过星巴克"})),
            )
            .await
            .unwrap();
        assert_eq!(store.rel_count(), 0);

        store
            .merge_node(&labels(&["Entity"]), "name", json!("星巴克"), props(json!({})))
            .await
            .unwrap();
        for fact in ["第一次", "第二次"] {
            store
                .create_relationship(
                    NodeRef::new("Entity", "name", "axin"),
                    NodeRef::new("Entity", "name", "星巴克"),
                    "去过",
                    props(json!({"fact": fact})),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.rel_count(), 1);

        let rels = store
            .find_relationships(NodeRef::new("Entity", "name", "axin"), None, 0)
            .await
            .unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0]["fact"], json!("第二次"));
        assert_eq!(rels[0]["rel_type"], json!("去过"));

        store
            .delete_relationship("fact", json!("第二次"))
            .await
            .unwrap();
        assert_eq!(store.rel_count(), 0);
    }

    #[tokio::test]
    async fn test_traverse_depth_and_direction() {
        let store = MemoryGraphStore::new();
        for name in ["a", "b", "c"] {
            store
                .merge_node(&labels(&["Entity"]), "name", json!(name), props(json!({"name": name})))
                .await
                .unwrap();
        }
        store
            .create_relationship(
                NodeRef::new("Entity", "name", "a"),
                NodeRef::new("Entity", "name", "b"),
                "knows",
                props(json!({})),
            )
            .await
            .unwrap();
        store
            .create_relationship(
                NodeRef::new("Entity", "name", "b"),
                NodeRef::new("Entity", "name", "c"),
                "knows",
                props(json!({})),
            )
            .await
            .unwrap();

        let depth1 = store
            .traverse(NodeRef::new("Entity", "name", "a"), &[], Direction::Outgoing, 1, 0)
            .await
            .unwrap();
        assert_eq!(depth1.len(), 1);

        let depth2 = store
            .traverse(NodeRef::new("Entity", "name", "a"), &[], Direction::Outgoing, 2, 0)
            .await
            .unwrap();
        assert_eq!(depth2.len(), 2);

        // Incoming from a reaches nothing.
        let incoming = store
            .traverse(NodeRef::new("Entity", "name", "a"), &[], Direction::Incoming, 2, 0)
            .await
            .unwrap();
        assert!(incoming.is_empty());

        // Both from b reaches both neighbors.
        let both = store
            .traverse(NodeRef::new("Entity", "name", "b"), &[], Direction::Both, 1, 0)
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_node_cascades() {
        let store = MemoryGraphStore::new();
        for name in ["a", "b"] {
            store
                .merge_node(&labels(&["Entity"]), "name", json!(name), props(json!({})))
                .await
                .unwrap();
        }
        store
            .create_relationship(
                NodeRef::new("Entity", "name", "a"),
                NodeRef::new("Entity", "name", "b"),
                "knows",
                props(json!({})),
            )
            .await
            .unwrap();

        store.delete_node("Entity", "name", json!("a")).await.unwrap();
        assert_eq!(store.node_count(), 1);
        assert_eq!(store.rel_count(), 0);
    }

    #[test]
    fn test_cypher_fragments() {
        assert_eq!(label_fragment(&labels(&["Entity", "place"])), ":Entity:place");
        assert_eq!(rel_type_fragment(&labels(&["A", "B"])), ":A|B");
        assert_eq!(rel_type_fragment(&[]), "");
        assert_eq!(direction_arrows(Direction::Incoming), ("<-", "-"));
    }
}
