//! Neo4j [`GraphStore`] backend.
//!
//! Every node carries the `GraphNode` label with a unique `key` plus the
//! label of its type, and a `kind` property naming that type so cross-type
//! key collisions are detected before anything is merged. Writes are
//! batched with `UNWIND` and `MERGE`, one statement per node or
//! relationship type.

use std::collections::BTreeMap;

use async_trait::async_trait;
use neo4rs::{BoltMap, BoltString, BoltType, ConfigBuilder, Graph, Query, Row, Txn};
use ripple_core::{
    AccessOperation, Node, NodeKind, Properties, PropertyValue, Relationship, RelationshipType,
    Severity, StoreKind,
};
use tracing::{debug, info};

use super::{
    AccessRow, ClassAccessRow, EdgeDirection, FileIssueRow, GraphCounts, GraphStore, IssueRow,
    MemberCounts, StoreTransaction, UpsertStats,
};
use crate::config::GraphConfig;
use crate::error::{GraphError, GraphResult};
use crate::schema::{SchemaElement, KIND_PROPERTY, NODE_LABEL};

/// Graph store backed by a Neo4j connection pool.
#[derive(Clone)]
pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    /// Connect and verify the server answers.
    ///
    /// neo4rs creates its pool lazily, so a `RETURN 1` ping forces the first
    /// bolt handshake and an unreachable server fails here.
    pub async fn connect(config: &GraphConfig) -> GraphResult<Self> {
        let neo4j_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .db(config.database.as_str())
            .max_connections(config.max_connections)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::config(format!("Invalid Neo4j config: {}", e)))?;

        let graph = Graph::connect(neo4j_config).await.map_err(map_neo4j_error)?;
        let store = Self { graph };
        store.ping().await?;

        info!(uri = %config.uri, database = %config.database, "Connected to Neo4j");
        Ok(store)
    }

    /// Wrap an existing connection pool.
    pub fn from_graph(graph: Graph) -> Self {
        Self { graph }
    }

    async fn fetch(&self, query: Query) -> GraphResult<Vec<Row>> {
        let mut stream = self.graph.execute(query).await.map_err(map_neo4j_error)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(map_neo4j_error)? {
            rows.push(row);
        }
        Ok(rows)
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    fn backend(&self) -> &'static str {
        "neo4j"
    }

    async fn ping(&self) -> GraphResult<()> {
        self.graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .map_err(map_neo4j_error)
    }

    async fn apply_schema(&self, elements: &[SchemaElement]) -> GraphResult<()> {
        for element in elements {
            self.graph
                .run(Query::new(element.cypher()))
                .await
                .map_err(map_neo4j_error)?;
        }
        Ok(())
    }

    async fn begin(&self) -> GraphResult<Box<dyn StoreTransaction>> {
        let txn = self.graph.start_txn().await.map_err(map_neo4j_error)?;
        Ok(Box::new(Neo4jTransaction { txn }))
    }

    async fn counts(&self) -> GraphResult<GraphCounts> {
        let nodes = self
            .fetch(Query::new(format!("MATCH (n:{NODE_LABEL}) RETURN count(n) AS total")))
            .await?;
        let relationships = self
            .fetch(Query::new(format!(
                "MATCH (:{NODE_LABEL})-[r]->(:{NODE_LABEL}) RETURN count(r) AS total"
            )))
            .await?;
        Ok(GraphCounts {
            nodes: first_count(&nodes, "total")?,
            relationships: first_count(&relationships, "total")?,
        })
    }

    async fn file_exists(&self, path: &str) -> GraphResult<bool> {
        let rows = self
            .fetch(
                Query::new("MATCH (f:File {key: $path}) RETURN count(f) AS total".to_string())
                    .param("path", path),
            )
            .await?;
        Ok(first_count(&rows, "total")? > 0)
    }

    async fn entity_keys(&self, entity_name: &str) -> GraphResult<Vec<String>> {
        let rows = self
            .fetch(
                Query::new(
                    "MATCH (e:Entity) WHERE toLower(e.name) = toLower($name) \
                     RETURN e.key AS key ORDER BY key"
                        .to_string(),
                )
                .param("name", entity_name),
            )
            .await?;
        rows.iter().map(|row| text(row, "key")).collect()
    }

    async fn entity_accesses(&self, entity_name: &str) -> GraphResult<Vec<AccessRow>> {
        let rows = self
            .fetch(
                Query::new(
                    "MATCH (f:File)-[:CONTAINS]->(c:Class)-[:DEFINES]->(m:Method)\
                     -[:EXECUTES]->(q:Query)-[a:ACCESSES]->(e:Entity) \
                     WHERE toLower(e.name) = toLower($name) \
                     RETURN f.key AS file_path, c.key AS class_key, m.key AS method_key, \
                            q.key AS query_key, a.operation AS operation"
                        .to_string(),
                )
                .param("name", entity_name),
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(AccessRow {
                    file_path: text(row, "file_path")?,
                    class_key: text(row, "class_key")?,
                    method_key: text(row, "method_key")?,
                    query_key: text(row, "query_key")?,
                    operation: operation(row),
                })
            })
            .collect()
    }

    async fn query_issues(&self, query_keys: &[String]) -> GraphResult<Vec<IssueRow>> {
        if query_keys.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .fetch(
                Query::new(
                    "UNWIND $keys AS key \
                     MATCH (q:Query {key: key})-[:HAS_ISSUE]->(i:Issue) \
                     RETURN q.key AS query_key, i.key AS issue_key, i.kind AS kind, \
                            i.severity AS severity, i.message AS message"
                        .to_string(),
                )
                .param("keys", query_keys.to_vec()),
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(IssueRow {
                    query_key: text(row, "query_key")?,
                    issue_key: text(row, "issue_key")?,
                    kind: text(row, "kind")?,
                    severity: text(row, "severity")?.parse::<Severity>()?,
                    message: row.get::<Option<String>>("message").unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn dependency_neighbors(
        &self,
        files: &[String],
        direction: EdgeDirection,
    ) -> GraphResult<Vec<(String, String)>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = match direction {
            EdgeDirection::Outgoing => "(a:File {key: path})-[:DEPENDS_ON]->(b:File)",
            EdgeDirection::Incoming => "(a:File {key: path})<-[:DEPENDS_ON]-(b:File)",
        };
        let rows = self
            .fetch(
                Query::new(format!(
                    "UNWIND $files AS path MATCH {pattern} \
                     RETURN a.key AS frontier, b.key AS neighbor ORDER BY frontier, neighbor"
                ))
                .param("files", files.to_vec()),
            )
            .await?;
        rows.iter()
            .map(|row| Ok((text(row, "frontier")?, text(row, "neighbor")?)))
            .collect()
    }

    async fn dependency_edges(&self) -> GraphResult<Vec<(String, String)>> {
        let rows = self
            .fetch(Query::new(
                "MATCH (a:File)-[:DEPENDS_ON]->(b:File) RETURN a.key AS source, b.key AS target"
                    .to_string(),
            ))
            .await?;
        rows.iter()
            .map(|row| Ok((text(row, "source")?, text(row, "target")?)))
            .collect()
    }

    async fn file_members(&self, files: &[String]) -> GraphResult<MemberCounts> {
        if files.is_empty() {
            return Ok(MemberCounts::default());
        }
        let rows = self
            .fetch(
                Query::new(
                    "UNWIND $files AS path \
                     MATCH (f:File {key: path})-[:CONTAINS]->(c:Class) \
                     OPTIONAL MATCH (c)-[:DEFINES]->(m:Method) \
                     RETURN count(DISTINCT c) AS classes, count(DISTINCT m) AS methods"
                        .to_string(),
                )
                .param("files", files.to_vec()),
            )
            .await?;
        Ok(MemberCounts {
            classes: first_count(&rows, "classes")?,
            methods: first_count(&rows, "methods")?,
        })
    }

    async fn class_keys(&self, class_name: &str) -> GraphResult<Vec<String>> {
        let rows = self
            .fetch(
                Query::new("MATCH (c:Class {name: $name}) RETURN c.key AS key ORDER BY key".to_string())
                    .param("name", class_name),
            )
            .await?;
        rows.iter().map(|row| text(row, "key")).collect()
    }

    async fn class_accesses(&self, class_name: &str) -> GraphResult<Vec<ClassAccessRow>> {
        let rows = self
            .fetch(
                Query::new(
                    "MATCH (c:Class {name: $name})-[:DEFINES]->(:Method)\
                     -[:EXECUTES]->(q:Query)-[a:ACCESSES]->(e:Entity) \
                     RETURN c.key AS class_key, e.name AS entity_name, e.store_kind AS store_kind, \
                            q.key AS query_key, a.operation AS operation"
                        .to_string(),
                )
                .param("name", class_name),
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ClassAccessRow {
                    class_key: text(row, "class_key")?,
                    entity_name: text(row, "entity_name")?,
                    store_kind: StoreKind::parse(&text(row, "store_kind")?).unwrap_or(StoreKind::Table),
                    query_key: text(row, "query_key")?,
                    operation: operation(row),
                })
            })
            .collect()
    }

    async fn file_issue_counts(&self, severities: &[Severity]) -> GraphResult<Vec<FileIssueRow>> {
        let filter: Vec<String> = severities.iter().map(|s| s.as_str().to_string()).collect();
        let rows = self
            .fetch(
                Query::new(
                    "MATCH (f:File)-[:CONTAINS]->(:Class)-[:DEFINES]->(:Method)\
                     -[:EXECUTES]->(:Query)-[:HAS_ISSUE]->(i:Issue) \
                     WHERE size($severities) = 0 OR i.severity IN $severities \
                     RETURN f.key AS file_path, i.severity AS severity, count(DISTINCT i) AS issues"
                        .to_string(),
                )
                .param("severities", filter),
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(FileIssueRow {
                    file_path: text(row, "file_path")?,
                    severity: text(row, "severity")?.parse::<Severity>()?,
                    issues: count(row, "issues")?,
                })
            })
            .collect()
    }

    async fn file_paths(&self) -> GraphResult<Vec<String>> {
        let rows = self
            .fetch(Query::new("MATCH (f:File) RETURN f.key AS path".to_string()))
            .await?;
        rows.iter().map(|row| text(row, "path")).collect()
    }
}

/// An explicit Neo4j transaction.
struct Neo4jTransaction {
    txn: Txn,
}

impl Neo4jTransaction {
    async fn fetch(&mut self, query: Query) -> GraphResult<Vec<Row>> {
        let mut stream = self.txn.execute(query).await.map_err(map_neo4j_error)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next(self.txn.handle()).await.map_err(map_neo4j_error)? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Fail if any key in `rows` already belongs to a node of another type.
    async fn check_kind_conflicts(&mut self, kind: NodeKind, rows: Vec<BoltType>) -> GraphResult<()> {
        let conflicts = self
            .fetch(
                Query::new(format!(
                    "UNWIND $rows AS row \
                     MATCH (n:{NODE_LABEL} {{key: row.key}}) WHERE n.{KIND_PROPERTY} <> row.kind \
                     RETURN n.key AS key, n.{KIND_PROPERTY} AS existing LIMIT 1"
                ))
                .param("rows", rows),
            )
            .await?;
        match conflicts.first() {
            Some(row) => Err(GraphError::SchemaConflict {
                key: text(row, "key")?,
                existing: text(row, "existing")?,
                attempted: kind,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StoreTransaction for Neo4jTransaction {
    async fn upsert_nodes(&mut self, nodes: &[Node]) -> GraphResult<UpsertStats> {
        let mut by_kind: BTreeMap<NodeKind, Vec<BoltType>> = BTreeMap::new();
        for node in nodes {
            by_kind.entry(node.kind()).or_default().push(node_row(node));
        }

        let mut stats = UpsertStats::default();
        for (kind, rows) in by_kind {
            let total = rows.len();
            self.check_kind_conflicts(kind, rows.clone()).await?;
            let result = self
                .fetch(
                    Query::new(format!(
                        "UNWIND $rows AS row \
                         OPTIONAL MATCH (existing:{NODE_LABEL} {{key: row.key}}) \
                         WITH row, existing IS NULL AS is_new \
                         MERGE (n:{NODE_LABEL} {{key: row.key}}) \
                         SET n += row.props, n.{KIND_PROPERTY} = row.kind, n:{label} \
                         RETURN sum(CASE WHEN is_new THEN 1 ELSE 0 END) AS created",
                        label = kind.label()
                    ))
                    .param("rows", rows),
                )
                .await?;
            let created = first_count(&result, "created")?;
            debug!(kind = %kind, total, created, "Upserted nodes");
            stats.created += created;
            stats.updated += total.saturating_sub(created);
        }
        Ok(stats)
    }

    async fn upsert_relationships(&mut self, relationships: &[Relationship]) -> GraphResult<UpsertStats> {
        let mut by_type: BTreeMap<RelationshipType, Vec<BoltType>> = BTreeMap::new();
        for rel in relationships {
            by_type.entry(rel.rel_type).or_default().push(relationship_row(rel));
        }

        let mut stats = UpsertStats::default();
        for (rel_type, rows) in by_type {
            let total = rows.len();
            let result = self
                .fetch(
                    Query::new(format!(
                        "UNWIND $rows AS row \
                         MATCH (a:{NODE_LABEL} {{key: row.source}}) \
                         MATCH (b:{NODE_LABEL} {{key: row.target}}) \
                         OPTIONAL MATCH (a)-[existing:{rel}]->(b) \
                         WITH a, b, row, existing IS NULL AS is_new \
                         MERGE (a)-[r:{rel}]->(b) \
                         SET r += row.props \
                         RETURN sum(CASE WHEN is_new THEN 1 ELSE 0 END) AS created, count(*) AS written",
                        rel = rel_type.as_str()
                    ))
                    .param("rows", rows),
                )
                .await?;
            let created = first_count(&result, "created")?;
            let written = first_count(&result, "written")?;
            debug!(rel_type = %rel_type, total, created, written, "Upserted relationships");
            stats.created += created;
            stats.updated += written.saturating_sub(created);
            stats.missing_endpoints += total.saturating_sub(written);
        }
        Ok(stats)
    }

    async fn delete_file_subgraphs(&mut self, paths: &[String]) -> GraphResult<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        let rows = self
            .fetch(
                Query::new(
                    "UNWIND $paths AS path \
                     MATCH (f:File {key: path}) \
                     OPTIONAL MATCH (f)-[:CONTAINS]->(c:Class) \
                     OPTIONAL MATCH (c)-[:DEFINES]->(m:Method) \
                     OPTIONAL MATCH (m)-[:EXECUTES]->(q:Query) \
                     OPTIONAL MATCH (q)-[:HAS_ISSUE]->(i:Issue) \
                     WITH collect(DISTINCT f) + collect(DISTINCT c) + collect(DISTINCT m) \
                          + collect(DISTINCT q) + collect(DISTINCT i) AS doomed \
                     UNWIND doomed AS n \
                     WITH DISTINCT n \
                     WITH collect(n) AS nodes \
                     FOREACH (x IN nodes | DETACH DELETE x) \
                     RETURN size(nodes) AS removed"
                        .to_string(),
                )
                .param("paths", paths.to_vec()),
            )
            .await?;
        first_count(&rows, "removed")
    }

    async fn commit(self: Box<Self>) -> GraphResult<()> {
        self.txn.commit().await.map_err(map_neo4j_error)
    }

    async fn rollback(self: Box<Self>) -> GraphResult<()> {
        self.txn.rollback().await.map_err(map_neo4j_error)
    }
}

/// Classify a driver error: connection failures are transient, the rest are query failures.
fn map_neo4j_error(err: neo4rs::Error) -> GraphError {
    match err {
        neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
            GraphError::unavailable(err.to_string())
        }
        other => GraphError::query(other.to_string()),
    }
}

fn bolt_value(value: &PropertyValue) -> BoltType {
    match value {
        PropertyValue::String(s) => BoltType::from(s.clone()),
        PropertyValue::Integer(i) => BoltType::from(*i),
        PropertyValue::Float(f) => BoltType::from(*f),
        PropertyValue::Boolean(b) => BoltType::from(*b),
    }
}

fn bolt_props(props: &Properties) -> BoltType {
    let mut map = BoltMap::new();
    for (name, value) in props {
        map.put(BoltString::from(name.as_str()), bolt_value(value));
    }
    BoltType::Map(map)
}

fn node_row(node: &Node) -> BoltType {
    let mut row = BoltMap::new();
    row.put("key".into(), BoltType::from(node.key().to_string()));
    row.put("kind".into(), BoltType::from(node.kind().label().to_string()));
    row.put("props".into(), bolt_props(&node.properties()));
    BoltType::Map(row)
}

fn relationship_row(rel: &Relationship) -> BoltType {
    let mut row = BoltMap::new();
    row.put("source".into(), BoltType::from(rel.source.to_string()));
    row.put("target".into(), BoltType::from(rel.target.to_string()));
    row.put("props".into(), bolt_props(&rel.properties));
    BoltType::Map(row)
}

fn text(row: &Row, field: &str) -> GraphResult<String> {
    row.get::<String>(field)
        .map_err(|e| GraphError::query(format!("Missing column '{}': {}", field, e)))
}

fn count(row: &Row, field: &str) -> GraphResult<usize> {
    let value = row
        .get::<i64>(field)
        .map_err(|e| GraphError::query(format!("Missing column '{}': {}", field, e)))?;
    Ok(usize::try_from(value).unwrap_or_default())
}

fn first_count(rows: &[Row], field: &str) -> GraphResult<usize> {
    match rows.first() {
        Some(row) => count(row, field),
        None => Ok(0),
    }
}

fn operation(row: &Row) -> AccessOperation {
    row.get::<String>("operation")
        .ok()
        .as_deref()
        .and_then(AccessOperation::parse)
        .unwrap_or(AccessOperation::Read)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bolt_values() {
        assert_eq!(bolt_value(&PropertyValue::Integer(3)), BoltType::from(3i64));
        assert_eq!(bolt_value(&PropertyValue::Boolean(true)), BoltType::from(true));
        assert_eq!(
            bolt_value(&PropertyValue::from("users")),
            BoltType::from("users".to_string())
        );
    }

    #[test]
    fn test_kind_property_never_shadows_node_properties() {
        for kind in NodeKind::all() {
            assert_ne!(kind.natural_key_property(), KIND_PROPERTY);
        }
        let issue = Node::Issue(ripple_core::IssueNode::new(
            "n_plus_one",
            Severity::High,
            None,
            None,
            "q".into(),
        ));
        let props = issue.properties();
        assert!(!props.contains_key(KIND_PROPERTY));
        assert_eq!(props["kind"], PropertyValue::from("n_plus_one"));
    }

    #[test]
    fn test_connection_errors_are_transient() {
        assert!(map_neo4j_error(neo4rs::Error::ConnectionError).is_transient());
        assert!(!map_neo4j_error(neo4rs::Error::UnexpectedMessage("boom".into())).is_transient());
    }
}
