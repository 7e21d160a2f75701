//! Store capability contract.
//!
//! Everything the client and analyzer need from a graph-capable store:
//! schema creation, transactional upsert-by-key writes, and a fixed set
//! of parametrized reads returning typed rows. Any backend meeting the
//! contract can sit behind [`GraphStore`].

pub mod memory;
pub mod neo4j;

use async_trait::async_trait;
use ripple_core::{AccessOperation, Node, Relationship, Severity, StoreKind};
use serde::Serialize;

use crate::error::GraphResult;
use crate::schema::SchemaElement;

/// Which way to follow `DEPENDS_ON` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    /// From a file to the files it depends on.
    Outgoing,
    /// From a file to the files that depend on it.
    Incoming,
}

/// Outcome of an upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub created: usize,
    pub updated: usize,
    /// Relationships not written because an endpoint node does not exist.
    pub missing_endpoints: usize,
}

impl UpsertStats {
    pub fn add(&mut self, other: UpsertStats) {
        self.created += other.created;
        self.updated += other.updated;
        self.missing_endpoints += other.missing_endpoints;
    }
}

/// Node and relationship counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    pub nodes: usize,
    pub relationships: usize,
}

/// One `File -CONTAINS-> Class -DEFINES-> Method -EXECUTES-> Query -ACCESSES-> Entity` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRow {
    pub file_path: String,
    pub class_key: String,
    pub method_key: String,
    pub query_key: String,
    pub operation: AccessOperation,
}

/// An issue attached to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueRow {
    pub query_key: String,
    pub issue_key: String,
    pub kind: String,
    pub severity: Severity,
    pub message: Option<String>,
}

/// One `Class -DEFINES-> Method -EXECUTES-> Query -ACCESSES-> Entity` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassAccessRow {
    pub class_key: String,
    pub entity_name: String,
    pub store_kind: StoreKind,
    pub query_key: String,
    pub operation: AccessOperation,
}

/// Distinct issues of one severity reachable from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIssueRow {
    pub file_path: String,
    pub severity: Severity,
    pub issues: usize,
}

/// Distinct classes and methods contained in a set of files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberCounts {
    pub classes: usize,
    pub methods: usize,
}

/// A graph-capable store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Cheap round-trip proving the store is reachable.
    async fn ping(&self) -> GraphResult<()>;

    /// Create constraints and indexes that do not exist yet.
    async fn apply_schema(&self, elements: &[SchemaElement]) -> GraphResult<()>;

    /// Open a write transaction.
    async fn begin(&self) -> GraphResult<Box<dyn StoreTransaction>>;

    async fn counts(&self) -> GraphResult<GraphCounts>;

    async fn file_exists(&self, path: &str) -> GraphResult<bool>;

    /// Keys of entities whose name matches, ignoring case.
    async fn entity_keys(&self, entity_name: &str) -> GraphResult<Vec<String>>;

    async fn entity_accesses(&self, entity_name: &str) -> GraphResult<Vec<AccessRow>>;

    async fn query_issues(&self, query_keys: &[String]) -> GraphResult<Vec<IssueRow>>;

    /// `(frontier file, neighbor file)` pairs one `DEPENDS_ON` hop away.
    async fn dependency_neighbors(
        &self,
        files: &[String],
        direction: EdgeDirection,
    ) -> GraphResult<Vec<(String, String)>>;

    /// Every `DEPENDS_ON` edge as `(source, target)`.
    async fn dependency_edges(&self) -> GraphResult<Vec<(String, String)>>;

    async fn file_members(&self, files: &[String]) -> GraphResult<MemberCounts>;

    /// Keys of classes with the given name, across files.
    async fn class_keys(&self, class_name: &str) -> GraphResult<Vec<String>>;

    async fn class_accesses(&self, class_name: &str) -> GraphResult<Vec<ClassAccessRow>>;

    /// Issue counts per file and severity; an empty filter means every severity.
    async fn file_issue_counts(&self, severities: &[Severity]) -> GraphResult<Vec<FileIssueRow>>;

    /// Paths of every file node.
    async fn file_paths(&self) -> GraphResult<Vec<String>>;
}

/// An open write transaction. Dropping it without committing discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Create nodes that are absent, else overwrite their non-key properties.
    async fn upsert_nodes(&mut self, nodes: &[Node]) -> GraphResult<UpsertStats>;

    /// Create relationships that are absent, else overwrite their properties.
    async fn upsert_relationships(&mut self, relationships: &[Relationship]) -> GraphResult<UpsertStats>;

    /// Delete files with their classes, methods, queries and issues.
    async fn delete_file_subgraphs(&mut self, paths: &[String]) -> GraphResult<usize>;

    async fn commit(self: Box<Self>) -> GraphResult<()>;

    async fn rollback(self: Box<Self>) -> GraphResult<()>;
}
