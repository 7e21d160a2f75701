//! In-memory [`GraphStore`] backend.
//!
//! Holds the graph in ordered maps behind a tokio `RwLock`. Transactions
//! work on a private copy and stage their operations; commit replays the
//! staged operations against the shared graph under the write lock, so
//! concurrent transactions never observe each other's partial writes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ripple_core::{
    AccessOperation, Node, NodeKey, NodeKind, Relationship, RelationshipKey, RelationshipType,
    Severity,
};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    AccessRow, ClassAccessRow, EdgeDirection, FileIssueRow, GraphCounts, GraphStore, IssueRow,
    MemberCounts, StoreTransaction, UpsertStats,
};
use crate::error::{GraphError, GraphResult};
use crate::schema::SchemaElement;

type KeySet<'a> = BTreeSet<&'a NodeKey>;

#[derive(Debug, Clone, Default)]
struct MemoryGraph {
    nodes: BTreeMap<NodeKey, Node>,
    relationships: BTreeMap<RelationshipKey, Relationship>,
}

impl MemoryGraph {
    fn upsert_nodes(&mut self, nodes: &[Node]) -> GraphResult<UpsertStats> {
        // Validate the whole batch first so a conflict leaves no trace.
        let mut batch_kinds: HashMap<&NodeKey, NodeKind> = HashMap::new();
        for node in nodes {
            let existing = self
                .nodes
                .get(node.key())
                .map(Node::kind)
                .or_else(|| batch_kinds.get(node.key()).copied());
            if let Some(existing) = existing {
                if existing != node.kind() {
                    return Err(GraphError::SchemaConflict {
                        key: node.key().to_string(),
                        existing: existing.label().to_string(),
                        attempted: node.kind(),
                    });
                }
            }
            batch_kinds.insert(node.key(), node.kind());
        }

        let mut stats = UpsertStats::default();
        for node in nodes {
            match self.nodes.insert(node.key().clone(), node.clone()) {
                Some(_) => stats.updated += 1,
                None => stats.created += 1,
            }
        }
        Ok(stats)
    }

    fn upsert_relationships(&mut self, relationships: &[Relationship]) -> UpsertStats {
        let mut stats = UpsertStats::default();
        for rel in relationships {
            if !self.nodes.contains_key(&rel.source) || !self.nodes.contains_key(&rel.target) {
                stats.missing_endpoints += 1;
                continue;
            }
            match self.relationships.insert(rel.key(), rel.clone()) {
                Some(_) => stats.updated += 1,
                None => stats.created += 1,
            }
        }
        stats
    }

    fn delete_file_subgraphs(&mut self, paths: &[String]) -> usize {
        let mut doomed: BTreeSet<NodeKey> = paths
            .iter()
            .map(|p| NodeKey::new(p.as_str()))
            .filter(|key| matches!(self.nodes.get(key), Some(Node::File(_))))
            .collect();
        // Each pass picks up the layer below the previous one.
        for rel_type in [
            RelationshipType::Contains,
            RelationshipType::Defines,
            RelationshipType::Executes,
            RelationshipType::HasIssue,
        ] {
            let next: Vec<NodeKey> = self
                .relationships
                .values()
                .filter(|r| r.rel_type == rel_type && doomed.contains(&r.source))
                .map(|r| r.target.clone())
                .collect();
            doomed.extend(next);
        }

        self.relationships
            .retain(|key, _| !doomed.contains(&key.source) && !doomed.contains(&key.target));
        for key in &doomed {
            self.nodes.remove(key);
        }
        doomed.len()
    }

    fn apply(&mut self, op: &StagedOp) -> GraphResult<()> {
        match op {
            StagedOp::Nodes(nodes) => {
                self.upsert_nodes(nodes)?;
            }
            StagedOp::Relationships(rels) => {
                self.upsert_relationships(rels);
            }
            StagedOp::DeleteFiles(paths) => {
                self.delete_file_subgraphs(paths);
            }
        }
        Ok(())
    }

    fn edges(&self, rel_type: RelationshipType) -> impl Iterator<Item = &Relationship> {
        self.relationships.values().filter(move |r| r.rel_type == rel_type)
    }

    /// Targets of `rel_type` edges leaving any of `from`.
    fn step<'a>(&'a self, from: &KeySet<'a>, rel_type: RelationshipType) -> KeySet<'a> {
        self.edges(rel_type)
            .filter(|r| from.contains(&r.source))
            .map(|r| &r.target)
            .collect()
    }

    fn targets_by_source(&self, rel_type: RelationshipType) -> HashMap<&NodeKey, Vec<&Relationship>> {
        let mut index: HashMap<&NodeKey, Vec<&Relationship>> = HashMap::new();
        for rel in self.edges(rel_type) {
            index.entry(&rel.source).or_default().push(rel);
        }
        index
    }

    fn sources_by_target(&self, rel_type: RelationshipType) -> HashMap<&NodeKey, Vec<&NodeKey>> {
        let mut index: HashMap<&NodeKey, Vec<&NodeKey>> = HashMap::new();
        for rel in self.edges(rel_type) {
            index.entry(&rel.target).or_default().push(&rel.source);
        }
        index
    }

    fn entity_keys(&self, name: &str) -> KeySet<'_> {
        self.nodes
            .values()
            .filter_map(|n| match n {
                Node::Entity(e) if e.name.eq_ignore_ascii_case(name) => Some(e.key()),
                _ => None,
            })
            .collect()
    }

    fn class_keys(&self, name: &str) -> KeySet<'_> {
        self.nodes
            .values()
            .filter_map(|n| match n {
                Node::Class(c) if c.name == name => Some(c.key()),
                _ => None,
            })
            .collect()
    }
}

/// A write staged by an open transaction.
#[derive(Debug, Clone)]
enum StagedOp {
    Nodes(Vec<Node>),
    Relationships(Vec<Relationship>),
    DeleteFiles(Vec<String>),
}

/// In-memory graph store.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraphStore {
    graph: Arc<RwLock<MemoryGraph>>,
    schema: Arc<RwLock<BTreeSet<String>>>,
    outages: Arc<AtomicUsize>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the schema elements applied so far.
    pub async fn schema_names(&self) -> Vec<String> {
        self.schema.read().await.iter().cloned().collect()
    }

    /// Make the next `n` store calls fail as if the store were unreachable.
    #[cfg(test)]
    pub(crate) fn fail_next(&self, n: usize) {
        self.outages.store(n, Ordering::SeqCst);
    }

    /// Hold the write lock until the returned guard drops, stalling every read.
    #[cfg(test)]
    pub(crate) async fn stall(&self) -> Stall {
        Stall(Arc::clone(&self.graph).write_owned().await)
    }

    fn check_available(&self) -> GraphResult<()> {
        let taken = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match taken {
            Ok(_) => Err(GraphError::unavailable("in-memory store outage")),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> GraphResult<()> {
        self.check_available()
    }

    async fn apply_schema(&self, elements: &[SchemaElement]) -> GraphResult<()> {
        self.check_available()?;
        let mut schema = self.schema.write().await;
        for element in elements {
            if schema.insert(element.name.clone()) {
                debug!(name = %element.name, "Schema element created");
            }
        }
        Ok(())
    }

    async fn begin(&self) -> GraphResult<Box<dyn StoreTransaction>> {
        self.check_available()?;
        let working = self.graph.read().await.clone();
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.graph),
            working,
            staged: Vec::new(),
        }))
    }

    async fn counts(&self) -> GraphResult<GraphCounts> {
        self.check_available()?;
        let graph = self.graph.read().await;
        Ok(GraphCounts {
            nodes: graph.nodes.len(),
            relationships: graph.relationships.len(),
        })
    }

    async fn file_exists(&self, path: &str) -> GraphResult<bool> {
        self.check_available()?;
        let graph = self.graph.read().await;
        Ok(matches!(graph.nodes.get(&NodeKey::from(path)), Some(Node::File(_))))
    }

    async fn entity_keys(&self, entity_name: &str) -> GraphResult<Vec<String>> {
        self.check_available()?;
        let graph = self.graph.read().await;
        Ok(graph.entity_keys(entity_name).into_iter().map(|k| k.to_string()).collect())
    }

    async fn entity_accesses(&self, entity_name: &str) -> GraphResult<Vec<AccessRow>> {
        self.check_available()?;
        let graph = self.graph.read().await;
        let entities = graph.entity_keys(entity_name);
        let executed_by = graph.sources_by_target(RelationshipType::Executes);
        let defined_by = graph.sources_by_target(RelationshipType::Defines);
        let contained_by = graph.sources_by_target(RelationshipType::Contains);

        let mut rows = Vec::new();
        for access in graph
            .edges(RelationshipType::Accesses)
            .filter(|r| entities.contains(&r.target))
        {
            let operation = access.operation().unwrap_or(AccessOperation::Read);
            for method in executed_by.get(&access.source).into_iter().flatten() {
                for class in defined_by.get(*method).into_iter().flatten() {
                    for file in contained_by.get(*class).into_iter().flatten() {
                        rows.push(AccessRow {
                            file_path: file.to_string(),
                            class_key: class.to_string(),
                            method_key: method.to_string(),
                            query_key: access.source.to_string(),
                            operation,
                        });
                    }
                }
            }
        }
        Ok(rows)
    }

    async fn query_issues(&self, query_keys: &[String]) -> GraphResult<Vec<IssueRow>> {
        self.check_available()?;
        let graph = self.graph.read().await;
        let wanted: BTreeSet<&str> = query_keys.iter().map(String::as_str).collect();
        let rows = graph
            .edges(RelationshipType::HasIssue)
            .filter(|r| wanted.contains(r.source.as_str()))
            .filter_map(|r| match graph.nodes.get(&r.target) {
                Some(Node::Issue(issue)) => Some(IssueRow {
                    query_key: r.source.to_string(),
                    issue_key: issue.key().to_string(),
                    kind: issue.kind.clone(),
                    severity: issue.severity,
                    message: issue.message.clone(),
                }),
                _ => None,
            })
            .collect();
        Ok(rows)
    }

    async fn dependency_neighbors(
        &self,
        files: &[String],
        direction: EdgeDirection,
    ) -> GraphResult<Vec<(String, String)>> {
        self.check_available()?;
        let graph = self.graph.read().await;
        let frontier: BTreeSet<&str> = files.iter().map(String::as_str).collect();
        let pairs = graph
            .edges(RelationshipType::DependsOn)
            .filter_map(|r| {
                let (from, to) = match direction {
                    EdgeDirection::Outgoing => (&r.source, &r.target),
                    EdgeDirection::Incoming => (&r.target, &r.source),
                };
                frontier
                    .contains(from.as_str())
                    .then(|| (from.to_string(), to.to_string()))
            })
            .collect();
        Ok(pairs)
    }

    async fn dependency_edges(&self) -> GraphResult<Vec<(String, String)>> {
        self.check_available()?;
        let graph = self.graph.read().await;
        Ok(graph
            .edges(RelationshipType::DependsOn)
            .map(|r| (r.source.to_string(), r.target.to_string()))
            .collect())
    }

    async fn file_members(&self, files: &[String]) -> GraphResult<MemberCounts> {
        self.check_available()?;
        let graph = self.graph.read().await;
        let keys: Vec<NodeKey> = files.iter().map(|f| NodeKey::new(f.as_str())).collect();
        let files: KeySet<'_> = keys.iter().collect();
        let classes = graph.step(&files, RelationshipType::Contains);
        let methods = graph.step(&classes, RelationshipType::Defines);
        Ok(MemberCounts {
            classes: classes.len(),
            methods: methods.len(),
        })
    }

    async fn class_keys(&self, class_name: &str) -> GraphResult<Vec<String>> {
        self.check_available()?;
        let graph = self.graph.read().await;
        Ok(graph.class_keys(class_name).into_iter().map(|k| k.to_string()).collect())
    }

    async fn class_accesses(&self, class_name: &str) -> GraphResult<Vec<ClassAccessRow>> {
        self.check_available()?;
        let graph = self.graph.read().await;
        let defines = graph.targets_by_source(RelationshipType::Defines);
        let executes = graph.targets_by_source(RelationshipType::Executes);
        let accesses = graph.targets_by_source(RelationshipType::Accesses);

        let mut rows = Vec::new();
        for class in graph.class_keys(class_name) {
            for define in defines.get(class).into_iter().flatten() {
                for execute in executes.get(&define.target).into_iter().flatten() {
                    for access in accesses.get(&execute.target).into_iter().flatten() {
                        let Some(Node::Entity(entity)) = graph.nodes.get(&access.target) else {
                            continue;
                        };
                        rows.push(ClassAccessRow {
                            class_key: class.to_string(),
                            entity_name: entity.name.clone(),
                            store_kind: entity.store_kind,
                            query_key: execute.target.to_string(),
                            operation: access.operation().unwrap_or(AccessOperation::Read),
                        });
                    }
                }
            }
        }
        Ok(rows)
    }

    async fn file_issue_counts(&self, severities: &[Severity]) -> GraphResult<Vec<FileIssueRow>> {
        self.check_available()?;
        let graph = self.graph.read().await;
        let contains = graph.targets_by_source(RelationshipType::Contains);
        let defines = graph.targets_by_source(RelationshipType::Defines);
        let executes = graph.targets_by_source(RelationshipType::Executes);
        let has_issue = graph.targets_by_source(RelationshipType::HasIssue);

        let mut rows = Vec::new();
        for file in graph.nodes.values().filter(|n| n.kind() == NodeKind::File) {
            let mut issues: KeySet<'_> = BTreeSet::new();
            for class in targets(&contains, file.key()) {
                for method in targets(&defines, class) {
                    for query in targets(&executes, method) {
                        issues.extend(targets(&has_issue, query));
                    }
                }
            }

            let mut per_severity: BTreeMap<Severity, usize> = BTreeMap::new();
            for key in issues {
                if let Some(Node::Issue(issue)) = graph.nodes.get(key) {
                    if severities.is_empty() || severities.contains(&issue.severity) {
                        *per_severity.entry(issue.severity).or_default() += 1;
                    }
                }
            }
            rows.extend(per_severity.into_iter().map(|(severity, issues)| FileIssueRow {
                file_path: file.key().to_string(),
                severity,
                issues,
            }));
        }
        Ok(rows)
    }

    async fn file_paths(&self) -> GraphResult<Vec<String>> {
        self.check_available()?;
        let graph = self.graph.read().await;
        Ok(graph
            .nodes
            .values()
            .filter(|n| n.kind() == NodeKind::File)
            .map(|n| n.key().to_string())
            .collect())
    }
}

#[cfg(test)]
pub(crate) struct Stall(#[allow(dead_code)] tokio::sync::OwnedRwLockWriteGuard<MemoryGraph>);

fn targets<'g>(index: &HashMap<&'g NodeKey, Vec<&'g Relationship>>, key: &NodeKey) -> Vec<&'g NodeKey> {
    index.get(key).into_iter().flatten().copied().map(|r| &r.target).collect()
}

/// Transaction over a private copy of the graph.
struct MemoryTransaction {
    shared: Arc<RwLock<MemoryGraph>>,
    working: MemoryGraph,
    staged: Vec<StagedOp>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn upsert_nodes(&mut self, nodes: &[Node]) -> GraphResult<UpsertStats> {
        let stats = self.working.upsert_nodes(nodes)?;
        self.staged.push(StagedOp::Nodes(nodes.to_vec()));
        Ok(stats)
    }

    async fn upsert_relationships(&mut self, relationships: &[Relationship]) -> GraphResult<UpsertStats> {
        let stats = self.working.upsert_relationships(relationships);
        self.staged.push(StagedOp::Relationships(relationships.to_vec()));
        Ok(stats)
    }

    async fn delete_file_subgraphs(&mut self, paths: &[String]) -> GraphResult<usize> {
        let removed = self.working.delete_file_subgraphs(paths);
        self.staged.push(StagedOp::DeleteFiles(paths.to_vec()));
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> GraphResult<()> {
        let mut graph = self.shared.write().await;
        // Replay against the current state: another transaction may have
        // committed since this one began.
        let mut next = graph.clone();
        for op in &self.staged {
            next.apply(op)?;
        }
        *graph = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> GraphResult<()> {
        debug!(staged = self.staged.len(), "Discarding in-memory transaction");
        Ok(())
    }
}
