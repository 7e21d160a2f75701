//! Findings to graph transformation.
//!
//! [`GraphBuilder`] maps a stream of [`Finding`]s (and optional
//! [`GraphLink`]s) into deduplicated nodes and relationships. It performs
//! no I/O and never fails because of a single bad finding: those are
//! skipped and reported in [`BuildOutput::skipped`].

use std::collections::HashMap;

use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::finding::{Finding, GraphLink};
use crate::location::{language_for, LocationParser, QualifiedLocationParser, SourceLocation};
use crate::model::{
    AccessOperation, ClassNode, EntityNode, FileNode, IssueNode, MethodNode, Node, NodeKey,
    NodeKind, QueryNode, Relationship, RelationshipKey, RelationshipType, StoreKind,
};
use crate::query_text::{complexity, extract_entities, infer_query_type};

/// Findings handled by one worker in [`GraphBuilder::build_parallel`].
const PARALLEL_CHUNK: usize = 256;

/// A finding that was not turned into graph elements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFinding {
    /// Position of the finding in the input.
    pub index: usize,
    pub source_location: String,
    pub reason: String,
}

/// Result of a build: deduplicated graph elements plus what was skipped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildOutput {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
    pub skipped: Vec<SkippedFinding>,
    pub skipped_links: usize,
}

impl BuildOutput {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind() == kind)
    }

    pub fn count_of(&self, kind: NodeKind) -> usize {
        self.nodes_of(kind).count()
    }

    pub fn relationships_of(&self, rel_type: RelationshipType) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter().filter(move |r| r.rel_type == rel_type)
    }
}

/// Transforms findings into graph elements using a list of location strategies.
pub struct GraphBuilder {
    parsers: Vec<Box<dyn LocationParser>>,
    store_kind: StoreKind,
}

impl GraphBuilder {
    /// Create a builder that tries `parsers` in order for every location.
    pub fn new(parsers: Vec<Box<dyn LocationParser>>) -> Self {
        Self {
            parsers,
            store_kind: StoreKind::Table,
        }
    }

    /// A builder for Java-style `Class#method:line` locations.
    pub fn java() -> Self {
        Self::new(vec![Box::new(QualifiedLocationParser::java())])
    }

    /// Store kind assigned to extracted entities.
    pub fn with_store_kind(mut self, store_kind: StoreKind) -> Self {
        self.store_kind = store_kind;
        self
    }

    /// Build the graph for a set of findings.
    pub fn build<I>(&self, findings: I) -> BuildOutput
    where
        I: IntoIterator<Item = Finding>,
    {
        self.build_with_links(findings, Vec::new())
    }

    /// Build the graph for findings plus dependency and call links.
    pub fn build_with_links<I, L>(&self, findings: I, links: L) -> BuildOutput
    where
        I: IntoIterator<Item = Finding>,
        L: IntoIterator<Item = GraphLink>,
    {
        let mut acc = GraphAccumulator::default();
        for (index, finding) in findings.into_iter().enumerate() {
            acc.add_finding(self, index, &finding);
        }
        for link in links {
            acc.add_link(self, &link);
        }
        acc.finish()
    }

    /// Build from a JSON payload.
    ///
    /// Accepts either an array of findings or an object
    /// `{"findings": [...], "links": [...]}`. Anything else is structurally
    /// invalid and fails; individual elements that do not deserialize are
    /// skipped like any other malformed finding.
    pub fn build_json(&self, payload: &Value) -> CoreResult<BuildOutput> {
        let (findings, links): (&[Value], &[Value]) = match payload {
            Value::Array(items) => (items.as_slice(), &[][..]),
            Value::Object(map) => {
                let findings = map
                    .get("findings")
                    .and_then(Value::as_array)
                    .ok_or_else(|| CoreError::invalid_input("expected a 'findings' array"))?;
                let links = match map.get("links") {
                    None | Some(Value::Null) => &[][..],
                    Some(Value::Array(links)) => links.as_slice(),
                    Some(_) => return Err(CoreError::invalid_input("'links' must be an array")),
                };
                (findings.as_slice(), links)
            }
            other => {
                return Err(CoreError::invalid_input(format!(
                    "expected an array of findings, got {}",
                    json_type(other)
                )))
            }
        };

        let mut acc = GraphAccumulator::default();
        for (index, value) in findings.iter().enumerate() {
            match Finding::from_json(value) {
                Ok(finding) => acc.add_finding(self, index, &finding),
                Err(e) => acc.skip(index, location_of(value), e.to_string()),
            }
        }
        for value in links {
            match serde_json::from_value::<GraphLink>(value.clone()) {
                Ok(link) => acc.add_link(self, &link),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed link");
                    acc.skipped_links += 1;
                }
            }
        }
        Ok(acc.finish())
    }

    /// Build on the rayon pool: one fragment per chunk of findings, merged in
    /// input order with the same dedup rule as [`GraphBuilder::build`].
    pub fn build_parallel(&self, findings: &[Finding]) -> BuildOutput {
        let fragments: Vec<GraphAccumulator> = findings
            .par_chunks(PARALLEL_CHUNK)
            .enumerate()
            .map(|(chunk_idx, chunk)| {
                let mut acc = GraphAccumulator::default();
                for (offset, finding) in chunk.iter().enumerate() {
                    acc.add_finding(self, chunk_idx * PARALLEL_CHUNK + offset, finding);
                }
                acc
            })
            .collect();

        let mut merged = GraphAccumulator::default();
        for fragment in fragments {
            merged.merge(fragment);
        }
        merged.finish()
    }

    fn parse_location(&self, location: &str) -> Option<SourceLocation> {
        self.parsers.iter().find_map(|p| p.parse(location))
    }
}

/// Insertion-ordered, key-deduplicated node and relationship sets.
#[derive(Default)]
struct GraphAccumulator {
    nodes: Vec<Node>,
    // Keyed by kind too, so a key clash across node types reaches the store
    // as two nodes and surfaces there as a schema conflict.
    node_index: HashMap<(NodeKind, NodeKey), usize>,
    relationships: Vec<Relationship>,
    rel_index: HashMap<RelationshipKey, usize>,
    skipped: Vec<SkippedFinding>,
    skipped_links: usize,
}

impl GraphAccumulator {
    fn add_node(&mut self, node: Node) -> NodeKey {
        let key = node.key().clone();
        match self.node_index.get(&(node.kind(), key.clone())) {
            Some(&idx) => self.nodes[idx].absorb(&node),
            None => {
                self.node_index.insert((node.kind(), key.clone()), self.nodes.len());
                self.nodes.push(node);
            }
        }
        key
    }

    fn add_relationship(&mut self, rel: Relationship) {
        let key = rel.key();
        if !self.rel_index.contains_key(&key) {
            self.rel_index.insert(key, self.relationships.len());
            self.relationships.push(rel);
        }
    }

    fn skip(&mut self, index: usize, source_location: String, reason: String) {
        debug!(index, location = %source_location, reason = %reason, "Skipping finding");
        self.skipped.push(SkippedFinding {
            index,
            source_location,
            reason,
        });
    }

    /// Add the file/class/method triple for a location, returning the method key.
    fn add_member(&mut self, loc: &SourceLocation, is_target: bool) -> NodeKey {
        let file = self.add_node(Node::File(FileNode::new(
            loc.file_path.clone(),
            loc.language.clone(),
            is_target,
        )));
        let class = self.add_node(Node::Class(ClassNode::new(
            loc.class_name.clone(),
            loc.package.clone(),
            file.clone(),
        )));
        let method = self.add_node(Node::Method(MethodNode::new(
            loc.method_name.clone(),
            loc.signature.clone(),
            class.clone(),
        )));
        self.add_relationship(Relationship::new(file, class.clone(), RelationshipType::Contains));
        self.add_relationship(Relationship::new(class, method.clone(), RelationshipType::Defines));
        method
    }

    fn add_finding(&mut self, builder: &GraphBuilder, index: usize, finding: &Finding) {
        if let Err(e) = finding.validate() {
            self.skip(index, finding.source_location.clone(), e.to_string());
            return;
        }
        let Some(loc) = builder.parse_location(&finding.source_location) else {
            self.skip(
                index,
                finding.source_location.clone(),
                CoreError::UnparseableLocation(finding.source_location.clone()).to_string(),
            );
            return;
        };

        let method = self.add_member(&loc, true);

        let text = finding.query_text.trim();
        let query_type = infer_query_type(text);
        let query = self.add_node(Node::Query(QueryNode::new(
            text,
            query_type,
            loc.line,
            complexity(text),
            method.clone(),
        )));
        self.add_relationship(Relationship::new(method, query.clone(), RelationshipType::Executes));

        for issue in finding.issues() {
            let issue_key = self.add_node(Node::Issue(IssueNode::new(
                issue.kind,
                issue.severity,
                issue.message,
                issue.confidence,
                query.clone(),
            )));
            self.add_relationship(Relationship::new(
                query.clone(),
                issue_key,
                RelationshipType::HasIssue,
            ));
        }

        let operation = if query_type.is_read() {
            AccessOperation::Read
        } else {
            AccessOperation::Write
        };
        for name in extract_entities(text) {
            let entity = self.add_node(Node::Entity(EntityNode::new(name, builder.store_kind)));
            self.add_relationship(Relationship::accesses(query.clone(), entity, operation));
        }
    }

    fn add_link(&mut self, builder: &GraphBuilder, link: &GraphLink) {
        match link {
            GraphLink::DependsOn { from, to } => {
                let (from, to) = (from.trim(), to.trim());
                if from.is_empty() || to.is_empty() {
                    self.skipped_links += 1;
                    return;
                }
                let source = self.add_node(Node::File(FileNode::new(
                    from,
                    language_for(from).unwrap_or_default(),
                    false,
                )));
                let target = self.add_node(Node::File(FileNode::new(
                    to,
                    language_for(to).unwrap_or_default(),
                    false,
                )));
                self.add_relationship(Relationship::new(source, target, RelationshipType::DependsOn));
            }
            GraphLink::Calls { from, to } => {
                let (Some(caller), Some(callee)) =
                    (builder.parse_location(from), builder.parse_location(to))
                else {
                    debug!(from = %from, to = %to, "Skipping call link with unparseable location");
                    self.skipped_links += 1;
                    return;
                };
                let caller = self.add_member(&caller, false);
                let callee = self.add_member(&callee, false);
                self.add_relationship(Relationship::new(caller, callee, RelationshipType::Calls));
            }
        }
    }

    fn merge(&mut self, other: GraphAccumulator) {
        for node in other.nodes {
            self.add_node(node);
        }
        for rel in other.relationships {
            self.add_relationship(rel);
        }
        self.skipped.extend(other.skipped);
        self.skipped_links += other.skipped_links;
    }

    fn finish(self) -> BuildOutput {
        info!(
            nodes = self.nodes.len(),
            relationships = self.relationships.len(),
            skipped = self.skipped.len(),
            "Graph built from findings"
        );
        BuildOutput {
            nodes: self.nodes,
            relationships: self.relationships,
            skipped: self.skipped,
            skipped_links: self.skipped_links,
        }
    }
}

fn location_of(value: &Value) -> String {
    value
        .get("source_location")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;
    use crate::location::PythonLocationParser;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample_findings() -> Vec<Finding> {
        vec![
            Finding::new("UserDao#find:10", "SELECT * FROM users WHERE id=?", Severity::Low),
            Finding::new("OrderDao#create:20", "INSERT INTO orders(user_id) VALUES(?)", Severity::Low),
        ]
    }

    fn entity_names(output: &BuildOutput) -> Vec<String> {
        output
            .nodes_of(NodeKind::Entity)
            .filter_map(|n| match n {
                Node::Entity(e) => Some(e.name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_end_to_end_example() {
        let output = GraphBuilder::java().build(sample_findings());
        assert_eq!(output.count_of(NodeKind::File), 2);
        assert_eq!(output.count_of(NodeKind::Class), 2);
        assert_eq!(output.count_of(NodeKind::Method), 2);
        assert_eq!(output.count_of(NodeKind::Query), 2);
        assert_eq!(output.count_of(NodeKind::Entity), 2);
        assert_eq!(output.count_of(NodeKind::Issue), 0);
        assert_eq!(entity_names(&output), vec!["users", "orders"]);
        assert_eq!(output.skipped_count(), 0);

        let ops: Vec<_> = output
            .relationships_of(RelationshipType::Accesses)
            .map(|r| r.operation())
            .collect();
        assert_eq!(ops, vec![Some(AccessOperation::Read), Some(AccessOperation::Write)]);
    }

    #[test]
    fn test_shared_nodes_are_deduplicated() {
        let findings = vec![
            Finding::new("UserDao#find:10", "SELECT * FROM users", Severity::Low),
            Finding::new("UserDao#find:12", "SELECT name FROM users", Severity::Low),
            Finding::new("UserDao#save:30", "UPDATE users SET name = ?", Severity::Low),
        ];
        let output = GraphBuilder::java().build(findings);
        assert_eq!(output.count_of(NodeKind::File), 1);
        assert_eq!(output.count_of(NodeKind::Class), 1);
        assert_eq!(output.count_of(NodeKind::Method), 2);
        assert_eq!(output.count_of(NodeKind::Query), 3);
        assert_eq!(output.count_of(NodeKind::Entity), 1);
        assert_eq!(output.relationships_of(RelationshipType::Contains).count(), 1);
        assert_eq!(output.relationships_of(RelationshipType::Defines).count(), 2);
        assert_eq!(output.relationships_of(RelationshipType::Accesses).count(), 3);

        match output.nodes_of(NodeKind::File).next() {
            Some(Node::File(f)) => assert_eq!(f.occurrences, 3),
            other => panic!("unexpected node {:?}", other),
        };
    }

    #[test]
    fn test_every_query_has_one_executes_edge() {
        let mut findings = sample_findings();
        findings.push(Finding::new("UserDao#find:10", "SELECT * FROM users WHERE id=?", Severity::Low));
        let output = GraphBuilder::java().build(findings);
        for query in output.nodes_of(NodeKind::Query) {
            let incoming = output
                .relationships_of(RelationshipType::Executes)
                .filter(|r| &r.target == query.key())
                .count();
            assert_eq!(incoming, 1);
        }
    }

    #[test]
    fn test_multi_entity_query() {
        let findings = vec![Finding::new(
            "ReportDao#summary:5",
            "SELECT * FROM users u JOIN orders o ON o.user_id = u.id",
            Severity::Medium,
        )];
        let output = GraphBuilder::java().build(findings);
        assert_eq!(output.count_of(NodeKind::Entity), 2);
        let accesses: Vec<_> = output.relationships_of(RelationshipType::Accesses).collect();
        assert_eq!(accesses.len(), 2);
        assert_eq!(accesses[0].source, accesses[1].source);
    }

    #[test]
    fn test_issues_become_nodes() {
        let findings = vec![Finding::new("UserDao#find:10", "SELECT * FROM users", Severity::High)
            .with_issue("select_star")
            .with_confidence(0.9)];
        let output = GraphBuilder::java().build(findings);
        assert_eq!(output.count_of(NodeKind::Issue), 1);
        assert_eq!(output.relationships_of(RelationshipType::HasIssue).count(), 1);
        match output.nodes_of(NodeKind::Issue).next() {
            Some(Node::Issue(issue)) => {
                assert_eq!(issue.kind, "select_star");
                assert_eq!(issue.severity, Severity::High);
                assert_eq!(issue.confidence, Some(0.9));
            }
            other => panic!("unexpected node {:?}", other),
        };
    }

    #[test]
    fn test_unparseable_location_is_skipped() {
        let findings = vec![
            Finding::new("not a location", "SELECT * FROM users", Severity::Low),
            Finding::new("UserDao#find:10", "SELECT * FROM users", Severity::Low),
            Finding::new("UserDao#find:11", "", Severity::Low),
        ];
        let output = GraphBuilder::java().build(findings);
        assert_eq!(output.skipped_count(), 2);
        assert_eq!(output.skipped[0].index, 0);
        assert_eq!(output.skipped[1].index, 2);
        assert_eq!(output.count_of(NodeKind::Query), 1);
    }

    #[test]
    fn test_strategies_are_tried_in_order() {
        let builder = GraphBuilder::new(vec![
            Box::new(PythonLocationParser),
            Box::new(QualifiedLocationParser::java()),
        ]);
        let findings = vec![
            Finding::new("app/users.py:UserRepo.get:3", "SELECT * FROM users", Severity::Low),
            Finding::new("UserDao#find:10", "SELECT * FROM users", Severity::Low),
        ];
        let output = builder.build(findings);
        let paths: Vec<_> = output
            .nodes_of(NodeKind::File)
            .filter_map(|n| match n {
                Node::File(f) => Some((f.path.clone(), f.language.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            paths,
            vec![
                ("app/users.py".to_string(), "python".to_string()),
                ("UserDao.java".to_string(), "java".to_string()),
            ]
        );
    }

    #[test]
    fn test_links() {
        let links = vec![
            GraphLink::depends_on("UserDao.java", "Db.java"),
            GraphLink::calls("OrderDao#create:20", "UserDao#find:10"),
            GraphLink::depends_on("", "Db.java"),
        ];
        let output = GraphBuilder::java().build_with_links(sample_findings(), links);
        assert_eq!(output.relationships_of(RelationshipType::DependsOn).count(), 1);
        assert_eq!(output.relationships_of(RelationshipType::Calls).count(), 1);
        assert_eq!(output.skipped_links, 1);
        assert_eq!(output.count_of(NodeKind::File), 3);
        assert_eq!(output.count_of(NodeKind::Method), 2);

        let db = output
            .nodes_of(NodeKind::File)
            .find_map(|n| match n {
                Node::File(f) if f.path == "Db.java" => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        assert!(!db.is_target);
        let user_dao = output
            .nodes_of(NodeKind::File)
            .find_map(|n| match n {
                Node::File(f) if f.path == "UserDao.java" => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        assert!(user_dao.is_target);
    }

    #[test]
    fn test_build_json() {
        let payload = json!([
            {"source_location": "UserDao#find:10", "query_text": "SELECT * FROM users", "severity": "low"},
            {"source_location": "UserDao#find:11", "query_text": "SELECT 1", "severity": "low", "extra": 1},
            42
        ]);
        let output = GraphBuilder::java().build_json(&payload).unwrap();
        assert_eq!(output.count_of(NodeKind::Query), 1);
        assert_eq!(output.skipped_count(), 2);
        assert_eq!(output.skipped[0].source_location, "UserDao#find:11");
    }

    #[test]
    fn test_build_json_object_with_links() {
        let payload = json!({
            "findings": [
                {"source_location": "UserDao#find:10", "query_text": "SELECT * FROM users", "severity": "low"}
            ],
            "links": [
                {"kind": "depends_on", "from": "UserDao.java", "to": "Db.java"},
                {"kind": "imports", "from": "a", "to": "b"}
            ]
        });
        let output = GraphBuilder::java().build_json(&payload).unwrap();
        assert_eq!(output.relationships_of(RelationshipType::DependsOn).count(), 1);
        assert_eq!(output.skipped_links, 1);
    }

    #[test]
    fn test_build_json_rejects_non_array() {
        let err = GraphBuilder::java().build_json(&json!("findings")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let findings: Vec<Finding> = (0..1000)
            .map(|i| {
                Finding::new(
                    format!("Dao{}#run:{}", i % 37, i % 11),
                    format!("SELECT * FROM t{} JOIN shared ON 1=1", i % 13),
                    Severity::Low,
                )
            })
            .collect();
        let builder = GraphBuilder::java();
        let sequential = builder.build(findings.clone());
        let parallel = builder.build_parallel(&findings);

        let keys = |o: &BuildOutput| o.nodes.iter().map(|n| n.key().clone()).collect::<Vec<_>>();
        assert_eq!(keys(&sequential), keys(&parallel));
        assert_eq!(sequential.relationships, parallel.relationships);
        let occurrences = |o: &BuildOutput| {
            o.nodes
                .iter()
                .map(|n| n.properties().get("occurrences").and_then(|v| v.as_i64()))
                .collect::<Vec<_>>()
        };
        assert_eq!(occurrences(&sequential), occurrences(&parallel));
    }

    proptest! {
        #[test]
        fn prop_build_is_idempotent(
            specs in proptest::collection::vec((0u8..5, 0u8..5, 0u32..4, 0u8..4), 0..40)
        ) {
            let findings: Vec<Finding> = specs
                .iter()
                .map(|(class, method, line, table)| {
                    Finding::new(
                        format!("C{}#m{}:{}", class, method, line),
                        format!("SELECT * FROM tbl{}", table),
                        Severity::Low,
                    )
                })
                .collect();
            let builder = GraphBuilder::java();
            let once = builder.build(findings.clone());
            let mut doubled = findings.clone();
            doubled.extend(findings);
            let twice = builder.build(doubled);

            let keys = |o: &BuildOutput| o.nodes.iter().map(|n| n.key().clone()).collect::<Vec<_>>();
            prop_assert_eq!(keys(&once), keys(&twice));
            prop_assert_eq!(once.relationships.len(), twice.relationships.len());
        }
    }
}
