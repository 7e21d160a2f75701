//! Blast-radius queries for entities, files and classes.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use ripple_core::{AccessOperation, RiskAssessment, Severity, StoreKind};
use serde::Serialize;
use tracing::debug;

use super::ImpactAnalyzer;
use crate::control::QueryControl;
use crate::error::GraphResult;
use crate::store::EdgeDirection;

/// An issue linked to a query touching the analyzed entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueSummary {
    pub issue_key: String,
    pub query_key: String,
    pub kind: String,
    pub severity: Severity,
    pub message: Option<String>,
}

/// What changes if a data entity changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityImpact {
    pub entity_name: String,
    /// Whether the entity exists in the graph at all.
    pub found: bool,
    /// Affected file paths, sorted.
    pub affected_files: Vec<String>,
    pub affected_classes: usize,
    pub affected_methods: usize,
    /// Number of distinct queries per access kind.
    pub access_patterns: BTreeMap<AccessOperation, usize>,
    pub issues_by_severity: BTreeMap<Severity, Vec<IssueSummary>>,
    pub risk: RiskAssessment,
}

impl EntityImpact {
    fn empty(entity_name: &str) -> Self {
        Self {
            entity_name: entity_name.to_string(),
            found: false,
            affected_files: Vec::new(),
            affected_classes: 0,
            affected_methods: 0,
            access_patterns: BTreeMap::new(),
            issues_by_severity: BTreeMap::new(),
            risk: RiskAssessment::minimal(),
        }
    }

    pub fn issue_count(&self) -> usize {
        self.issues_by_severity.values().map(Vec::len).sum()
    }
}

/// Which side of `DEPENDS_ON` a file impact walks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactDirection {
    /// Files that depend on the changed file, transitively.
    #[default]
    Dependents,
    /// Files the changed file depends on, transitively.
    Dependencies,
}

impl ImpactDirection {
    fn edge_direction(self) -> EdgeDirection {
        match self {
            ImpactDirection::Dependents => EdgeDirection::Incoming,
            ImpactDirection::Dependencies => EdgeDirection::Outgoing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileImpactOptions {
    pub max_depth: usize,
    /// When false only direct neighbors are reported.
    pub recursive: bool,
    pub direction: ImpactDirection,
}

impl Default for FileImpactOptions {
    fn default() -> Self {
        Self {
            max_depth: 5,
            recursive: true,
            direction: ImpactDirection::Dependents,
        }
    }
}

impl FileImpactOptions {
    pub fn direct_only() -> Self {
        Self {
            recursive: false,
            ..Self::default()
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_direction(mut self, direction: ImpactDirection) -> Self {
        self.direction = direction;
        self
    }

    fn depth_limit(&self) -> usize {
        if self.recursive {
            self.max_depth
        } else {
            self.max_depth.min(1)
        }
    }
}

/// A file reached from the changed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffectedFile {
    pub path: String,
    /// Minimal number of `DEPENDS_ON` hops from the changed file.
    pub depth: usize,
}

/// What changes if a file changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileImpact {
    pub file_path: String,
    pub found: bool,
    pub direction: ImpactDirection,
    /// Sorted by depth, then path. Never includes the changed file.
    pub affected_files: Vec<AffectedFile>,
    pub affected_classes: usize,
    pub affected_methods: usize,
    pub risk: RiskAssessment,
}

impl FileImpact {
    fn empty(file_path: &str, direction: ImpactDirection) -> Self {
        Self {
            file_path: file_path.to_string(),
            found: false,
            direction,
            affected_files: Vec::new(),
            affected_classes: 0,
            affected_methods: 0,
            risk: RiskAssessment::minimal(),
        }
    }

    pub fn depth_of(&self, path: &str) -> Option<usize> {
        self.affected_files.iter().find(|f| f.path == path).map(|f| f.depth)
    }
}

/// An entity used by a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityUsage {
    pub name: String,
    pub store_kind: StoreKind,
    /// Distinct queries of the class touching the entity.
    pub query_count: usize,
    pub operations: BTreeSet<AccessOperation>,
}

/// Entities a class depends on through its methods' queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDependencies {
    pub class_name: String,
    /// Keys of every class with this name; one per defining file.
    pub classes: Vec<String>,
    /// Sorted by query count descending, then name.
    pub entities: Vec<EntityUsage>,
}

impl ClassDependencies {
    pub fn found(&self) -> bool {
        !self.classes.is_empty()
    }
}

impl ImpactAnalyzer {
    /// Walk from an entity back to the files whose queries access it.
    pub async fn analyze_entity_impact(
        &self,
        entity_name: &str,
        control: &QueryControl,
    ) -> GraphResult<EntityImpact> {
        let control = self.effective_control(control);
        let scope = control.start();

        let keys = scope.run(self.store.entity_keys(entity_name)).await?;
        if keys.is_empty() {
            debug!(entity = entity_name, "Entity not in graph");
            return Ok(EntityImpact::empty(entity_name));
        }

        let rows = scope.run(self.store.entity_accesses(entity_name)).await?;
        let mut files = BTreeSet::new();
        let mut classes = HashSet::new();
        let mut methods = HashSet::new();
        let mut queries = BTreeSet::new();
        let mut accesses: BTreeMap<AccessOperation, HashSet<&str>> = BTreeMap::new();
        for row in &rows {
            files.insert(row.file_path.clone());
            classes.insert(row.class_key.as_str());
            methods.insert(row.method_key.as_str());
            queries.insert(row.query_key.clone());
            accesses.entry(row.operation).or_default().insert(row.query_key.as_str());
        }

        let query_keys: Vec<String> = queries.into_iter().collect();
        let issues = scope.run(self.store.query_issues(&query_keys)).await?;
        let mut issues_by_severity: BTreeMap<Severity, Vec<IssueSummary>> = BTreeMap::new();
        let mut seen = HashSet::new();
        for issue in issues {
            if !seen.insert(issue.issue_key.clone()) {
                continue;
            }
            issues_by_severity
                .entry(issue.severity)
                .or_default()
                .push(IssueSummary {
                    issue_key: issue.issue_key,
                    query_key: issue.query_key,
                    kind: issue.kind,
                    severity: issue.severity,
                    message: issue.message,
                });
        }
        for group in issues_by_severity.values_mut() {
            group.sort_by(|a, b| a.issue_key.cmp(&b.issue_key));
        }

        let risk = RiskAssessment::assess(files.len(), classes.len(), methods.len());
        debug!(
            entity = entity_name,
            files = files.len(),
            risk = %risk.level,
            "Entity impact analyzed"
        );
        Ok(EntityImpact {
            entity_name: entity_name.to_string(),
            found: true,
            affected_files: files.into_iter().collect(),
            affected_classes: classes.len(),
            affected_methods: methods.len(),
            access_patterns: accesses.into_iter().map(|(op, q)| (op, q.len())).collect(),
            issues_by_severity,
            risk,
        })
    }

    /// Breadth-first walk over `DEPENDS_ON`, recording each file's minimal hop distance.
    pub async fn analyze_file_impact(
        &self,
        file_path: &str,
        options: &FileImpactOptions,
        control: &QueryControl,
    ) -> GraphResult<FileImpact> {
        let control = self.effective_control(control);
        let scope = control.start();

        if !scope.run(self.store.file_exists(file_path)).await? {
            debug!(file = file_path, "File not in graph");
            return Ok(FileImpact::empty(file_path, options.direction));
        }

        let mut visited: HashSet<String> = HashSet::from([file_path.to_string()]);
        let mut frontier = vec![file_path.to_string()];
        let mut affected = Vec::new();
        for depth in 1..=options.depth_limit() {
            if frontier.is_empty() {
                break;
            }
            let pairs = scope
                .run(
                    self.store
                        .dependency_neighbors(&frontier, options.direction.edge_direction()),
                )
                .await?;
            let mut next = Vec::new();
            for (_, neighbor) in pairs {
                // First reach is the shortest: BFS visits depth d before d + 1.
                if visited.insert(neighbor.clone()) {
                    affected.push(AffectedFile {
                        path: neighbor.clone(),
                        depth,
                    });
                    next.push(neighbor);
                }
            }
            next.sort();
            frontier = next;
        }
        affected.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.path.cmp(&b.path)));

        let paths: Vec<String> = affected.iter().map(|f| f.path.clone()).collect();
        let members = scope.run(self.store.file_members(&paths)).await?;
        let risk = RiskAssessment::assess(affected.len(), members.classes, members.methods);
        debug!(
            file = file_path,
            affected = affected.len(),
            risk = %risk.level,
            "File impact analyzed"
        );
        Ok(FileImpact {
            file_path: file_path.to_string(),
            found: true,
            direction: options.direction,
            affected_files: affected,
            affected_classes: members.classes,
            affected_methods: members.methods,
            risk,
        })
    }

    /// Entities reachable from a class through `DEFINES -> EXECUTES -> ACCESSES`.
    pub async fn analyze_class_dependencies(
        &self,
        class_name: &str,
        control: &QueryControl,
    ) -> GraphResult<ClassDependencies> {
        let control = self.effective_control(control);
        let scope = control.start();

        let classes = scope.run(self.store.class_keys(class_name)).await?;
        if classes.is_empty() {
            return Ok(ClassDependencies {
                class_name: class_name.to_string(),
                classes,
                entities: Vec::new(),
            });
        }

        let rows = scope.run(self.store.class_accesses(class_name)).await?;
        let mut usage: BTreeMap<(String, StoreKind), (BTreeSet<String>, BTreeSet<AccessOperation>)> =
            BTreeMap::new();
        for row in rows {
            let entry = usage.entry((row.entity_name, row.store_kind)).or_default();
            entry.0.insert(row.query_key);
            entry.1.insert(row.operation);
        }
        let mut entities: Vec<EntityUsage> = usage
            .into_iter()
            .map(|((name, store_kind), (queries, operations))| EntityUsage {
                name,
                store_kind,
                query_count: queries.len(),
                operations,
            })
            .collect();
        entities.sort_by(|a, b| b.query_count.cmp(&a.query_count).then_with(|| a.name.cmp(&b.name)));

        Ok(ClassDependencies {
            class_name: class_name.to_string(),
            classes,
            entities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::GraphClient;
    use crate::control::cancel_pair;
    use crate::error::GraphError;
    use crate::queries::fixtures::dependency_graph;
    use ripple_core::{Finding, GraphBuilder, RiskLevel};

    async fn imported(findings: Vec<Finding>) -> GraphClient {
        let client = GraphClient::in_memory();
        let output = GraphBuilder::java().build(findings);
        client.import(&output).await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_end_to_end_entity_impact() {
        let client = imported(vec![
            Finding::new("UserDao#find:10", "SELECT * FROM users WHERE id=?", Severity::Low),
            Finding::new("OrderDao#create:20", "INSERT INTO orders(user_id) VALUES(?)", Severity::Low),
        ])
        .await;

        let impact = client
            .analyzer()
            .analyze_entity_impact("users", &QueryControl::none())
            .await
            .unwrap();
        assert!(impact.found);
        assert_eq!(impact.affected_files, vec!["UserDao.java".to_string()]);
        assert_eq!(impact.affected_classes, 1);
        assert_eq!(impact.affected_methods, 1);
        assert_eq!(impact.risk.level, RiskLevel::Low);
        assert_eq!(impact.access_patterns.get(&AccessOperation::Read), Some(&1));
    }

    #[tokio::test]
    async fn test_entity_impact_groups_issues() {
        let client = imported(vec![
            Finding::new("UserDao#find:10", "SELECT * FROM users", Severity::High)
                .with_issue("full_scan"),
            Finding::new("UserDao#save:30", "UPDATE users SET name = ?", Severity::Critical)
                .with_issue("missing_where"),
            Finding::new("AuditDao#log:5", "INSERT INTO users_audit VALUES (?)", Severity::Low),
        ])
        .await;

        let impact = client
            .analyzer()
            .analyze_entity_impact("USERS", &QueryControl::none())
            .await
            .unwrap();
        assert_eq!(impact.affected_files, vec!["UserDao.java".to_string()]);
        assert_eq!(impact.affected_methods, 2);
        assert_eq!(impact.issue_count(), 2);
        assert_eq!(impact.issues_by_severity[&Severity::Critical][0].kind, "missing_where");
        assert_eq!(impact.access_patterns[&AccessOperation::Write], 1);
    }

    #[tokio::test]
    async fn test_absent_entity_is_empty_not_error() {
        let client = GraphClient::in_memory();
        let impact = client
            .analyzer()
            .analyze_entity_impact("ghosts", &QueryControl::none())
            .await
            .unwrap();
        assert!(!impact.found);
        assert!(impact.affected_files.is_empty());
        assert_eq!(impact.risk.level, RiskLevel::Minimal);
    }

    #[tokio::test]
    async fn test_file_impact_records_minimal_depth() {
        // A <- B <- C <- D and a shortcut A <- D.
        let (client, _) = dependency_graph(
            &["A", "B", "C", "D"],
            &[("B", "A"), ("C", "B"), ("D", "C"), ("D", "A")],
        )
        .await;
        let impact = client
            .analyzer()
            .analyze_file_impact("A", &FileImpactOptions::default(), &QueryControl::none())
            .await
            .unwrap();
        assert_eq!(impact.depth_of("B"), Some(1));
        assert_eq!(impact.depth_of("D"), Some(1));
        assert_eq!(impact.depth_of("C"), Some(2));
        assert_eq!(impact.depth_of("A"), None);
        assert_eq!(impact.risk.level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn test_file_impact_respects_depth_and_direction() {
        let (client, _) = dependency_graph(
            &["A", "B", "C", "D"],
            &[("A", "B"), ("B", "C"), ("C", "D")],
        )
        .await;
        let analyzer = client.analyzer();

        let forward = FileImpactOptions::default()
            .with_direction(ImpactDirection::Dependencies)
            .with_max_depth(2);
        let impact = analyzer
            .analyze_file_impact("A", &forward, &QueryControl::none())
            .await
            .unwrap();
        let paths: Vec<&str> = impact.affected_files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["B", "C"]);

        let direct = FileImpactOptions::direct_only().with_direction(ImpactDirection::Dependencies);
        let impact = analyzer
            .analyze_file_impact("A", &direct, &QueryControl::none())
            .await
            .unwrap();
        assert_eq!(impact.affected_files.len(), 1);

        // Nothing depends on A.
        let impact = analyzer
            .analyze_file_impact("A", &FileImpactOptions::default(), &QueryControl::none())
            .await
            .unwrap();
        assert!(impact.found);
        assert!(impact.affected_files.is_empty());
    }

    #[tokio::test]
    async fn test_file_impact_terminates_on_cycles() {
        let (client, _) =
            dependency_graph(&["A", "B", "C"], &[("A", "B"), ("B", "C"), ("C", "A")]).await;
        let options = FileImpactOptions::default().with_max_depth(50);
        let impact = client
            .analyzer()
            .analyze_file_impact("A", &options, &QueryControl::none())
            .await
            .unwrap();
        assert_eq!(impact.affected_files.len(), 2);
    }

    #[tokio::test]
    async fn test_absent_file_is_empty() {
        let client = GraphClient::in_memory();
        let impact = client
            .analyzer()
            .analyze_file_impact("Nope.java", &FileImpactOptions::default(), &QueryControl::none())
            .await
            .unwrap();
        assert!(!impact.found);
        assert_eq!(impact.risk.level, RiskLevel::Minimal);
    }

    #[tokio::test]
    async fn test_cancelled_query_returns_no_result() {
        let (client, _) = dependency_graph(&["A", "B"], &[("B", "A")]).await;
        let (handle, signal) = cancel_pair();
        handle.cancel();
        let err = client
            .analyzer()
            .analyze_file_impact(
                "A",
                &FileImpactOptions::default(),
                &QueryControl::none().with_cancel(signal),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::QueryCancelled));
    }

    #[tokio::test]
    async fn test_store_outage_propagates() {
        let (client, store) = dependency_graph(&["A"], &[]).await;
        store.fail_next(1);
        let err = client
            .analyzer()
            .analyze_entity_impact("users", &QueryControl::none())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_class_dependencies() {
        let client = imported(vec![
            Finding::new("UserDao#find:10", "SELECT * FROM users u JOIN roles r ON u.id = r.uid", Severity::Low),
            Finding::new("UserDao#save:30", "UPDATE users SET name = ?", Severity::Low),
            Finding::new("OrderDao#create:20", "INSERT INTO orders VALUES (?)", Severity::Low),
        ])
        .await;

        let deps = client
            .analyzer()
            .analyze_class_dependencies("UserDao", &QueryControl::none())
            .await
            .unwrap();
        assert!(deps.found());
        let names: Vec<&str> = deps.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["users", "roles"]);
        assert_eq!(deps.entities[0].query_count, 2);
        assert_eq!(
            deps.entities[0].operations,
            BTreeSet::from([AccessOperation::Read, AccessOperation::Write])
        );

        let missing = client
            .analyzer()
            .analyze_class_dependencies("Nobody", &QueryControl::none())
            .await
            .unwrap();
        assert!(!missing.found());
        assert!(missing.entities.is_empty());
    }
}
