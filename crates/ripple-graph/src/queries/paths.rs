//! Dependency chains and cycles over `DEPENDS_ON`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use super::ImpactAnalyzer;
use crate::control::QueryControl;
use crate::error::GraphResult;
use crate::store::EdgeDirection;

/// Files along one dependency path, from start to target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyChain {
    pub files: Vec<String>,
}

impl DependencyChain {
    /// Number of `DEPENDS_ON` hops.
    pub fn length(&self) -> usize {
        self.files.len().saturating_sub(1)
    }
}

/// Outcome of a chain lookup. Absence is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainLookup {
    Found(DependencyChain),
    NotFound,
}

impl ChainLookup {
    pub fn chain(&self) -> Option<&DependencyChain> {
        match self {
            ChainLookup::Found(chain) => Some(chain),
            ChainLookup::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, ChainLookup::Found(_))
    }
}

/// One elementary dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyCycle {
    /// Member files in traversal order; the last depends on the first.
    pub files: Vec<String>,
    pub length: usize,
}

impl DependencyCycle {
    fn new(files: Vec<String>) -> Self {
        let length = files.len();
        Self { files, length }
    }

    /// The rotation starting at the smallest path, shared by every
    /// discovery of the same cycle.
    fn canonical(&self) -> Vec<String> {
        let start = self
            .files
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or_default();
        let mut rotated = self.files[start..].to_vec();
        rotated.extend_from_slice(&self.files[..start]);
        rotated
    }
}

impl ImpactAnalyzer {
    /// Shortest `DEPENDS_ON` path from `start_file` to `target_file` within
    /// `max_depth` hops. Neighbors are expanded in path order, so among
    /// several shortest paths the lexicographically first parent wins.
    pub async fn trace_dependency_chain(
        &self,
        start_file: &str,
        target_file: &str,
        max_depth: usize,
        control: &QueryControl,
    ) -> GraphResult<ChainLookup> {
        let control = self.effective_control(control);
        let scope = control.start();

        if !scope.run(self.store.file_exists(start_file)).await? {
            return Ok(ChainLookup::NotFound);
        }
        if start_file == target_file {
            return Ok(ChainLookup::Found(DependencyChain {
                files: vec![start_file.to_string()],
            }));
        }
        if !scope.run(self.store.file_exists(target_file)).await? {
            return Ok(ChainLookup::NotFound);
        }

        let mut parents: HashMap<String, String> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::from([start_file.to_string()]);
        let mut frontier = vec![start_file.to_string()];
        for _ in 0..max_depth {
            if frontier.is_empty() {
                break;
            }
            let mut pairs = scope
                .run(self.store.dependency_neighbors(&frontier, EdgeDirection::Outgoing))
                .await?;
            pairs.sort();
            let mut next = Vec::new();
            for (from, to) in pairs {
                if !visited.insert(to.clone()) {
                    continue;
                }
                parents.insert(to.clone(), from);
                if to == target_file {
                    let chain = unwind(&parents, start_file, to);
                    debug!(start = start_file, target = target_file, hops = chain.length(), "Chain found");
                    return Ok(ChainLookup::Found(chain));
                }
                next.push(to);
            }
            frontier = next;
        }
        Ok(ChainLookup::NotFound)
    }

    /// Every elementary dependency cycle, each reported once and starting
    /// at its smallest file path.
    pub async fn find_circular_dependencies(
        &self,
        control: &QueryControl,
    ) -> GraphResult<Vec<DependencyCycle>> {
        let control = self.effective_control(control);
        let scope = control.start();

        let edges = scope.run(self.store.dependency_edges()).await?;
        let mut adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (source, target) in edges {
            adjacency.entry(source).or_default().insert(target);
        }
        let cycles = elementary_cycles(&adjacency);
        debug!(cycles = cycles.len(), "Circular dependencies detected");
        Ok(cycles)
    }
}

fn unwind(parents: &HashMap<String, String>, start: &str, target: String) -> DependencyChain {
    let mut files = vec![target];
    while let Some(last) = files.last() {
        if last == start {
            break;
        }
        match parents.get(last) {
            Some(parent) => files.push(parent.clone()),
            None => break,
        }
    }
    files.reverse();
    DependencyChain { files }
}

/// Johnson's circuit search: for each start node in sorted order, walk
/// only nodes not smaller than it, blocking nodes that cannot currently
/// reach the start. Every elementary cycle is found once, beginning at its
/// smallest member.
fn elementary_cycles(adjacency: &BTreeMap<String, BTreeSet<String>>) -> Vec<DependencyCycle> {
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut cycles = Vec::new();
    for start in adjacency.keys() {
        let mut search = CircuitSearch {
            adjacency,
            start: start.as_str(),
            path: Vec::new(),
            blocked: HashSet::new(),
            blocked_by: HashMap::new(),
            found: Vec::new(),
        };
        search.circuit(start.as_str());
        for files in search.found {
            let cycle = DependencyCycle::new(files);
            if seen.insert(cycle.canonical()) {
                cycles.push(cycle);
            }
        }
    }
    cycles
}

struct CircuitSearch<'a> {
    adjacency: &'a BTreeMap<String, BTreeSet<String>>,
    start: &'a str,
    path: Vec<&'a str>,
    blocked: HashSet<&'a str>,
    blocked_by: HashMap<&'a str, HashSet<&'a str>>,
    found: Vec<Vec<String>>,
}

impl<'a> CircuitSearch<'a> {
    fn circuit(&mut self, node: &'a str) -> bool {
        let mut closed = false;
        self.path.push(node);
        self.blocked.insert(node);

        for next in self.successors(node) {
            if next == self.start {
                self.found
                    .push(self.path.iter().map(|f| f.to_string()).collect());
                closed = true;
            } else if !self.blocked.contains(next) && self.circuit(next) {
                closed = true;
            }
        }

        if closed {
            self.unblock(node);
        } else {
            for next in self.successors(node) {
                self.blocked_by.entry(next).or_default().insert(node);
            }
        }
        self.path.pop();
        closed
    }

    fn unblock(&mut self, node: &'a str) {
        self.blocked.remove(node);
        if let Some(waiting) = self.blocked_by.remove(node) {
            for other in waiting {
                if self.blocked.contains(other) {
                    self.unblock(other);
                }
            }
        }
    }

    /// Successors of `node` that are not smaller than the start node.
    fn successors(&self, node: &str) -> Vec<&'a str> {
        children(self.adjacency, node)
            .map(String::as_str)
            .filter(|next| *next >= self.start)
            .collect()
    }
}

fn children<'a>(
    adjacency: &'a BTreeMap<String, BTreeSet<String>>,
    node: &str,
) -> std::collections::btree_set::Iter<'a, String> {
    static EMPTY: BTreeSet<String> = BTreeSet::new();
    adjacency.get(node).unwrap_or(&EMPTY).iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures::dependency_graph;

    fn graph(edges: &[(&str, &str)]) -> BTreeMap<String, BTreeSet<String>> {
        let mut adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (from, to) in edges {
            adjacency
                .entry(from.to_string())
                .or_default()
                .insert(to.to_string());
        }
        adjacency
    }

    #[test]
    fn test_three_cycle_reported_once() {
        let cycles = elementary_cycles(&graph(&[("A", "B"), ("B", "C"), ("C", "A")]));
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].length, 3);
        assert_eq!(cycles[0].files, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let cycles = elementary_cycles(&graph(&[("A", "B"), ("B", "C"), ("A", "C")]));
        assert!(cycles.is_empty());
    }

    #[test]
    fn test_self_loop_and_two_cycles() {
        let cycles = elementary_cycles(&graph(&[
            ("A", "A"),
            ("B", "C"),
            ("C", "B"),
            ("C", "D"),
            ("D", "B"),
        ]));
        let found: Vec<Vec<String>> = cycles.iter().map(|c| c.files.clone()).collect();
        assert_eq!(
            found,
            vec![
                vec!["A".to_string()],
                vec!["B".to_string(), "C".to_string()],
                vec!["B".to_string(), "C".to_string(), "D".to_string()],
            ]
        );
    }

    #[test]
    fn test_cycle_through_finished_node_is_found() {
        let cycles = elementary_cycles(&graph(&[("A", "B"), ("A", "C"), ("B", "C"), ("C", "A")]));
        let found: Vec<Vec<String>> = cycles.iter().map(|c| c.files.clone()).collect();
        assert_eq!(
            found,
            vec![
                vec!["A".to_string(), "B".to_string(), "C".to_string()],
                vec!["A".to_string(), "C".to_string()],
            ]
        );
    }

    #[test]
    fn test_overlapping_cycles_are_all_enumerated() {
        // Complete digraph on three files: three 2-cycles and two 3-cycles.
        let cycles = elementary_cycles(&graph(&[
            ("A", "B"),
            ("B", "A"),
            ("B", "C"),
            ("C", "B"),
            ("A", "C"),
            ("C", "A"),
        ]));
        assert_eq!(cycles.len(), 5);
        assert_eq!(cycles.iter().filter(|c| c.length == 2).count(), 3);
        assert_eq!(cycles.iter().filter(|c| c.length == 3).count(), 2);
        for cycle in &cycles {
            assert_eq!(cycle.files.iter().min(), cycle.files.first());
        }
    }

    #[test]
    fn test_canonical_rotation() {
        let a = DependencyCycle::new(vec!["C".into(), "A".into(), "B".into()]);
        let b = DependencyCycle::new(vec!["A".into(), "B".into(), "C".into()]);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[tokio::test]
    async fn test_cycles_through_store() {
        let (client, _) =
            dependency_graph(&["A", "B", "C"], &[("A", "B"), ("B", "C"), ("C", "A")]).await;
        let cycles = client
            .analyzer()
            .find_circular_dependencies(&QueryControl::none())
            .await
            .unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].length, 3);
    }

    #[tokio::test]
    async fn test_shortest_chain() {
        // A -> B -> C -> D -> E, plus A -> X -> E.
        let (client, _) = dependency_graph(
            &["A", "B", "C", "D", "E", "X"],
            &[("A", "B"), ("B", "C"), ("C", "D"), ("D", "E"), ("A", "X"), ("X", "E")],
        )
        .await;
        let lookup = client
            .analyzer()
            .trace_dependency_chain("A", "E", 5, &QueryControl::none())
            .await
            .unwrap();
        let chain = lookup.chain().unwrap();
        assert_eq!(chain.files, vec!["A", "X", "E"]);
        assert_eq!(chain.length(), 2);
    }

    #[tokio::test]
    async fn test_chain_beyond_max_depth_is_not_found() {
        let (client, _) = dependency_graph(
            &["A", "B", "C", "D"],
            &[("A", "B"), ("B", "C"), ("C", "D")],
        )
        .await;
        let analyzer = client.analyzer();
        let lookup = analyzer
            .trace_dependency_chain("A", "D", 2, &QueryControl::none())
            .await
            .unwrap();
        assert_eq!(lookup, ChainLookup::NotFound);

        let lookup = analyzer
            .trace_dependency_chain("A", "D", 3, &QueryControl::none())
            .await
            .unwrap();
        assert_eq!(lookup.chain().map(DependencyChain::length), Some(3));
    }

    #[tokio::test]
    async fn test_chain_edge_cases() {
        let (client, _) = dependency_graph(&["A", "B"], &[("B", "A")]).await;
        let analyzer = client.analyzer();

        let same = analyzer
            .trace_dependency_chain("A", "A", 5, &QueryControl::none())
            .await
            .unwrap();
        assert_eq!(same.chain().map(DependencyChain::length), Some(0));

        // Edges are directed.
        let reverse = analyzer
            .trace_dependency_chain("A", "B", 5, &QueryControl::none())
            .await
            .unwrap();
        assert!(!reverse.is_found());

        let absent = analyzer
            .trace_dependency_chain("A", "Missing", 5, &QueryControl::none())
            .await
            .unwrap();
        assert_eq!(absent, ChainLookup::NotFound);
    }
}
