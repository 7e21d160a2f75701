//! Impact analysis over the persisted graph.
//!
//! Every operation is read-only and bounded by an explicit depth or limit.
//! Store round-trips run under the caller's [`QueryControl`]; traversal
//! bookkeeping (visited sets, parents, ordering) happens here so results
//! are identical on every backend.

pub mod impact;
pub mod paths;
pub mod risky;

use std::sync::Arc;

pub use impact::{
    AffectedFile, ClassDependencies, EntityImpact, EntityUsage, FileImpact, FileImpactOptions,
    ImpactDirection, IssueSummary,
};
pub use paths::{ChainLookup, DependencyChain, DependencyCycle};
pub use risky::{RiskyFile, RiskyFilesQuery};

use crate::config::AnalysisConfig;
use crate::control::QueryControl;
use crate::store::GraphStore;

/// Read-only impact queries. Cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct ImpactAnalyzer {
    store: Arc<dyn GraphStore>,
    config: AnalysisConfig,
}

impl ImpactAnalyzer {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            config: AnalysisConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// File impact options using the configured depth.
    pub fn default_file_options(&self) -> FileImpactOptions {
        FileImpactOptions {
            max_depth: self.config.max_depth,
            ..FileImpactOptions::default()
        }
    }

    /// Risky-files query using the configured limit.
    pub fn default_risky_query(&self) -> RiskyFilesQuery {
        RiskyFilesQuery {
            limit: self.config.risky_files_limit,
            ..RiskyFilesQuery::default()
        }
    }

    /// The caller's control, with the configured timeout when it has none.
    fn effective_control(&self, control: &QueryControl) -> QueryControl {
        match (control.timeout(), self.config.query_timeout()) {
            (None, Some(timeout)) => control.clone().with_timeout(timeout),
            _ => control.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use ripple_core::{FileNode, Node, Relationship, RelationshipType};

    use crate::client::GraphClient;
    use crate::store::memory::MemoryGraphStore;

    /// A memory-backed client holding the given files and `DEPENDS_ON` edges.
    pub(crate) async fn dependency_graph(
        files: &[&str],
        edges: &[(&str, &str)],
    ) -> (GraphClient, MemoryGraphStore) {
        let store = MemoryGraphStore::new();
        let client = GraphClient::new(Arc::new(store.clone()));
        let nodes: Vec<Node> = files
            .iter()
            .map(|f| Node::File(FileNode::new(*f, "java", true)))
            .collect();
        let rels: Vec<Relationship> = edges
            .iter()
            .map(|(from, to)| Relationship::new((*from).into(), (*to).into(), RelationshipType::DependsOn))
            .collect();
        client.batch_create_nodes(&nodes, 100).await.unwrap();
        client.batch_create_relationships(&rels, 100).await.unwrap();
        (client, store)
    }
}
