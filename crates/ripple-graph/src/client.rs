//! Graph store client: schema setup, batched writes and transactions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use ripple_core::{BuildOutput, Node, Relationship};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{AnalysisConfig, BatchConfig, RippleConfig};
use crate::error::{GraphError, GraphResult};
use crate::queries::ImpactAnalyzer;
use crate::schema;
use crate::store::memory::MemoryGraphStore;
use crate::store::neo4j::Neo4jGraphStore;
use crate::store::{GraphStore, StoreTransaction, UpsertStats};

pub use crate::store::GraphCounts;

/// Summary of an import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub relationships_created: usize,
    pub relationships_updated: usize,
    /// Relationships dropped because an endpoint node was never written.
    pub missing_endpoints: usize,
    /// Findings the builder skipped.
    pub skipped: usize,
    /// One entry per chunk that failed and was not written.
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ImportReport {
    fn started(output: &BuildOutput) -> Self {
        let now = Utc::now();
        Self {
            nodes_created: 0,
            nodes_updated: 0,
            relationships_created: 0,
            relationships_updated: 0,
            missing_endpoints: 0,
            skipped: output.skipped_count(),
            errors: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    fn add_nodes(&mut self, stats: UpsertStats) {
        self.nodes_created += stats.created;
        self.nodes_updated += stats.updated;
    }

    fn add_relationships(&mut self, stats: UpsertStats) {
        self.relationships_created += stats.created;
        self.relationships_updated += stats.updated;
        self.missing_endpoints += stats.missing_endpoints;
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.missing_endpoints == 0
    }
}

/// One chunk of a batched write.
#[derive(Clone, Copy)]
enum Chunk<'a> {
    Nodes(&'a [Node]),
    Relationships(&'a [Relationship]),
}

impl Chunk<'_> {
    async fn write(self, tx: &mut dyn StoreTransaction) -> GraphResult<UpsertStats> {
        match self {
            Chunk::Nodes(nodes) => tx.upsert_nodes(nodes).await,
            Chunk::Relationships(rels) => tx.upsert_relationships(rels).await,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Chunk::Nodes(_) => "node",
            Chunk::Relationships(_) => "relationship",
        }
    }
}

/// Client over any [`GraphStore`].
#[derive(Clone)]
pub struct GraphClient {
    store: Arc<dyn GraphStore>,
    batch: BatchConfig,
    analysis: AnalysisConfig,
}

impl GraphClient {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            batch: BatchConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }

    /// Connect to Neo4j using the given configuration.
    pub async fn connect(config: &RippleConfig) -> GraphResult<Self> {
        config.validate()?;
        let store = Neo4jGraphStore::connect(&config.graph).await?;
        Ok(Self::new(Arc::new(store))
            .with_batch_config(config.batch.clone())
            .with_analysis_config(config.analysis.clone()))
    }

    /// A client over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryGraphStore::new()))
    }

    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_analysis_config(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Impact analyzer over the same store.
    pub fn analyzer(&self) -> ImpactAnalyzer {
        ImpactAnalyzer::new(Arc::clone(&self.store)).with_config(self.analysis.clone())
    }

    /// Create constraints and indexes. Safe to call repeatedly.
    pub async fn init_schema(&self) -> GraphResult<()> {
        schema::initialize_schema(self.store.as_ref()).await
    }

    /// Upsert nodes in chunks of `batch_size`, one transaction per chunk.
    ///
    /// Returns the number of nodes newly created. Stops at the first failing
    /// chunk; chunks committed before it stay committed.
    pub async fn batch_create_nodes(&self, nodes: &[Node], batch_size: usize) -> GraphResult<usize> {
        check_batch_size(batch_size)?;
        let mut created = 0;
        for chunk in nodes.chunks(batch_size) {
            created += self.commit_chunk(Chunk::Nodes(chunk)).await?.created;
        }
        Ok(created)
    }

    /// Upsert relationships in chunks of `batch_size`, one transaction per chunk.
    ///
    /// Relationships whose endpoints do not exist are not created and not
    /// counted.
    pub async fn batch_create_relationships(
        &self,
        relationships: &[Relationship],
        batch_size: usize,
    ) -> GraphResult<usize> {
        check_batch_size(batch_size)?;
        let mut created = 0;
        for chunk in relationships.chunks(batch_size) {
            created += self.commit_chunk(Chunk::Relationships(chunk)).await?.created;
        }
        Ok(created)
    }

    /// Run `work` in one transaction: commit on success, roll back and
    /// return the error on failure.
    pub async fn run_in_transaction<T, F>(&self, work: F) -> GraphResult<T>
    where
        F: for<'t> FnOnce(&'t mut dyn StoreTransaction) -> BoxFuture<'t, GraphResult<T>>,
    {
        let mut tx = self.store.begin().await?;
        let result = work(tx.as_mut()).await;
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Import a built graph: all nodes first, then all relationships.
    ///
    /// Each chunk is its own transaction. A failing chunk is recorded in the
    /// report and the import moves on, except when the store stays
    /// unavailable after the retry, which aborts the import.
    pub async fn import(&self, output: &BuildOutput) -> GraphResult<ImportReport> {
        let mut report = ImportReport::started(output);
        info!(
            backend = self.store.backend(),
            nodes = output.nodes.len(),
            relationships = output.relationships.len(),
            "Starting graph import"
        );

        let batch_size = self.batch.batch_size;
        check_batch_size(batch_size)?;
        let node_chunks = output.nodes.chunks(batch_size).map(Chunk::Nodes);
        let rel_chunks = output.relationships.chunks(batch_size).map(Chunk::Relationships);
        for (index, chunk) in node_chunks.chain(rel_chunks).enumerate() {
            match self.commit_chunk(chunk).await {
                Ok(stats) => match chunk {
                    Chunk::Nodes(_) => report.add_nodes(stats),
                    Chunk::Relationships(_) => report.add_relationships(stats),
                },
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(chunk = index, kind = chunk.describe(), error = %e, "Chunk failed, continuing");
                    report
                        .errors
                        .push(format!("{} chunk {}: {}", chunk.describe(), index, e));
                }
            }
        }

        report.finished_at = Utc::now();
        info!(
            nodes_created = report.nodes_created,
            nodes_updated = report.nodes_updated,
            relationships_created = report.relationships_created,
            relationships_updated = report.relationships_updated,
            missing_endpoints = report.missing_endpoints,
            failed_chunks = report.errors.len(),
            "Graph import complete"
        );
        Ok(report)
    }

    /// Import a built graph in a single transaction: all or nothing.
    pub async fn import_atomic(&self, output: &BuildOutput) -> GraphResult<ImportReport> {
        let mut report = ImportReport::started(output);
        let batch_size = self.batch.batch_size;
        check_batch_size(batch_size)?;
        let nodes = output.nodes.clone();
        let relationships = output.relationships.clone();

        let (node_stats, rel_stats) = self
            .run_in_transaction(move |tx| {
                Box::pin(async move {
                    let mut node_stats = UpsertStats::default();
                    for chunk in nodes.chunks(batch_size) {
                        node_stats.add(tx.upsert_nodes(chunk).await?);
                    }
                    let mut rel_stats = UpsertStats::default();
                    for chunk in relationships.chunks(batch_size) {
                        rel_stats.add(tx.upsert_relationships(chunk).await?);
                    }
                    Ok((node_stats, rel_stats))
                })
            })
            .await?;

        report.add_nodes(node_stats);
        report.add_relationships(rel_stats);
        report.finished_at = Utc::now();
        info!(
            nodes_created = report.nodes_created,
            relationships_created = report.relationships_created,
            "Atomic graph import complete"
        );
        Ok(report)
    }

    /// Remove files and everything they contain, ahead of re-importing them.
    /// Entities are shared across files and are kept.
    pub async fn clear_files(&self, paths: &[String]) -> GraphResult<usize> {
        let paths = paths.to_vec();
        let removed = self
            .run_in_transaction(move |tx| Box::pin(async move { tx.delete_file_subgraphs(&paths).await }))
            .await?;
        info!(removed, "Cleared file subgraphs");
        Ok(removed)
    }

    /// Node and relationship counts.
    pub async fn counts(&self) -> GraphResult<GraphCounts> {
        self.store.counts().await
    }

    /// Commit one chunk, retrying once after the backoff if the store is unavailable.
    async fn commit_chunk(&self, chunk: Chunk<'_>) -> GraphResult<UpsertStats> {
        match self.try_commit_chunk(chunk).await {
            Err(e) if e.is_transient() => {
                warn!(
                    kind = chunk.describe(),
                    backoff_ms = self.batch.retry_backoff_ms,
                    error = %e,
                    "Store unavailable, retrying chunk once"
                );
                tokio::time::sleep(self.batch.retry_backoff()).await;
                self.try_commit_chunk(chunk).await
            }
            other => other,
        }
    }

    async fn try_commit_chunk(&self, chunk: Chunk<'_>) -> GraphResult<UpsertStats> {
        let mut tx = self.store.begin().await?;
        match chunk.write(tx.as_mut()).await {
            Ok(stats) => {
                tx.commit().await?;
                Ok(stats)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

fn check_batch_size(batch_size: usize) -> GraphResult<()> {
    if batch_size == 0 {
        return Err(GraphError::config("batch size must be at least 1"));
    }
    Ok(())
}
