//! # Ripple Graph
//!
//! Graph store persistence and impact analysis.
//!
//! Provides the store capability contract with Neo4j and in-memory
//! backends, batched transactional import of built graphs, and the
//! read-only impact queries that run over the persisted graph.

pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod queries;
pub mod schema;
pub mod store;

pub use client::{GraphClient, GraphCounts, ImportReport};
pub use config::{AnalysisConfig, BatchConfig, GraphConfig, RippleConfig};
pub use control::{cancel_pair, CancelHandle, CancelSignal, QueryControl};
pub use error::{GraphError, GraphResult};
pub use queries::{
    AffectedFile, ChainLookup, ClassDependencies, DependencyChain, DependencyCycle,
    EntityImpact, EntityUsage, FileImpact, FileImpactOptions, ImpactAnalyzer, ImpactDirection,
    IssueSummary, RiskyFile, RiskyFilesQuery,
};
pub use store::memory::MemoryGraphStore;
pub use store::neo4j::Neo4jGraphStore;
pub use store::{GraphStore, StoreTransaction};
