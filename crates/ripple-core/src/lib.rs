//! # Ripple Core
//!
//! Graph model and builder for query-impact analysis.
//!
//! Turns the flat findings produced by source-code analyzers into a
//! deduplicated set of typed nodes and relationships, ready to be
//! merged into a graph store.

pub mod builder;
pub mod error;
pub mod finding;
pub mod location;
pub mod model;
pub mod query_text;
pub mod risk;

pub use builder::{BuildOutput, GraphBuilder, SkippedFinding};
pub use error::{CoreError, CoreResult};
pub use finding::{Finding, FindingIssue, GraphLink, Severity};
pub use location::{LocationParser, PythonLocationParser, QualifiedLocationParser, SourceLocation};
pub use model::{
    AccessOperation, ClassNode, EntityNode, FileNode, IssueNode, MethodNode, Node, NodeKey,
    NodeKind, Properties, PropertyValue, QueryNode, QueryType, RelationshipKey, Relationship,
    RelationshipType, StoreKind,
};
pub use risk::{RiskAssessment, RiskLevel};
