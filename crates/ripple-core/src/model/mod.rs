//! Graph data model.
//!
//! Node and relationship types plus the identity rules that make graph
//! construction idempotent: every node is identified by a [`NodeKey`]
//! derived from its natural key, and every relationship by the
//! `(source, target, type)` triple.

mod node;
mod relationship;

pub use node::{
    ClassNode, EntityNode, FileNode, IssueNode, MethodNode, Node, NodeKey, NodeKind, Properties,
    PropertyValue, QueryNode, QueryType, StoreKind,
};
pub use relationship::{AccessOperation, Relationship, RelationshipKey, RelationshipType};
