//! Error types for store access and impact queries.

use std::time::Duration;

use ripple_core::{CoreError, NodeKind};
use thiserror::Error;

/// Errors raised by the graph store client and the impact analyzer.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Schema conflict: key '{key}' belongs to a {existing} node, cannot write it as {attempted}")]
    SchemaConflict {
        key: String,
        existing: String,
        attempted: NodeKind,
    },

    #[error("Query timed out after {0:?}")]
    QueryTimeout(Duration),

    #[error("Query cancelled")]
    QueryCancelled,

    #[error("Graph query failed: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

impl GraphError {
    /// Create a store unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a query error.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GraphError::StoreUnavailable(_))
    }
}
