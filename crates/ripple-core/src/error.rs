//! Error types for graph construction.

use thiserror::Error;

/// Errors raised while validating or transforming findings.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Malformed finding: {reason}")]
    MalformedFinding { reason: String },

    #[error("Unparseable source location: {0}")]
    UnparseableLocation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a malformed finding error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFinding {
            reason: reason.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
