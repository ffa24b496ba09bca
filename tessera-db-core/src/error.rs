//! Error types for tessera-db-core

use crate::var_registry::VarId;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core data-model errors
#[derive(Error, Debug)]
pub enum CoreError {
    /// An exported variable does not occur in any pattern of the graph
    #[error("exported variable {0:?} does not appear in any pattern")]
    UnboundExported(VarId),

    /// A pattern set was empty where at least one pattern is required
    #[error("pattern graph has no patterns")]
    EmptyPatternGraph,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        CoreError::Other(msg.into())
    }
}
