//! Error types for the PCJ optimization core

use crate::catalog::IndexId;
use tessera_db_core::{BatchError, CoreError};
use thiserror::Error;

/// Result type for PCJ operations
pub type Result<T> = std::result::Result<T, PcjError>;

/// PCJ optimization and scan errors
///
/// "No match" is not an error anywhere in this crate: the matcher returns an
/// empty sequence and the optimizer falls back to the original plan.
#[derive(Error, Debug)]
pub enum PcjError {
    /// Error from the core data model
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Batch construction error
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// The rewriter was asked to consume patterns no longer present in the
    /// tree. Programming error; the optimizer aborts and falls back.
    #[error("rewrite invariant violated: {0}")]
    InvariantViolation(String),

    /// An index referenced by a plan was dropped from its store
    #[error("index {0} was dropped from its store")]
    IndexDropped(IndexId),

    /// Storage-level failure while scanning a precomputed result set
    #[error("index scan failed: {0}")]
    Scan(String),

    /// Operator lifecycle misuse
    #[error("operator not opened - call open() before next_batch()")]
    OperatorNotOpened,

    /// Operator lifecycle misuse
    #[error("operator is closed")]
    OperatorClosed,
}

impl PcjError {
    /// Create an invariant-violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        PcjError::InvariantViolation(msg.into())
    }

    /// Create a scan error
    pub fn scan(msg: impl Into<String>) -> Self {
        PcjError::Scan(msg.into())
    }
}
