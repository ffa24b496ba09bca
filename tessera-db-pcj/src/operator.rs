//! Operator trait and lifecycle states for plan execution
//!
//! Execution operators follow the `open`/`next_batch`/`close` pull cycle:
//! open once, pull batches until `None`, close. This crate only ships the
//! index-scan operator; raw pattern scans and joins belong to the executor
//! that consumes the optimized plan.

use crate::error::Result;
use async_trait::async_trait;
use tessera_db_core::{Batch, VarId};

/// Query execution operator
///
/// # Schema contract
///
/// `schema()` is fixed at construction; every batch's columns are in schema
/// order with no duplicate variables.
///
/// # Restarting
///
/// `open` may be called again after `close` to rescan from the start, which
/// nested-loop joins rely on. Calling `next_batch` outside the open state is
/// an error, not a silent empty result.
#[async_trait]
pub trait Operator: Send {
    /// Output variables, in column order
    fn schema(&self) -> &[VarId];

    /// Initialize (or re-initialize) operator state
    async fn open(&mut self) -> Result<()>;

    /// Pull the next batch, or None when exhausted
    async fn next_batch(&mut self) -> Result<Option<Batch>>;

    /// Release resources
    fn close(&mut self);
}

/// Boxed operator for dynamic dispatch
pub type BoxedOperator = Box<dyn Operator + Send>;

/// Lifecycle state for operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    /// Never opened
    Created,
    /// Producing batches
    Open,
    /// next_batch returned None
    Exhausted,
    /// Closed; may be reopened for a rescan
    Closed,
}

impl OperatorState {
    /// Check if open() is legal from this state
    pub fn can_open(&self) -> bool {
        matches!(self, OperatorState::Created | OperatorState::Closed)
    }

    /// Check if next_batch() is legal from this state
    pub fn can_next(&self) -> bool {
        matches!(self, OperatorState::Open)
    }
}
