//! Precomputed-join (PCJ) query optimization core.
//!
//! Rewrites a query's algebra tree so that sub-patterns covered by a
//! precomputed join index are answered from the index's materialized results
//! instead of being re-evaluated against the full dataset, then validates the
//! rewritten plan before it is handed to the executor.
//!
//! Pipeline: [`matcher::SubgraphMatcher`] finds every embedding of each
//! catalog index into the query's pattern graph, [`selector::CandidateSelector`]
//! picks a deterministic conflict-free subset, [`rewriter::PlanRewriter`]
//! splices index-scan nodes into a structurally-shared copy of the tree, and
//! [`validator::PlanValidator`] checks the result. Any failure falls back to
//! the caller's original tree, untouched.

pub mod algebra;
pub mod catalog;
pub mod error;
pub mod matcher;
pub mod memory;
pub mod operator;
pub mod optimizer;
pub mod rewriter;
pub mod scan;
pub mod selector;
pub mod validator;

pub use algebra::{Algebra, CompareOp, FilterExpr, FilterOperand, IndexScanSpec};
pub use catalog::{IndexCatalog, IndexDescriptor, IndexId, PcjCursor, PcjSource};
pub use error::{PcjError, Result};
pub use matcher::{Match, SubgraphMatcher};
pub use memory::{MemoryPcjIndex, MemoryPcjStore};
pub use operator::{Operator, OperatorState};
pub use optimizer::{
    AppliedIndex, FallbackReason, OptimizeOutcome, OptimizeReport, OptimizerOptions,
    PcjOptimizer, ValidationMode,
};
pub use rewriter::PlanRewriter;
pub use scan::IndexScanOperator;
pub use selector::{CandidateSelector, Selection};
pub use validator::{PlanValidator, ValidationFailure, ValidationOutcome};
