//! PCJ optimizer: the end-to-end optimization pass
//!
//! Wires the pipeline together: extract the query's pattern graph, enumerate
//! embeddings for every catalog index, select a conflict-free subset, rewrite
//! the tree, validate. The pass is synchronous, CPU-bound, and touches no
//! shared mutable state: the catalog snapshot is owned, the input tree is
//! never mutated, and a caller can discard the result at any time.
//!
//! Every failure is recoverable by falling back to direct evaluation: the
//! returned plan is then the caller's own `Arc`, not a copy, so "unchanged"
//! is pointer-checkable. An unvalidated tree is never returned.

use crate::algebra::Algebra;
use crate::catalog::{IndexCatalog, IndexId};
use crate::error::PcjError;
use crate::matcher::{Match, SubgraphMatcher};
use crate::rewriter::PlanRewriter;
use crate::selector::CandidateSelector;
use crate::validator::PlanValidator;
use serde::Serialize;
use std::sync::Arc;
use tessera_db_core::PatternGraph;
use tracing::{debug, info, warn};

/// How validator failures are handled
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValidationMode {
    /// Any validator failure rejects the whole optimization
    #[default]
    Strict,
    /// On failure, retry with the lowest-preference match dropped until the
    /// plan validates or no matches remain
    Lenient,
}

/// Options for one optimization pass
#[derive(Clone, Debug, Default)]
pub struct OptimizerOptions {
    /// Explicit priority order over indexes; the catalog's registration
    /// order when absent
    pub priority: Option<Vec<IndexId>>,
    /// Strict or lenient validation
    pub mode: ValidationMode,
}

impl OptimizerOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit index priority order
    pub fn with_priority(mut self, priority: Vec<IndexId>) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Use lenient validation
    pub fn lenient(mut self) -> Self {
        self.mode = ValidationMode::Lenient;
        self
    }
}

/// One index applied by an accepted rewrite
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct AppliedIndex {
    /// The index
    pub index: IndexId,
    /// How many query patterns it answers
    pub covered_patterns: usize,
}

/// Why an optimization pass fell back to the original plan
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub enum FallbackReason {
    /// The tree contains no statement patterns to match
    NoPatterns,
    /// No index embeds into the query
    NoMatches,
    /// The rewriter detected a programming error
    InvariantViolation(String),
    /// The rewritten plan failed validation
    ValidationFailed(Vec<String>),
}

/// Diagnostic record of one optimization pass
#[derive(Clone, Debug, Serialize, Default)]
pub struct OptimizeReport {
    /// Indexes applied in the returned plan, in preference order
    pub applied: Vec<AppliedIndex>,
    /// Present when the original plan was returned
    pub fallback: Option<FallbackReason>,
}

impl OptimizeReport {
    /// Check whether a rewrite was applied
    pub fn is_optimized(&self) -> bool {
        self.fallback.is_none() && !self.applied.is_empty()
    }
}

/// Result of one optimization pass: a plan safe to execute plus diagnostics
#[derive(Clone, Debug)]
pub struct OptimizeOutcome {
    /// The validated rewritten tree, or the caller's original tree
    pub plan: Arc<Algebra>,
    /// What happened
    pub report: OptimizeReport,
}

/// The optimization pass over one catalog snapshot
pub struct PcjOptimizer {
    catalog: IndexCatalog,
    options: OptimizerOptions,
}

impl PcjOptimizer {
    /// Create an optimizer with default options
    pub fn new(catalog: IndexCatalog) -> Self {
        Self::with_options(catalog, OptimizerOptions::default())
    }

    /// Create an optimizer with explicit options
    pub fn with_options(catalog: IndexCatalog, options: OptimizerOptions) -> Self {
        Self { catalog, options }
    }

    /// Optimize a query tree
    ///
    /// Returns either a validated rewritten tree or the original `Arc`
    /// unchanged, never a partial or unvalidated tree.
    pub fn optimize(&self, tree: &Arc<Algebra>) -> OptimizeOutcome {
        let graph = match tree.pattern_graph() {
            Ok(g) if !g.is_empty() => g,
            Ok(_) => return fallback(tree, FallbackReason::NoPatterns),
            Err(e) => {
                warn!(error = %e, "query tree has an inconsistent pattern graph");
                return fallback(tree, FallbackReason::InvariantViolation(e.to_string()));
            }
        };

        let mut candidates: Vec<Match> = Vec::new();
        for desc in self.catalog.descriptors() {
            let before = candidates.len();
            candidates.extend(SubgraphMatcher::new(desc, &graph).matches());
            debug!(
                index = %desc.id(),
                embeddings = candidates.len() - before,
                "matched index against query"
            );
        }
        if candidates.is_empty() {
            return fallback(tree, FallbackReason::NoMatches);
        }

        let priority: Vec<IndexId> = match &self.options.priority {
            Some(p) => p.clone(),
            None => self
                .catalog
                .descriptors()
                .iter()
                .map(|d| d.id().clone())
                .collect(),
        };
        let selection = CandidateSelector::new(priority).select(graph.len(), candidates);
        if selection.is_empty() {
            return fallback(tree, FallbackReason::NoMatches);
        }

        self.apply(tree, graph, selection.into_accepted())
    }

    /// Rewrite + validate, with the lenient retry loop
    fn apply(
        &self,
        tree: &Arc<Algebra>,
        graph: PatternGraph,
        mut accepted: Vec<Match>,
    ) -> OptimizeOutcome {
        let rewriter = PlanRewriter::new(&graph);
        let validator = PlanValidator::new(graph.clone());

        while !accepted.is_empty() {
            let plan = match rewriter.rewrite(tree, &accepted) {
                Ok(plan) => plan,
                Err(PcjError::InvariantViolation(msg)) => {
                    warn!(%msg, "plan rewrite violated an invariant; falling back");
                    return fallback(tree, FallbackReason::InvariantViolation(msg));
                }
                Err(e) => {
                    warn!(error = %e, "plan rewrite failed; falling back");
                    return fallback(tree, FallbackReason::InvariantViolation(e.to_string()));
                }
            };

            let outcome = validator.validate(&plan);
            if outcome.is_valid() {
                let applied: Vec<AppliedIndex> = accepted
                    .iter()
                    .map(|m| AppliedIndex {
                        index: m.index_id().clone(),
                        covered_patterns: m.covered_len(),
                    })
                    .collect();
                info!(indexes = applied.len(), "applied precomputed join rewrite");
                return OptimizeOutcome {
                    plan,
                    report: OptimizeReport {
                        applied,
                        fallback: None,
                    },
                };
            }

            let failures: Vec<String> =
                outcome.failures().iter().map(|f| f.to_string()).collect();
            match self.options.mode {
                ValidationMode::Strict => {
                    warn!(?failures, "rewritten plan failed validation; falling back");
                    return fallback(tree, FallbackReason::ValidationFailed(failures));
                }
                ValidationMode::Lenient => {
                    let dropped = accepted.pop().expect("accepted is non-empty");
                    warn!(
                        index = %dropped.index_id(),
                        ?failures,
                        "rewritten plan failed validation; retrying without lowest-preference match"
                    );
                    if accepted.is_empty() {
                        return fallback(tree, FallbackReason::ValidationFailed(failures));
                    }
                }
            }
        }

        fallback(tree, FallbackReason::NoMatches)
    }
}

fn fallback(tree: &Arc<Algebra>, reason: FallbackReason) -> OptimizeOutcome {
    OptimizeOutcome {
        plan: Arc::clone(tree),
        report: OptimizeReport {
            applied: Vec::new(),
            fallback: Some(reason),
        },
    }
}
