//! Query algebra tree
//!
//! The parser hands the optimizer an [`Algebra`] tree of joins, filters, and
//! projections over statement-pattern leaves. Children are `Arc`ed: rewrites
//! build new nodes that share unchanged subtrees with the original, so a
//! failed rewrite leaves the caller's tree untouched and falling back is just
//! returning the original `Arc`.

use crate::catalog::{IndexDescriptor, IndexId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tessera_db_core::{
    CoreError, PatternGraph, StatementPattern, Value, VarId,
};

/// Comparison operator in a filter expression
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn test(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ord == Equal,
            CompareOp::Ne => ord != Equal,
            CompareOp::Lt => ord == Less,
            CompareOp::Le => ord != Greater,
            CompareOp::Gt => ord == Greater,
            CompareOp::Ge => ord != Less,
        }
    }
}

/// One side of a comparison
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterOperand {
    Var(VarId),
    Const(Value),
}

/// Filter expression over solution rows
///
/// Deliberately small: comparisons and conjunction cover everything the
/// rewriter needs to reason about (which variables a filter requires, and
/// whether it can ride on an index scan).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterExpr {
    /// Compare two operands
    Compare {
        op: CompareOp,
        lhs: FilterOperand,
        rhs: FilterOperand,
    },
    /// Conjunction of sub-expressions
    And(Vec<FilterExpr>),
}

impl FilterExpr {
    /// Convenience: `var op const`
    pub fn compare_const(op: CompareOp, var: VarId, value: Value) -> Self {
        FilterExpr::Compare {
            op,
            lhs: FilterOperand::Var(var),
            rhs: FilterOperand::Const(value),
        }
    }

    /// Collect the variables this expression references
    pub fn variables(&self) -> BTreeSet<VarId> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<VarId>) {
        match self {
            FilterExpr::Compare { lhs, rhs, .. } => {
                for operand in [lhs, rhs] {
                    if let FilterOperand::Var(v) = operand {
                        out.insert(*v);
                    }
                }
            }
            FilterExpr::And(exprs) => {
                for e in exprs {
                    e.collect_variables(out);
                }
            }
        }
    }

    /// Evaluate against a row
    ///
    /// A comparison referencing an unbound variable is false: the row is
    /// dropped, never passed through on a guess.
    pub fn evaluate<'a>(&'a self, lookup: &impl Fn(VarId) -> Option<&'a Value>) -> bool {
        match self {
            FilterExpr::Compare { op, lhs, rhs } => {
                let resolve = |operand: &'a FilterOperand| match operand {
                    FilterOperand::Var(v) => lookup(*v),
                    FilterOperand::Const(c) => Some(c),
                };
                match (resolve(lhs), resolve(rhs)) {
                    (Some(a), Some(b)) => op.test(a.cmp(b)),
                    _ => false,
                }
            }
            FilterExpr::And(exprs) => exprs.iter().all(|e| e.evaluate(lookup)),
        }
    }
}

/// An index scan spliced into a rewritten plan
///
/// Records which index answers the scan, how the index's variables rename to
/// the query's, exactly which query patterns the scan covers, and any filters
/// pushed down onto it. The covered pattern set is what lets the validator
/// re-derive the plan's total coverage without consulting the rewriter.
#[derive(Clone, Debug)]
pub struct IndexScanSpec {
    descriptor: Arc<IndexDescriptor>,
    /// (index var, query var) pairs, sorted by index var for determinism
    renaming: Vec<(VarId, VarId)>,
    /// Query-space patterns this scan answers
    covered: Vec<StatementPattern>,
    /// Filters applied during the scan (pushed down, never dropped)
    residual: Vec<FilterExpr>,
}

impl IndexScanSpec {
    /// Create a scan spec
    pub fn new(
        descriptor: Arc<IndexDescriptor>,
        mut renaming: Vec<(VarId, VarId)>,
        covered: Vec<StatementPattern>,
    ) -> Self {
        renaming.sort_unstable();
        Self {
            descriptor,
            renaming,
            covered,
            residual: Vec::new(),
        }
    }

    /// Add a pushed-down filter
    pub fn with_residual(mut self, filter: FilterExpr) -> Self {
        self.residual.push(filter);
        self
    }

    /// The index answering this scan
    pub fn descriptor(&self) -> &Arc<IndexDescriptor> {
        &self.descriptor
    }

    /// Id of the index answering this scan
    pub fn index_id(&self) -> &IndexId {
        self.descriptor.id()
    }

    /// The (index var, query var) renaming pairs
    pub fn renaming(&self) -> &[(VarId, VarId)] {
        &self.renaming
    }

    /// Query-space patterns covered by this scan
    pub fn covered(&self) -> &[StatementPattern] {
        &self.covered
    }

    /// Pushed-down filters
    pub fn residual(&self) -> &[FilterExpr] {
        &self.residual
    }

    /// Map an index variable to its query variable
    pub fn rename(&self, index_var: VarId) -> Option<VarId> {
        self.renaming
            .iter()
            .find(|(iv, _)| *iv == index_var)
            .map(|(_, qv)| *qv)
    }

    /// Query variables this scan produces: the renamed exported variables of
    /// the index, in the index's export order
    pub fn output_schema(&self) -> Vec<VarId> {
        self.descriptor
            .pattern()
            .exported()
            .iter()
            .filter_map(|&iv| self.rename(iv))
            .collect()
    }
}

/// A node in the query algebra tree
#[derive(Clone, Debug)]
pub enum Algebra {
    /// Leaf: scan one statement pattern against the raw dataset
    Pattern(StatementPattern),
    /// Leaf: scan a precomputed join result
    IndexScan(Arc<IndexScanSpec>),
    /// Inner join of child operators (n-ary, order preserved)
    Join(Vec<Arc<Algebra>>),
    /// Filter rows of the input
    Filter {
        expr: FilterExpr,
        input: Arc<Algebra>,
    },
    /// Project the input to the listed variables
    Projection {
        vars: Vec<VarId>,
        input: Arc<Algebra>,
    },
}

impl Algebra {
    /// Leaf constructor
    pub fn pattern(p: StatementPattern) -> Arc<Self> {
        Arc::new(Algebra::Pattern(p))
    }

    /// Index-scan constructor
    pub fn index_scan(spec: IndexScanSpec) -> Arc<Self> {
        Arc::new(Algebra::IndexScan(Arc::new(spec)))
    }

    /// Join constructor
    pub fn join(children: Vec<Arc<Algebra>>) -> Arc<Self> {
        Arc::new(Algebra::Join(children))
    }

    /// Filter constructor
    pub fn filter(expr: FilterExpr, input: Arc<Algebra>) -> Arc<Self> {
        Arc::new(Algebra::Filter { expr, input })
    }

    /// Projection constructor
    pub fn projection(vars: Vec<VarId>, input: Arc<Algebra>) -> Arc<Self> {
        Arc::new(Algebra::Projection { vars, input })
    }

    /// Variables this subtree produces for its parent
    pub fn produced_vars(&self) -> BTreeSet<VarId> {
        match self {
            Algebra::Pattern(p) => p.distinct_variables(),
            Algebra::IndexScan(spec) => spec.output_schema().into_iter().collect(),
            Algebra::Join(children) => {
                let mut out = BTreeSet::new();
                for c in children {
                    out.extend(c.produced_vars());
                }
                out
            }
            Algebra::Filter { input, .. } => input.produced_vars(),
            Algebra::Projection { vars, .. } => vars.iter().copied().collect(),
        }
    }

    /// Collect every statement pattern this subtree answers
    ///
    /// Pattern leaves contribute themselves; index scans re-derive the
    /// query-space patterns they cover. Duplicates are preserved so the
    /// validator can detect double coverage.
    pub fn collect_patterns(&self, out: &mut Vec<StatementPattern>) {
        match self {
            Algebra::Pattern(p) => out.push(p.clone()),
            Algebra::IndexScan(spec) => out.extend(spec.covered().iter().cloned()),
            Algebra::Join(children) => {
                for c in children {
                    c.collect_patterns(out);
                }
            }
            Algebra::Filter { input, .. } | Algebra::Projection { input, .. } => {
                input.collect_patterns(out);
            }
        }
    }

    /// Collect only raw pattern leaves (no index-scan re-derivation)
    pub fn collect_pattern_leaves(&self, out: &mut Vec<StatementPattern>) {
        match self {
            Algebra::Pattern(p) => out.push(p.clone()),
            Algebra::IndexScan(_) => {}
            Algebra::Join(children) => {
                for c in children {
                    c.collect_pattern_leaves(out);
                }
            }
            Algebra::Filter { input, .. } | Algebra::Projection { input, .. } => {
                input.collect_pattern_leaves(out);
            }
        }
    }

    /// Variables the tree requires to stay visible above its pattern leaves:
    /// everything referenced by a projection, a filter, or an index scan
    /// already in the tree
    pub fn required_vars(&self) -> BTreeSet<VarId> {
        let mut out = BTreeSet::new();
        self.collect_required_vars(&mut out);
        out
    }

    fn collect_required_vars(&self, out: &mut BTreeSet<VarId>) {
        match self {
            Algebra::Pattern(_) => {}
            Algebra::IndexScan(spec) => out.extend(spec.output_schema()),
            Algebra::Join(children) => {
                for c in children {
                    c.collect_required_vars(out);
                }
            }
            Algebra::Filter { expr, input } => {
                out.extend(expr.variables());
                input.collect_required_vars(out);
            }
            Algebra::Projection { vars, input } => {
                out.extend(vars.iter().copied());
                input.collect_required_vars(out);
            }
        }
    }

    /// Extract the pattern graph this tree evaluates
    ///
    /// Leaves become the graph's (deduplicated) pattern set; the exported
    /// set is every pattern variable the rest of the tree still needs
    /// (projections, filters, pre-existing index scans).
    pub fn pattern_graph(&self) -> Result<PatternGraph, CoreError> {
        let mut leaves = Vec::new();
        self.collect_pattern_leaves(&mut leaves);

        let mut pattern_vars = BTreeSet::new();
        for p in &leaves {
            pattern_vars.extend(p.distinct_variables());
        }
        let exported: Vec<VarId> = self
            .required_vars()
            .into_iter()
            .filter(|v| pattern_vars.contains(v))
            .collect();

        PatternGraph::new(leaves, exported)
    }
}
