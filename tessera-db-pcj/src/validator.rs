//! Plan validator: structural soundness checks on a candidate final plan
//!
//! Runs after rewriting but is independent of the rewriter: it validates
//! hand-built plans just as well. Checks, in order:
//!
//! 1. **Connectivity** - no join combines operators without a shared variable
//!    unless the original pattern graph already kept them in separate
//!    connected components (cross products are preserved, never introduced)
//! 2. **Binding completeness** - every variable used by a filter, projection,
//!    or exported position is produced at or below its point of use
//! 3. **Coverage** - the patterns re-derivable from the plan's leaves equal
//!    the original pattern set exactly: none lost, none duplicated
//! 4. **No redundant indexes** - no two index scans cover overlapping
//!    pattern sets
//!
//! The verdict is pure and idempotent. On failure the caller discards the
//! rewritten plan and falls back to the unoptimized one.

use crate::algebra::Algebra;
use crate::catalog::IndexId;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::collections::HashSet;
use tessera_db_core::{PatternGraph, StatementPattern, VarId};
use thiserror::Error;

/// One validation failure, described for diagnostics
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    /// A join combines operator groups with no shared variable even though
    /// the original pattern graph connected them
    #[error("join introduces a cartesian product between {left:?} and {right:?}")]
    IntroducedCrossProduct {
        left: Vec<VarId>,
        right: Vec<VarId>,
    },

    /// A variable is referenced above any operator that produces it
    #[error("variable {var:?} used in {site} is not produced below it")]
    UnboundVariable { var: VarId, site: &'static str },

    /// An original pattern is answered by no leaf of the plan
    #[error("pattern {0:?} lost from the plan")]
    MissingPattern(StatementPattern),

    /// A plan leaf answers a pattern the original query never had
    #[error("pattern {0:?} not part of the original query")]
    UnexpectedPattern(StatementPattern),

    /// A pattern is answered by more than one leaf
    #[error("pattern {0:?} covered more than once")]
    DuplicateCoverage(StatementPattern),

    /// Two index scans cover overlapping pattern sets
    #[error("index scans {a} and {b} cover overlapping patterns")]
    OverlappingIndexes { a: IndexId, b: IndexId },
}

/// Verdict of a validation pass
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    failures: Vec<ValidationFailure>,
}

impl ValidationOutcome {
    /// Check if the plan passed every check
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    /// The failures, in check order
    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }
}

/// Validates candidate plans against the original query's pattern graph
pub struct PlanValidator {
    original: PatternGraph,
    /// Original pattern -> connected-component id
    components: FxHashMap<StatementPattern, usize>,
}

impl PlanValidator {
    /// Create a validator for one query
    pub fn new(original: PatternGraph) -> Self {
        let components = pattern_components(&original);
        Self {
            original,
            components,
        }
    }

    /// Validate a candidate plan
    pub fn validate(&self, plan: &Algebra) -> ValidationOutcome {
        let mut failures = Vec::new();

        self.check_connectivity(plan, &mut failures);

        let produced = self.check_bindings(plan, &mut failures);
        for &var in self.original.exported() {
            if !produced.contains(&var) {
                failures.push(ValidationFailure::UnboundVariable {
                    var,
                    site: "exported position",
                });
            }
        }

        self.check_coverage(plan, &mut failures);
        self.check_redundancy(plan, &mut failures);

        ValidationOutcome { failures }
    }

    fn check_connectivity(&self, node: &Algebra, failures: &mut Vec<ValidationFailure>) {
        match node {
            Algebra::Pattern(_) | Algebra::IndexScan(_) => {}
            Algebra::Filter { input, .. } | Algebra::Projection { input, .. } => {
                self.check_connectivity(input, failures);
            }
            Algebra::Join(children) => {
                for c in children {
                    self.check_connectivity(c, failures);
                }

                // Group join children by shared variables.
                let vars: Vec<BTreeSet<VarId>> =
                    children.iter().map(|c| c.produced_vars()).collect();
                let mut uf = UnionFind::new(children.len());
                for i in 0..children.len() {
                    for j in (i + 1)..children.len() {
                        if !vars[i].is_disjoint(&vars[j]) {
                            uf.union(i, j);
                        }
                    }
                }

                let mut groups: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
                for i in 0..children.len() {
                    groups.entry(uf.find(i)).or_default().push(i);
                }
                if groups.len() <= 1 {
                    return;
                }

                // Disconnected groups are only legal when their patterns come
                // from different components of the original graph.
                let mut group_list: Vec<Vec<usize>> = groups.into_values().collect();
                group_list.sort();
                let comp_sets: Vec<BTreeSet<usize>> = group_list
                    .iter()
                    .map(|members| {
                        let mut patterns = Vec::new();
                        for &i in members {
                            children[i].collect_patterns(&mut patterns);
                        }
                        patterns
                            .iter()
                            .filter_map(|p| self.components.get(p).copied())
                            .collect()
                    })
                    .collect();

                for i in 0..group_list.len() {
                    for j in (i + 1)..group_list.len() {
                        if !comp_sets[i].is_disjoint(&comp_sets[j]) {
                            let side_vars = |members: &[usize]| {
                                let mut out = BTreeSet::new();
                                for &m in members {
                                    out.extend(vars[m].iter().copied());
                                }
                                out.into_iter().collect::<Vec<_>>()
                            };
                            failures.push(ValidationFailure::IntroducedCrossProduct {
                                left: side_vars(&group_list[i]),
                                right: side_vars(&group_list[j]),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Returns the variables produced by `node`, recording any use of a
    /// variable no operator below it produces
    fn check_bindings(
        &self,
        node: &Algebra,
        failures: &mut Vec<ValidationFailure>,
    ) -> BTreeSet<VarId> {
        match node {
            Algebra::Pattern(p) => p.distinct_variables(),
            Algebra::IndexScan(spec) => {
                let schema: BTreeSet<VarId> = spec.output_schema().into_iter().collect();
                for f in spec.residual() {
                    for var in f.variables() {
                        if !schema.contains(&var) {
                            failures.push(ValidationFailure::UnboundVariable {
                                var,
                                site: "index scan residual filter",
                            });
                        }
                    }
                }
                schema
            }
            Algebra::Join(children) => {
                let mut out = BTreeSet::new();
                for c in children {
                    out.extend(self.check_bindings(c, failures));
                }
                out
            }
            Algebra::Filter { expr, input } => {
                let produced = self.check_bindings(input, failures);
                for var in expr.variables() {
                    if !produced.contains(&var) {
                        failures.push(ValidationFailure::UnboundVariable {
                            var,
                            site: "filter",
                        });
                    }
                }
                produced
            }
            Algebra::Projection { vars, input } => {
                let produced = self.check_bindings(input, failures);
                for &var in vars {
                    if !produced.contains(&var) {
                        failures.push(ValidationFailure::UnboundVariable {
                            var,
                            site: "projection",
                        });
                    }
                }
                vars.iter().copied().collect()
            }
        }
    }

    fn check_coverage(&self, plan: &Algebra, failures: &mut Vec<ValidationFailure>) {
        let mut derived = Vec::new();
        plan.collect_patterns(&mut derived);

        let mut counts: FxHashMap<&StatementPattern, usize> = FxHashMap::default();
        for p in &derived {
            *counts.entry(p).or_default() += 1;
        }

        for p in self.original.patterns() {
            match counts.get(p).copied().unwrap_or(0) {
                0 => failures.push(ValidationFailure::MissingPattern(p.clone())),
                1 => {}
                _ => failures.push(ValidationFailure::DuplicateCoverage(p.clone())),
            }
        }

        let mut reported_unexpected: Vec<&StatementPattern> = Vec::new();
        for p in &derived {
            if !self.original.patterns().contains(p) && !reported_unexpected.contains(&p) {
                reported_unexpected.push(p);
                failures.push(ValidationFailure::UnexpectedPattern(p.clone()));
            }
        }
    }

    fn check_redundancy(&self, plan: &Algebra, failures: &mut Vec<ValidationFailure>) {
        let mut scans = Vec::new();
        collect_scans(plan, &mut scans);

        for i in 0..scans.len() {
            for j in (i + 1)..scans.len() {
                let a: HashSet<&StatementPattern> = scans[i].covered().iter().collect();
                let overlapping = scans[j].covered().iter().any(|p| a.contains(p));
                if overlapping {
                    failures.push(ValidationFailure::OverlappingIndexes {
                        a: scans[i].index_id().clone(),
                        b: scans[j].index_id().clone(),
                    });
                }
            }
        }
    }
}

fn collect_scans<'a>(node: &'a Algebra, out: &mut Vec<&'a crate::algebra::IndexScanSpec>) {
    match node {
        Algebra::Pattern(_) => {}
        Algebra::IndexScan(spec) => out.push(spec),
        Algebra::Join(children) => {
            for c in children {
                collect_scans(c, out);
            }
        }
        Algebra::Filter { input, .. } | Algebra::Projection { input, .. } => {
            collect_scans(input, out);
        }
    }
}

/// Connected components of a pattern graph, linked by shared variables
fn pattern_components(graph: &PatternGraph) -> FxHashMap<StatementPattern, usize> {
    let n = graph.len();
    let mut uf = UnionFind::new(n);
    let mut by_var: FxHashMap<VarId, Vec<usize>> = FxHashMap::default();
    for (i, p) in graph.patterns().iter().enumerate() {
        for v in p.distinct_variables() {
            by_var.entry(v).or_default().push(i);
        }
    }
    for ids in by_var.values() {
        for w in ids.windows(2) {
            uf.union(w[0], w[1]);
        }
    }

    graph
        .patterns()
        .iter()
        .enumerate()
        .map(|(i, p)| (p.clone(), uf.find(i)))
        .collect()
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::IndexScanSpec;
    use crate::catalog::{IndexCatalog, IndexDescriptor, PcjCursor, PcjSource};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tessera_db_core::{Term, Value};

    struct TestSource {
        id: IndexId,
        pattern: PatternGraph,
    }

    #[async_trait]
    impl PcjSource for TestSource {
        fn id(&self) -> &IndexId {
            &self.id
        }

        fn pattern(&self) -> &PatternGraph {
            &self.pattern
        }

        async fn scan(&self, _: &[(VarId, Value)]) -> Result<Box<dyn PcjCursor>> {
            unimplemented!("validator tests never scan")
        }
    }

    fn var(n: u16) -> Term {
        Term::Var(VarId(n))
    }

    fn iri(s: &str) -> Term {
        Term::Value(Value::iri(s))
    }

    fn sp(s: Term, p: Term, o: Term) -> StatementPattern {
        StatementPattern::new(s, p, o)
    }

    fn descriptor(id: &str, patterns: Vec<StatementPattern>) -> Arc<IndexDescriptor> {
        let mut vars = BTreeSet::new();
        for p in &patterns {
            vars.extend(p.distinct_variables());
        }
        let pattern = PatternGraph::new(patterns, vars).unwrap();
        let catalog = IndexCatalog::snapshot(vec![Arc::new(TestSource {
            id: IndexId::new(id),
            pattern,
        }) as Arc<dyn PcjSource>]);
        Arc::clone(&catalog.descriptors()[0])
    }

    /// Scan spec whose index pattern equals its covered query patterns
    /// (identity renaming), which is all these tests need.
    fn identity_scan(id: &str, covered: Vec<StatementPattern>) -> Arc<Algebra> {
        let desc = descriptor(id, covered.clone());
        let renaming: Vec<(VarId, VarId)> = desc
            .pattern()
            .variables()
            .into_iter()
            .map(|v| (v, v))
            .collect();
        Algebra::index_scan(IndexScanSpec::new(desc, renaming, covered))
    }

    fn p0() -> StatementPattern {
        sp(var(0), iri("rdf:type"), var(1))
    }

    fn p1() -> StatementPattern {
        sp(var(0), iri("rdfs:label"), var(2))
    }

    fn p2() -> StatementPattern {
        sp(var(0), iri("uri:talksTo"), var(3))
    }

    fn graph(patterns: Vec<StatementPattern>, exported: Vec<VarId>) -> PatternGraph {
        PatternGraph::new(patterns, exported).unwrap()
    }

    #[test]
    fn test_valid_plan_and_idempotence() {
        let original = graph(vec![p0(), p1()], vec![VarId(0), VarId(1), VarId(2)]);
        let plan = Algebra::projection(
            vec![VarId(0), VarId(1), VarId(2)],
            Algebra::join(vec![Algebra::pattern(p0()), Algebra::pattern(p1())]),
        );

        let validator = PlanValidator::new(original);
        let first = validator.validate(&plan);
        let second = validator.validate(&plan);
        assert!(first.is_valid(), "failures: {:?}", first.failures());
        assert_eq!(first.failures(), second.failures());
    }

    #[test]
    fn test_index_scan_rederives_coverage() {
        let original = graph(vec![p0(), p1()], vec![VarId(0), VarId(1), VarId(2)]);
        let plan = Algebra::projection(
            vec![VarId(0), VarId(1), VarId(2)],
            identity_scan("pcj_all", vec![p0(), p1()]),
        );

        assert!(PlanValidator::new(original).validate(&plan).is_valid());
    }

    #[test]
    fn test_lost_pattern_rejected() {
        // A leaf was removed with no replacement.
        let original = graph(vec![p0(), p1()], vec![VarId(0), VarId(1)]);
        let plan = Algebra::projection(vec![VarId(0), VarId(1)], Algebra::pattern(p0()));

        let outcome = PlanValidator::new(original).validate(&plan);
        assert!(!outcome.is_valid());
        assert!(outcome
            .failures()
            .iter()
            .any(|f| matches!(f, ValidationFailure::MissingPattern(p) if *p == p1())));
    }

    #[test]
    fn test_duplicate_coverage_rejected() {
        // Index scan covers p0, and the raw leaf is still in the plan too.
        let original = graph(vec![p0(), p1()], vec![VarId(0), VarId(1)]);
        let plan = Algebra::join(vec![
            identity_scan("pcj_types", vec![p0()]),
            Algebra::pattern(p0()),
            Algebra::pattern(p1()),
        ]);

        let outcome = PlanValidator::new(original).validate(&plan);
        assert!(outcome
            .failures()
            .iter()
            .any(|f| matches!(f, ValidationFailure::DuplicateCoverage(p) if *p == p0())));
    }

    #[test]
    fn test_unexpected_pattern_rejected() {
        let original = graph(vec![p0()], vec![VarId(0), VarId(1)]);
        let plan = Algebra::join(vec![Algebra::pattern(p0()), Algebra::pattern(p1())]);

        let outcome = PlanValidator::new(original).validate(&plan);
        assert!(outcome
            .failures()
            .iter()
            .any(|f| matches!(f, ValidationFailure::UnexpectedPattern(p) if *p == p1())));
    }

    #[test]
    fn test_introduced_cross_product_rejected() {
        // p0 and p2 share ?e in the original; joining them via a nested join
        // that separates them from the connecting pattern is still fine, but
        // pairing two pattern groups with no shared variable is not.
        let q0 = sp(var(0), iri("uri:a"), var(1));
        let q1 = sp(var(2), iri("uri:b"), var(1));
        let original = graph(vec![q0.clone(), q1.clone()], vec![VarId(0), VarId(2)]);

        // Rebind q1's leaf so the shared variable disappears from the join.
        let q1_projected = Algebra::projection(vec![VarId(2)], Algebra::pattern(q1));
        let plan = Algebra::join(vec![Algebra::pattern(q0), q1_projected]);

        let outcome = PlanValidator::new(original).validate(&plan);
        assert!(outcome
            .failures()
            .iter()
            .any(|f| matches!(f, ValidationFailure::IntroducedCrossProduct { .. })));
    }

    #[test]
    fn test_preserved_cross_product_allowed() {
        // The original graph already had two disconnected components.
        let q0 = sp(var(0), iri("uri:a"), var(1));
        let q1 = sp(var(2), iri("uri:b"), var(3));
        let original = graph(
            vec![q0.clone(), q1.clone()],
            vec![VarId(0), VarId(1), VarId(2), VarId(3)],
        );
        let plan = Algebra::join(vec![Algebra::pattern(q0), Algebra::pattern(q1)]);

        let outcome = PlanValidator::new(original).validate(&plan);
        assert!(outcome.is_valid(), "failures: {:?}", outcome.failures());
    }

    #[test]
    fn test_unbound_filter_variable_rejected() {
        let original = graph(vec![p0()], vec![VarId(0), VarId(1)]);
        let plan = Algebra::filter(
            crate::algebra::FilterExpr::compare_const(
                crate::algebra::CompareOp::Eq,
                VarId(9),
                Value::Long(1),
            ),
            Algebra::pattern(p0()),
        );

        let outcome = PlanValidator::new(original).validate(&plan);
        assert!(outcome.failures().iter().any(|f| matches!(
            f,
            ValidationFailure::UnboundVariable {
                var: VarId(9),
                site: "filter"
            }
        )));
    }

    #[test]
    fn test_unbound_exported_variable_rejected() {
        let original = graph(vec![p0(), p1()], vec![VarId(0), VarId(2)]);
        // Projection narrows to ?e only; exported ?l is gone.
        let plan = Algebra::projection(
            vec![VarId(0)],
            Algebra::join(vec![Algebra::pattern(p0()), Algebra::pattern(p1())]),
        );

        let outcome = PlanValidator::new(original).validate(&plan);
        assert!(outcome.failures().iter().any(|f| matches!(
            f,
            ValidationFailure::UnboundVariable {
                var: VarId(2),
                site: "exported position"
            }
        )));
    }

    #[test]
    fn test_overlapping_index_scans_rejected() {
        let original = graph(vec![p0(), p1(), p2()], vec![VarId(0)]);
        let plan = Algebra::join(vec![
            identity_scan("pcj_a", vec![p0(), p1()]),
            identity_scan("pcj_b", vec![p1(), p2()]),
        ]);

        let outcome = PlanValidator::new(original).validate(&plan);
        assert!(outcome
            .failures()
            .iter()
            .any(|f| matches!(f, ValidationFailure::OverlappingIndexes { .. })));
    }
}
