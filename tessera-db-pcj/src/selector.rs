//! Candidate selection: which matches actually get applied
//!
//! Matches whose covered-pattern sets overlap are mutually exclusive. The
//! selector orders all candidates by a fixed preference and accepts greedily,
//! discarding anything that overlaps an earlier acceptance. Greedy is not
//! globally optimal (maximum coverage is NP-hard) but it is deterministic and
//! right for the common case of a few mostly-disjoint indexes.
//!
//! Preference order:
//! 1. more covered patterns first
//! 2. caller-supplied index priority (catalog order by default)
//! 3. index id
//! 4. covered set, then renaming, lexicographically (distinct embeddings of
//!    the same index)
//!
//! Pure function of its inputs; no side effects.

use crate::catalog::IndexId;
use crate::matcher::Match;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use tessera_db_core::PatternId;

/// Result of selection: accepted matches plus uncovered query patterns
///
/// Accepted covered sets are pairwise disjoint, and their union plus the
/// residual equals the full query pattern set.
#[derive(Clone, Debug)]
pub struct Selection {
    accepted: Vec<Match>,
    residual: BTreeSet<PatternId>,
}

impl Selection {
    /// Matches to apply, in preference order
    pub fn accepted(&self) -> &[Match] {
        &self.accepted
    }

    /// Consume, returning the accepted matches
    pub fn into_accepted(self) -> Vec<Match> {
        self.accepted
    }

    /// Query patterns left for direct evaluation
    pub fn residual(&self) -> &BTreeSet<PatternId> {
        &self.residual
    }

    /// Check if nothing was accepted
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

/// Orders candidate matches and accepts a conflict-free subset
pub struct CandidateSelector {
    /// Index id -> priority rank (lower wins). Indexes absent from the map
    /// rank after all present ones.
    priority: FxHashMap<IndexId, usize>,
}

impl CandidateSelector {
    /// Create a selector with an explicit total order over indexes
    ///
    /// Callers use this to force preference, e.g. cheaper indexes first. The
    /// catalog's registration order is the conventional default.
    pub fn new(priority_order: impl IntoIterator<Item = IndexId>) -> Self {
        Self {
            priority: priority_order
                .into_iter()
                .enumerate()
                .map(|(rank, id)| (id, rank))
                .collect(),
        }
    }

    fn rank(&self, id: &IndexId) -> usize {
        self.priority.get(id).copied().unwrap_or(usize::MAX)
    }

    /// Pick a conflict-free subset of `candidates` for a query with
    /// `query_len` patterns
    ///
    /// The enumeration order of `candidates` never affects the outcome.
    pub fn select(&self, query_len: usize, mut candidates: Vec<Match>) -> Selection {
        candidates.sort_by(|a, b| {
            b.covered_len()
                .cmp(&a.covered_len())
                .then_with(|| self.rank(a.index_id()).cmp(&self.rank(b.index_id())))
                .then_with(|| a.index_id().cmp(b.index_id()))
                .then_with(|| a.covered().cmp(b.covered()))
                .then_with(|| a.renaming().cmp(b.renaming()))
        });

        let mut accepted: Vec<Match> = Vec::new();
        let mut taken: BTreeSet<PatternId> = BTreeSet::new();
        for m in candidates {
            if m.covered().iter().any(|id| taken.contains(id)) {
                continue;
            }
            taken.extend(m.covered().iter().copied());
            accepted.push(m);
        }

        let residual = (0..query_len).filter(|id| !taken.contains(id)).collect();
        Selection { accepted, residual }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IndexCatalog, IndexDescriptor, PcjCursor, PcjSource};
    use crate::error::Result;
    use crate::matcher::SubgraphMatcher;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tessera_db_core::{PatternGraph, StatementPattern, Term, Value, VarId};

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
            unimplemented!("selector tests never scan")
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

    use std::collections::BTreeSet;

    /// Query { ?e type ?c . ?e label ?l . ?e talksTo ?o }
    fn query() -> PatternGraph {
        PatternGraph::new(
            vec![
                sp(var(0), iri("rdf:type"), var(1)),
                sp(var(0), iri("rdfs:label"), var(2)),
                sp(var(0), iri("uri:talksTo"), var(3)),
            ],
            vec![VarId(0), VarId(1), VarId(2), VarId(3)],
        )
        .unwrap()
    }

    fn matches_for(desc: &Arc<IndexDescriptor>, query: &PatternGraph) -> Vec<Match> {
        SubgraphMatcher::new(desc, query).matches().collect()
    }

    #[test]
    fn test_larger_coverage_wins_over_overlap() {
        let q = query();
        // Covers patterns {0, 1}
        let big = descriptor(
            "pcj_big",
            vec![
                sp(var(0), iri("rdf:type"), var(1)),
                sp(var(0), iri("rdfs:label"), var(2)),
            ],
        );
        // Covers pattern {1} only
        let small = descriptor("pcj_small", vec![sp(var(0), iri("rdfs:label"), var(1))]);

        let mut candidates = matches_for(&small, &q);
        candidates.extend(matches_for(&big, &q));

        let selector =
            CandidateSelector::new(vec![IndexId::new("pcj_small"), IndexId::new("pcj_big")]);
        let selection = selector.select(q.len(), candidates);

        assert_eq!(selection.accepted().len(), 1);
        assert_eq!(selection.accepted()[0].index_id().as_str(), "pcj_big");
        assert_eq!(selection.residual(), &BTreeSet::from([2]));
    }

    #[test]
    fn test_priority_breaks_equal_coverage_ties() {
        let q = query();
        let a = descriptor("pcj_a", vec![sp(var(0), iri("rdfs:label"), var(1))]);
        let b = descriptor("pcj_b", vec![sp(var(0), iri("rdfs:label"), var(1))]);

        let mut candidates = matches_for(&a, &q);
        candidates.extend(matches_for(&b, &q));

        // b outranks a by caller priority despite the later id.
        let selector = CandidateSelector::new(vec![IndexId::new("pcj_b"), IndexId::new("pcj_a")]);
        let selection = selector.select(q.len(), candidates.clone());
        assert_eq!(selection.accepted().len(), 1);
        assert_eq!(selection.accepted()[0].index_id().as_str(), "pcj_b");

        // Without explicit priority, the id breaks the tie.
        let selector = CandidateSelector::new(Vec::<IndexId>::new());
        let selection = selector.select(q.len(), candidates);
        assert_eq!(selection.accepted()[0].index_id().as_str(), "pcj_a");
    }

    #[test]
    fn test_disjoint_matches_all_accepted() {
        let q = query();
        let types = descriptor("pcj_types", vec![sp(var(0), iri("rdf:type"), var(1))]);
        let rest = descriptor(
            "pcj_rest",
            vec![
                sp(var(0), iri("rdfs:label"), var(1)),
                sp(var(0), iri("uri:talksTo"), var(2)),
            ],
        );

        let mut candidates = matches_for(&types, &q);
        candidates.extend(matches_for(&rest, &q));

        let selector = CandidateSelector::new(Vec::<IndexId>::new());
        let selection = selector.select(q.len(), candidates);

        assert_eq!(selection.accepted().len(), 2);
        assert!(selection.residual().is_empty());
        // Larger coverage first
        assert_eq!(selection.accepted()[0].index_id().as_str(), "pcj_rest");
    }

    #[test]
    fn test_selection_ignores_candidate_order() {
        let q = query();
        let big = descriptor(
            "pcj_big",
            vec![
                sp(var(0), iri("rdf:type"), var(1)),
                sp(var(0), iri("rdfs:label"), var(2)),
            ],
        );
        let small = descriptor("pcj_small", vec![sp(var(0), iri("uri:talksTo"), var(1))]);

        let mut forward = matches_for(&big, &q);
        forward.extend(matches_for(&small, &q));
        let mut reversed = forward.clone();
        reversed.reverse();

        let selector = CandidateSelector::new(Vec::<IndexId>::new());
        let a = selector.select(q.len(), forward);
        let b = selector.select(q.len(), reversed);

        let ids = |s: &Selection| {
            s.accepted()
                .iter()
                .map(|m| m.index_id().as_str().to_owned())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a.residual(), b.residual());
    }
}
