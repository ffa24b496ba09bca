//! Subgraph matcher: embeds an index's pattern graph into a query's
//!
//! Patterns are hyperedges over variable vertices; constants are fixed labels.
//! Finding every way an index applies to a query is subgraph-isomorphism
//! search: ordered backtracking over the index's patterns, restricting
//! candidate query patterns to those with an identical constant signature and
//! a renaming consistent with the bindings fixed so far. Index pattern sets
//! are small (typically 2-10 patterns), so no discrimination index is needed;
//! trying the most-constrained pattern first keeps the search shallow.
//!
//! "No match" is an empty sequence, never an error.

use crate::catalog::{IndexDescriptor, IndexId};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tessera_db_core::{PatternGraph, PatternId, Term, VarId};

/// A verified embedding of an index's pattern graph into the query's
///
/// The renaming is a bijection between the index's variables and the query
/// variables of the covered subgraph; `covered` is the exact set of query
/// patterns the index answers.
#[derive(Clone, Debug)]
pub struct Match {
    descriptor: Arc<IndexDescriptor>,
    /// (index var, query var) pairs, sorted by index var
    renaming: Vec<(VarId, VarId)>,
    covered: BTreeSet<PatternId>,
}

impl Match {
    /// Assemble a match directly; the matcher is the only normal producer
    pub(crate) fn new(
        descriptor: Arc<IndexDescriptor>,
        mut renaming: Vec<(VarId, VarId)>,
        covered: BTreeSet<PatternId>,
    ) -> Self {
        renaming.sort_unstable();
        Self {
            descriptor,
            renaming,
            covered,
        }
    }

    /// The matched index
    pub fn descriptor(&self) -> &Arc<IndexDescriptor> {
        &self.descriptor
    }

    /// Id of the matched index
    pub fn index_id(&self) -> &IndexId {
        self.descriptor.id()
    }

    /// The (index var, query var) renaming pairs, sorted by index var
    pub fn renaming(&self) -> &[(VarId, VarId)] {
        &self.renaming
    }

    /// Ids of the query patterns this match covers
    pub fn covered(&self) -> &BTreeSet<PatternId> {
        &self.covered
    }

    /// Number of covered query patterns
    pub fn covered_len(&self) -> usize {
        self.covered.len()
    }

    /// Check whether this match covers any pattern in common with another
    pub fn overlaps(&self, other: &Match) -> bool {
        self.covered.intersection(&other.covered).next().is_some()
    }
}

/// Enumerates embeddings of one index pattern graph into a query pattern graph
pub struct SubgraphMatcher<'a> {
    descriptor: &'a Arc<IndexDescriptor>,
    query: &'a PatternGraph,
    /// Index pattern ids in search order (most-constrained first)
    order: Vec<PatternId>,
    /// Query var -> ids of query patterns containing it
    query_var_patterns: FxHashMap<VarId, Vec<PatternId>>,
}

impl<'a> SubgraphMatcher<'a> {
    /// Create a matcher for one index against one query graph
    pub fn new(descriptor: &'a Arc<IndexDescriptor>, query: &'a PatternGraph) -> Self {
        let mut query_var_patterns: FxHashMap<VarId, Vec<PatternId>> = FxHashMap::default();
        for (id, p) in query.patterns().iter().enumerate() {
            for v in p.distinct_variables() {
                query_var_patterns.entry(v).or_default().push(id);
            }
        }

        Self {
            order: plan_order(descriptor.pattern()),
            descriptor,
            query,
            query_var_patterns,
        }
    }

    /// Lazily enumerate every embedding
    ///
    /// Finite and restartable: each call starts a fresh enumeration, and the
    /// same inputs always yield the same matches in the same order.
    pub fn matches(&self) -> MatchIter<'_, 'a> {
        let index = self.descriptor.pattern();
        // An empty index can cover nothing; a bigger index cannot embed.
        let unmatchable = index.is_empty() || index.len() > self.query.len();
        MatchIter {
            matcher: self,
            frames: Vec::new(),
            fwd: FxHashMap::default(),
            rev: FxHashMap::default(),
            used: vec![false; self.query.len()],
            chosen: Vec::new(),
            started: false,
            done: unmatchable,
        }
    }

    /// Candidate query patterns for one index pattern under current bindings
    ///
    /// Filters by constant signature only; variable consistency is checked
    /// when a candidate is tried.
    fn candidates_for(&self, index_pattern: PatternId, used: &[bool]) -> Vec<PatternId> {
        let ip = &self.descriptor.pattern().patterns()[index_pattern];
        let sig = ip.const_signature();
        self.query
            .patterns()
            .iter()
            .enumerate()
            .filter(|(id, qp)| !used[*id] && qp.const_signature() == sig)
            .map(|(id, _)| id)
            .collect()
    }
}

/// Search order for the index's patterns: start from the pattern with the
/// most constants, then grow along shared variables, preferring constrained
/// patterns. Ties break on pattern id for determinism.
fn plan_order(index: &PatternGraph) -> Vec<PatternId> {
    let mut remaining: Vec<PatternId> = (0..index.len()).collect();
    let mut order = Vec::with_capacity(index.len());
    let mut bound: BTreeSet<VarId> = BTreeSet::new();

    while !remaining.is_empty() {
        let (pos, &best) = remaining
            .iter()
            .enumerate()
            .max_by_key(|(_, &id)| {
                let p = &index.patterns()[id];
                let connected = p
                    .distinct_variables()
                    .iter()
                    .filter(|v| bound.contains(v))
                    .count();
                // Reverse id so max_by_key's last-wins tiebreak picks the lowest
                (connected, p.const_count(), std::cmp::Reverse(id))
            })
            .expect("remaining is non-empty");
        remaining.remove(pos);
        bound.extend(index.patterns()[best].distinct_variables());
        order.push(best);
    }

    order
}

struct Frame {
    candidates: Vec<PatternId>,
    next: usize,
    /// Binding applied for the currently-chosen candidate at this depth
    applied: Option<Applied>,
}

struct Applied {
    query_pattern: PatternId,
    /// Renaming pairs introduced by this pattern (for undo)
    new_pairs: Vec<(VarId, VarId)>,
}

/// Lazy iterator over embeddings, driven by an explicit backtracking stack
pub struct MatchIter<'m, 'a> {
    matcher: &'m SubgraphMatcher<'a>,
    frames: Vec<Frame>,
    /// index var -> query var
    fwd: FxHashMap<VarId, VarId>,
    /// query var -> index var (enforces bijection)
    rev: FxHashMap<VarId, VarId>,
    used: Vec<bool>,
    /// Chosen query pattern per depth
    chosen: Vec<PatternId>,
    started: bool,
    done: bool,
}

impl<'m, 'a> MatchIter<'m, 'a> {
    fn undo(&mut self, applied: Applied) {
        self.used[applied.query_pattern] = false;
        for (iv, qv) in applied.new_pairs {
            self.fwd.remove(&iv);
            self.rev.remove(&qv);
        }
    }

    /// Try to align one index pattern with one query pattern under the
    /// current renaming, extending it on success
    fn try_bind(&mut self, index_pattern: PatternId, query_pattern: PatternId) -> Option<Applied> {
        let ip = &self.matcher.descriptor.pattern().patterns()[index_pattern];
        let qp = &self.matcher.query.patterns()[query_pattern];

        let mut new_pairs: Vec<(VarId, VarId)> = Vec::new();
        for (it, qt) in ip.slots().into_iter().zip(qp.slots()) {
            let consistent = match (it, qt) {
                (Term::Value(a), Term::Value(b)) => a == b,
                (Term::Var(iv), Term::Var(qv)) => match self.fwd.get(iv) {
                    Some(mapped) => mapped == qv,
                    None => {
                        if self.rev.contains_key(qv) {
                            // A second index variable onto the same query
                            // variable would break the bijection.
                            false
                        } else {
                            self.fwd.insert(*iv, *qv);
                            self.rev.insert(*qv, *iv);
                            new_pairs.push((*iv, *qv));
                            true
                        }
                    }
                },
                // Constant-vs-variable slots never correspond: an index
                // variable materializes all values, a query constant wants one.
                _ => false,
            };

            if !consistent {
                for (iv, qv) in new_pairs {
                    self.fwd.remove(&iv);
                    self.rev.remove(&qv);
                }
                return None;
            }
        }

        self.used[query_pattern] = true;
        Some(Applied {
            query_pattern,
            new_pairs,
        })
    }

    /// A covered query variable that is still visible outside the covered
    /// subgraph (exported, or used by an uncovered pattern) must come from an
    /// exported index variable, or the scan could not supply its binding.
    fn visibility_ok(&self) -> bool {
        let covered: BTreeSet<PatternId> = self.chosen.iter().copied().collect();
        let index = self.matcher.descriptor.pattern();

        for (qv, iv) in &self.rev {
            let visible_outside = self.matcher.query.is_exported(*qv)
                || self
                    .matcher
                    .query_var_patterns
                    .get(qv)
                    .is_some_and(|ids| ids.iter().any(|id| !covered.contains(id)));
            if visible_outside && !index.is_exported(*iv) {
                return false;
            }
        }
        true
    }

    fn build_match(&self) -> Match {
        let renaming: Vec<(VarId, VarId)> =
            self.fwd.iter().map(|(&iv, &qv)| (iv, qv)).collect();
        Match::new(
            Arc::clone(self.matcher.descriptor),
            renaming,
            self.chosen.iter().copied().collect(),
        )
    }
}

impl<'m, 'a> Iterator for MatchIter<'m, 'a> {
    type Item = Match;

    fn next(&mut self) -> Option<Match> {
        if self.done {
            return None;
        }

        let depth_count = self.matcher.order.len();
        if !self.started {
            self.started = true;
            let candidates = self
                .matcher
                .candidates_for(self.matcher.order[0], &self.used);
            self.frames.push(Frame {
                candidates,
                next: 0,
                applied: None,
            });
            self.chosen.push(0);
        }

        loop {
            let depth = self.frames.len() - 1;

            // Undo the binding applied on the previous visit to this depth
            // (after a yield, a failed export check, or child exhaustion).
            if let Some(applied) = self.frames[depth].applied.take() {
                self.undo(applied);
            }

            // Advance to the next workable candidate at this depth.
            let mut advanced = false;
            while self.frames[depth].next < self.frames[depth].candidates.len() {
                let q = self.frames[depth].candidates[self.frames[depth].next];
                self.frames[depth].next += 1;
                if self.used[q] {
                    continue;
                }
                if let Some(applied) = self.try_bind(self.matcher.order[depth], q) {
                    self.frames[depth].applied = Some(applied);
                    self.chosen[depth] = q;
                    advanced = true;
                    break;
                }
            }

            if !advanced {
                self.frames.pop();
                self.chosen.pop();
                if self.frames.is_empty() {
                    self.done = true;
                    return None;
                }
                continue;
            }

            if self.frames.len() == depth_count {
                if self.visibility_ok() {
                    // Leave the binding applied; the next call resumes here.
                    return Some(self.build_match());
                }
                continue;
            }

            let next_pattern = self.matcher.order[self.frames.len()];
            let candidates = self.matcher.candidates_for(next_pattern, &self.used);
            self.frames.push(Frame {
                candidates,
                next: 0,
                applied: None,
            });
            self.chosen.push(0);
        }
    }
}
