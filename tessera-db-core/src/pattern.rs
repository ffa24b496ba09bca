//! Statement patterns and pattern graphs
//!
//! A [`StatementPattern`] is one triple pattern: three slots, each a variable
//! or a constant. A [`PatternGraph`] is a deduplicated set of statement
//! patterns plus the variables whose bindings must remain visible outside the
//! graph (the "exported" variables). Pattern graphs describe both what a
//! query requires and what a precomputed index materializes.

use crate::error::{CoreError, Result};
use crate::value::Value;
use crate::var_registry::VarId;
use std::collections::BTreeSet;

/// Index of a pattern within its owning [`PatternGraph`]
pub type PatternId = usize;

/// A slot in a statement pattern: variable or constant
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Term {
    /// Variable slot
    Var(VarId),
    /// Constant slot
    Value(Value),
}

impl Term {
    /// Check if this term is a variable
    pub fn is_var(&self) -> bool {
        matches!(self, Term::Var(_))
    }

    /// Check if this term is a constant
    pub fn is_const(&self) -> bool {
        !self.is_var()
    }

    /// Get the variable if this is a Var term
    pub fn as_var(&self) -> Option<VarId> {
        match self {
            Term::Var(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the constant if this is a Value term
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Term::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// A triple pattern over subject, predicate, object slots
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StatementPattern {
    /// Subject term
    pub s: Term,
    /// Predicate term
    pub p: Term,
    /// Object term
    pub o: Term,
}

impl StatementPattern {
    /// Create a new statement pattern
    pub fn new(s: Term, p: Term, o: Term) -> Self {
        Self { s, p, o }
    }

    /// The three slots in (s, p, o) order
    pub fn slots(&self) -> [&Term; 3] {
        [&self.s, &self.p, &self.o]
    }

    /// Variables of this pattern, in slot order (may repeat)
    pub fn variables(&self) -> Vec<VarId> {
        self.slots()
            .into_iter()
            .filter_map(Term::as_var)
            .collect()
    }

    /// Distinct variables of this pattern
    pub fn distinct_variables(&self) -> BTreeSet<VarId> {
        self.slots().into_iter().filter_map(Term::as_var).collect()
    }

    /// Number of constant slots (0..=3)
    ///
    /// Used by the matcher to try the most-constrained patterns first.
    pub fn const_count(&self) -> usize {
        self.slots().into_iter().filter(|t| t.is_const()).count()
    }

    /// Constant signature: the constant in each slot, or None for a variable
    ///
    /// Two patterns can only correspond under a variable renaming when their
    /// signatures are identical.
    pub fn const_signature(&self) -> [Option<&Value>; 3] {
        [
            self.s.as_value(),
            self.p.as_value(),
            self.o.as_value(),
        ]
    }

    /// Check whether this pattern shares at least one variable with `other`
    pub fn shares_variable_with(&self, other: &StatementPattern) -> bool {
        let mine = self.distinct_variables();
        other.slots().into_iter().any(|t| match t {
            Term::Var(v) => mine.contains(v),
            _ => false,
        })
    }
}

/// A set of statement patterns plus its exported variables
///
/// # Invariants
///
/// - Patterns are deduplicated (duplicates are logically redundant)
/// - Every exported variable occurs in at least one pattern
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatternGraph {
    patterns: Vec<StatementPattern>,
    exported: Vec<VarId>,
}

impl PatternGraph {
    /// Build a pattern graph, deduplicating patterns and checking the
    /// exported-variable invariant
    ///
    /// First occurrence order of patterns is preserved. Exported variables
    /// are deduplicated as well.
    pub fn new(
        patterns: impl IntoIterator<Item = StatementPattern>,
        exported: impl IntoIterator<Item = VarId>,
    ) -> Result<Self> {
        let mut deduped: Vec<StatementPattern> = Vec::new();
        for p in patterns {
            if !deduped.contains(&p) {
                deduped.push(p);
            }
        }

        let mut all_vars = BTreeSet::new();
        for p in &deduped {
            all_vars.extend(p.distinct_variables());
        }

        let mut exported_dedup: Vec<VarId> = Vec::new();
        for v in exported {
            if !all_vars.contains(&v) {
                return Err(CoreError::UnboundExported(v));
            }
            if !exported_dedup.contains(&v) {
                exported_dedup.push(v);
            }
        }

        Ok(Self {
            patterns: deduped,
            exported: exported_dedup,
        })
    }

    /// The deduplicated patterns, in first-occurrence order
    pub fn patterns(&self) -> &[StatementPattern] {
        &self.patterns
    }

    /// Get one pattern by id
    pub fn pattern(&self, id: PatternId) -> Option<&StatementPattern> {
        self.patterns.get(id)
    }

    /// The exported variables, in declaration order
    pub fn exported(&self) -> &[VarId] {
        &self.exported
    }

    /// Check whether a variable is exported
    pub fn is_exported(&self, var: VarId) -> bool {
        self.exported.contains(&var)
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Check if there are no patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// All distinct variables across all patterns
    pub fn variables(&self) -> BTreeSet<VarId> {
        let mut out = BTreeSet::new();
        for p in &self.patterns {
            out.extend(p.distinct_variables());
        }
        out
    }

    /// Ids of patterns containing the given variable
    pub fn patterns_with_var(&self, var: VarId) -> Vec<PatternId> {
        self.patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| p.distinct_variables().contains(&var))
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(n: u16) -> Term {
        Term::Var(VarId(n))
    }

    fn iri(s: &str) -> Term {
        Term::Value(Value::iri(s))
    }

    #[test]
    fn test_const_count_and_signature() {
        let p = StatementPattern::new(var(0), iri("uri:talksTo"), var(1));
        assert_eq!(p.const_count(), 1);

        let sig = p.const_signature();
        assert!(sig[0].is_none());
        assert_eq!(sig[1], Some(&Value::iri("uri:talksTo")));
        assert!(sig[2].is_none());
    }

    #[test]
    fn test_variables_in_slot_order() {
        let p = StatementPattern::new(var(3), var(1), iri("uri:obj"));
        assert_eq!(p.variables(), vec![VarId(3), VarId(1)]);
    }

    #[test]
    fn test_pattern_graph_dedups() {
        let p = StatementPattern::new(var(0), iri("uri:label"), var(1));
        let graph =
            PatternGraph::new(vec![p.clone(), p.clone()], vec![VarId(0), VarId(1)]).unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_pattern_graph_rejects_unbound_export() {
        let p = StatementPattern::new(var(0), iri("uri:label"), var(1));
        let err = PatternGraph::new(vec![p], vec![VarId(7)]).unwrap_err();
        assert!(matches!(err, CoreError::UnboundExported(VarId(7))));
    }

    #[test]
    fn test_patterns_with_var() {
        let p0 = StatementPattern::new(var(0), iri("uri:a"), var(1));
        let p1 = StatementPattern::new(var(1), iri("uri:b"), var(2));
        let p2 = StatementPattern::new(var(3), iri("uri:c"), var(3));
        let graph = PatternGraph::new(vec![p0, p1, p2], vec![VarId(0)]).unwrap();

        assert_eq!(graph.patterns_with_var(VarId(1)), vec![0, 1]);
        assert_eq!(graph.patterns_with_var(VarId(3)), vec![2]);
        assert!(graph.patterns_with_var(VarId(9)).is_empty());
    }

    #[test]
    fn test_shares_variable_with() {
        let p0 = StatementPattern::new(var(0), iri("uri:a"), var(1));
        let p1 = StatementPattern::new(var(1), iri("uri:b"), var(2));
        let p2 = StatementPattern::new(var(4), iri("uri:c"), var(5));
        assert!(p0.shares_variable_with(&p1));
        assert!(!p0.shares_variable_with(&p2));
    }
}
