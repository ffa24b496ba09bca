//! Plan rewriter: splices accepted matches into the algebra tree
//!
//! Produces a new tree sharing unchanged subtrees with the original; the
//! original is never mutated. For each accepted match the covered pattern
//! leaves are removed and a single index-scan node is inserted at the lowest
//! node that dominated all of them, so every variable shared with sibling
//! operators keeps working as an ordinary join key. Adjacent matches become
//! sibling scan nodes; they are never merged. A match that covers the whole
//! query collapses the pattern region to one scan under the projection.
//!
//! Filters are never removed. A filter whose subtree was consumed by a match
//! is re-applied above the emitted scan; a filter whose variables are all
//! produced by one scan may be pushed down onto that scan as a residual.

use crate::algebra::{Algebra, FilterExpr, IndexScanSpec};
use crate::error::{PcjError, Result};
use crate::matcher::Match;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tessera_db_core::{PatternGraph, PatternId, StatementPattern, VarId};

/// Rewrites an algebra tree to use accepted matches
pub struct PlanRewriter<'a> {
    query_graph: &'a PatternGraph,
}

impl<'a> PlanRewriter<'a> {
    /// Create a rewriter for a query whose pattern graph has been extracted
    pub fn new(query_graph: &'a PatternGraph) -> Self {
        Self { query_graph }
    }

    /// Build the rewritten tree
    ///
    /// Fails with [`PcjError::InvariantViolation`] if a match's covered
    /// patterns are not all present in the tree (e.g. already consumed), or
    /// if two matches claim the same pattern. Both indicate selector or
    /// caller bugs, never data conditions.
    pub fn rewrite(&self, original: &Arc<Algebra>, accepted: &[Match]) -> Result<Arc<Algebra>> {
        if accepted.is_empty() {
            return Ok(Arc::clone(original));
        }

        // Pattern -> id in the extracted graph.
        let pattern_ids: FxHashMap<&StatementPattern, PatternId> = self
            .query_graph
            .patterns()
            .iter()
            .enumerate()
            .map(|(id, p)| (p, id))
            .collect();

        // Pattern id -> accepted match index; also reject double coverage.
        let mut assignment: FxHashMap<PatternId, usize> = FxHashMap::default();
        for (mi, m) in accepted.iter().enumerate() {
            for &pid in m.covered() {
                if assignment.insert(pid, mi).is_some() {
                    return Err(PcjError::invariant(format!(
                        "pattern {pid} claimed by two matches"
                    )));
                }
                if self.query_graph.pattern(pid).is_none() {
                    return Err(PcjError::invariant(format!(
                        "match for index {} covers unknown pattern {pid}",
                        m.index_id()
                    )));
                }
            }
        }

        // Count how many leaf occurrences each match must consume; every
        // covered pattern must still be present in the tree.
        let mut occurrences = vec![0usize; accepted.len()];
        count_occurrences(original, &pattern_ids, &assignment, &mut occurrences);
        let mut present: BTreeSet<PatternId> = BTreeSet::new();
        collect_leaf_ids(original, &pattern_ids, &mut present);
        for m in accepted {
            let missing: Vec<PatternId> = m
                .covered()
                .iter()
                .copied()
                .filter(|pid| !present.contains(pid))
                .collect();
            if !missing.is_empty() {
                return Err(PcjError::invariant(format!(
                    "match for index {} covers patterns {missing:?} absent from the tree",
                    m.index_id()
                )));
            }
        }

        let specs: Vec<IndexScanSpec> = accepted.iter().map(|m| self.scan_spec(m)).collect();

        let mut ctx = SurgeryCtx {
            pattern_ids,
            assignment,
            occurrences,
            specs,
            emitted: vec![false; accepted.len()],
        };

        let out = transform(original, &mut ctx);
        debug_assert_eq!(
            out.removed, ctx.occurrences,
            "surgery must consume every covered leaf occurrence"
        );
        let mut node = match (out.node, pending_to_node(&mut ctx, &out.completed)) {
            (Some(n), None) => n,
            (None, Some(scans)) => scans,
            (Some(n), Some(scans)) => Algebra::join(vec![n, scans]),
            (None, None) => {
                return Err(PcjError::invariant(
                    "rewrite consumed the whole tree without emitting a scan".to_owned(),
                ))
            }
        };

        debug_assert!(
            ctx.emitted.iter().all(|&e| e),
            "every accepted match must emit exactly one scan node"
        );

        // Filters whose subtree was consumed re-attach at the top if no
        // deeper node could take them.
        for f in out.pending_filters {
            node = Algebra::filter(f, node);
        }

        Ok(push_filters(&node))
    }

    fn scan_spec(&self, m: &Match) -> IndexScanSpec {
        let covered: Vec<StatementPattern> = m
            .covered()
            .iter()
            .filter_map(|&pid| self.query_graph.pattern(pid).cloned())
            .collect();
        IndexScanSpec::new(
            Arc::clone(m.descriptor()),
            m.renaming().to_vec(),
            covered,
        )
    }
}

struct SurgeryCtx<'a> {
    pattern_ids: FxHashMap<&'a StatementPattern, PatternId>,
    assignment: FxHashMap<PatternId, usize>,
    /// Total leaf occurrences per match across the whole tree
    occurrences: Vec<usize>,
    specs: Vec<IndexScanSpec>,
    emitted: Vec<bool>,
}

struct Transformed {
    node: Option<Arc<Algebra>>,
    /// Leaf occurrences removed per match, within this subtree
    removed: Vec<usize>,
    /// Matches whose last covered leaf was removed in this subtree and whose
    /// scan has not been emitted yet
    completed: Vec<usize>,
    /// Filters whose input was consumed; re-attached where variables allow
    pending_filters: Vec<FilterExpr>,
}

fn count_occurrences(
    node: &Algebra,
    pattern_ids: &FxHashMap<&StatementPattern, PatternId>,
    assignment: &FxHashMap<PatternId, usize>,
    out: &mut Vec<usize>,
) {
    match node {
        Algebra::Pattern(p) => {
            if let Some(mi) = pattern_ids.get(p).and_then(|pid| assignment.get(pid)) {
                out[*mi] += 1;
            }
        }
        Algebra::IndexScan(_) => {}
        Algebra::Join(children) => {
            for c in children {
                count_occurrences(c, pattern_ids, assignment, out);
            }
        }
        Algebra::Filter { input, .. } | Algebra::Projection { input, .. } => {
            count_occurrences(input, pattern_ids, assignment, out);
        }
    }
}

fn collect_leaf_ids(
    node: &Algebra,
    pattern_ids: &FxHashMap<&StatementPattern, PatternId>,
    out: &mut BTreeSet<PatternId>,
) {
    match node {
        Algebra::Pattern(p) => {
            if let Some(pid) = pattern_ids.get(p) {
                out.insert(*pid);
            }
        }
        Algebra::IndexScan(_) => {}
        Algebra::Join(children) => {
            for c in children {
                collect_leaf_ids(c, pattern_ids, out);
            }
        }
        Algebra::Filter { input, .. } | Algebra::Projection { input, .. } => {
            collect_leaf_ids(input, pattern_ids, out);
        }
    }
}

/// Turn completed matches into scan nodes, joined if more than one
fn pending_to_node(ctx: &mut SurgeryCtx<'_>, completed: &[usize]) -> Option<Arc<Algebra>> {
    let mut scans: Vec<usize> = completed
        .iter()
        .copied()
        .filter(|&mi| !ctx.emitted[mi])
        .collect();
    if scans.is_empty() {
        return None;
    }

    // Cheapest scan first when cardinalities are known; id otherwise.
    scans.sort_by_key(|&mi| {
        let d = ctx.specs[mi].descriptor();
        (
            d.cardinality().unwrap_or(u64::MAX),
            d.id().clone(),
        )
    });

    let mut nodes: Vec<Arc<Algebra>> = Vec::with_capacity(scans.len());
    for mi in scans {
        ctx.emitted[mi] = true;
        nodes.push(Algebra::index_scan(ctx.specs[mi].clone()));
    }
    if nodes.len() == 1 {
        Some(nodes.pop().expect("one scan node"))
    } else {
        Some(Algebra::join(nodes))
    }
}

fn merge_removed(a: &mut Vec<usize>, b: &[usize]) {
    for (x, y) in a.iter_mut().zip(b) {
        *x += y;
    }
}

fn transform(node: &Arc<Algebra>, ctx: &mut SurgeryCtx<'_>) -> Transformed {
    let match_count = ctx.specs.len();
    match node.as_ref() {
        Algebra::Pattern(p) => {
            let assigned = ctx
                .pattern_ids
                .get(p)
                .and_then(|pid| ctx.assignment.get(pid))
                .copied();
            match assigned {
                Some(mi) => {
                    let mut removed = vec![0; match_count];
                    removed[mi] += 1;
                    let completed = if removed[mi] == ctx.occurrences[mi] {
                        vec![mi]
                    } else {
                        Vec::new()
                    };
                    Transformed {
                        node: None,
                        removed,
                        completed,
                        pending_filters: Vec::new(),
                    }
                }
                None => Transformed {
                    node: Some(Arc::clone(node)),
                    removed: vec![0; match_count],
                    completed: Vec::new(),
                    pending_filters: Vec::new(),
                },
            }
        }

        Algebra::IndexScan(_) => Transformed {
            node: Some(Arc::clone(node)),
            removed: vec![0; match_count],
            completed: Vec::new(),
            pending_filters: Vec::new(),
        },

        Algebra::Join(children) => {
            let mut removed = vec![0; match_count];
            let mut kept: Vec<Arc<Algebra>> = Vec::new();
            let mut pending_filters: Vec<FilterExpr> = Vec::new();
            for c in children {
                let t = transform(c, ctx);
                merge_removed(&mut removed, &t.removed);
                pending_filters.extend(t.pending_filters);
                if let Some(n) = t.node {
                    kept.push(n);
                }
                // Leaf children report completion without emitting; the
                // removed-count check below re-derives those, so the scan
                // still lands here, as a sibling in this join.
            }

            // Matches whose every occurrence was removed within this subtree
            // emit their scan here: this join is the lowest dominator.
            let completed: Vec<usize> = (0..match_count)
                .filter(|&mi| !ctx.emitted[mi] && removed[mi] == ctx.occurrences[mi] && removed[mi] > 0)
                .collect();
            if let Some(scans) = pending_to_node(ctx, &completed) {
                match Arc::try_unwrap(scans) {
                    Ok(Algebra::Join(mut scan_children)) => {
                        scan_children.extend(kept);
                        kept = scan_children;
                    }
                    Ok(other) => kept.insert(0, Arc::new(other)),
                    Err(arc) => kept.insert(0, arc),
                }
            }

            let mut out_node = match kept.len() {
                0 => None,
                1 => Some(kept.pop().expect("one child")),
                _ => Some(Algebra::join(kept)),
            };

            // Re-attach consumed filters as soon as their variables exist.
            let mut still_pending = Vec::new();
            for f in pending_filters {
                let attachable = out_node
                    .as_ref()
                    .is_some_and(|n| f.variables().is_subset(&n.produced_vars()));
                if attachable {
                    let n = out_node.take().expect("checked above");
                    out_node = Some(Algebra::filter(f, n));
                } else {
                    still_pending.push(f);
                }
            }

            Transformed {
                node: out_node,
                removed,
                completed: Vec::new(),
                pending_filters: still_pending,
            }
        }

        Algebra::Filter { expr, input } => {
            let t = transform(input, ctx);
            let mut pending_filters = t.pending_filters;

            let inner = match pending_to_node(ctx, &t.completed) {
                Some(scans) => match t.node {
                    Some(n) => Some(Algebra::join(vec![n, scans])),
                    None => Some(scans),
                },
                None => t.node,
            };

            let node = match inner {
                Some(n) => Some(Algebra::filter(expr.clone(), n)),
                None => {
                    // Input fully consumed by matches completing higher up:
                    // carry the filter to the emission point.
                    pending_filters.push(expr.clone());
                    None
                }
            };
            Transformed {
                node,
                removed: t.removed,
                completed: Vec::new(),
                pending_filters,
            }
        }

        Algebra::Projection { vars, input } => {
            let t = transform(input, ctx);

            let mut inner = match pending_to_node(ctx, &t.completed) {
                Some(scans) => match t.node {
                    Some(n) => Some(Algebra::join(vec![n, scans])),
                    None => Some(scans),
                },
                None => t.node,
            };

            // Emit any still-unemitted matches completed somewhere below
            // that found no join to land on (single-leaf inputs).
            let leftover: Vec<usize> = (0..ctx.specs.len())
                .filter(|&mi| {
                    !ctx.emitted[mi] && t.removed[mi] == ctx.occurrences[mi] && t.removed[mi] > 0
                })
                .collect();
            if let Some(scans) = pending_to_node(ctx, &leftover) {
                inner = Some(match inner {
                    Some(n) => Algebra::join(vec![n, scans]),
                    None => scans,
                });
            }

            // Consumed filters re-attach under the projection, where the
            // full variable set is still visible.
            let mut still_pending = Vec::new();
            for f in t.pending_filters {
                let attachable = inner
                    .as_ref()
                    .is_some_and(|n| f.variables().is_subset(&n.produced_vars()));
                if attachable {
                    let n = inner.take().expect("checked above");
                    inner = Some(Algebra::filter(f, n));
                } else {
                    still_pending.push(f);
                }
            }

            let node = inner.map(|n| Algebra::projection(vars.clone(), n));
            Transformed {
                node,
                removed: t.removed,
                completed: Vec::new(),
                pending_filters: still_pending,
            }
        }
    }
}

/// Push filters onto index scans that bind all their variables
///
/// The filter is folded into the scan's residual set, so it still runs; it
/// just runs during the scan instead of above it.
fn push_filters(node: &Arc<Algebra>) -> Arc<Algebra> {
    match node.as_ref() {
        Algebra::Pattern(_) | Algebra::IndexScan(_) => Arc::clone(node),

        Algebra::Join(children) => {
            Algebra::join(children.iter().map(push_filters).collect())
        }

        Algebra::Projection { vars, input } => {
            Algebra::projection(vars.clone(), push_filters(input))
        }

        Algebra::Filter { expr, input } => {
            let input = push_filters(input);
            let filter_vars = expr.variables();

            match input.as_ref() {
                Algebra::IndexScan(spec)
                    if filter_vars.is_subset(&scan_schema(spec.output_schema())) =>
                {
                    Algebra::index_scan(spec.as_ref().clone().with_residual(expr.clone()))
                }
                Algebra::Join(children) => {
                    let target = children.iter().position(|c| match c.as_ref() {
                        Algebra::IndexScan(spec) => {
                            filter_vars.is_subset(&scan_schema(spec.output_schema()))
                        }
                        _ => false,
                    });
                    match target {
                        Some(i) => {
                            let mut new_children = children.clone();
                            if let Algebra::IndexScan(spec) = children[i].as_ref() {
                                new_children[i] = Algebra::index_scan(
                                    spec.as_ref().clone().with_residual(expr.clone()),
                                );
                            }
                            Algebra::join(new_children)
                        }
                        None => Algebra::filter(expr.clone(), input),
                    }
                }
                _ => Algebra::filter(expr.clone(), input),
            }
        }
    }
}

fn scan_schema(vars: Vec<VarId>) -> BTreeSet<VarId> {
    vars.into_iter().collect()
}
