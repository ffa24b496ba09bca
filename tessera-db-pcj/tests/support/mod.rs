//! Shared fixtures for integration tests: an in-memory triple dataset, a
//! naive reference evaluator over algebra trees, and a helper that
//! materializes an index's pattern graph into rows for the memory PCJ store.
//!
//! The evaluator is deliberately simple (nested-loop everything); its only
//! job is to be an obviously-correct oracle for comparing optimized and
//! unoptimized plans.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use tessera_db_core::{PatternGraph, StatementPattern, Term, Value, VarId};
use tessera_db_pcj::{Algebra, IndexScanOperator, Operator, Result};

/// One solution row: variable -> value
pub type Row = BTreeMap<VarId, Value>;

/// In-memory triple dataset
#[derive(Default, Clone)]
pub struct Dataset {
    triples: Vec<(Value, Value, Value)>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, s: Value, p: Value, o: Value) {
        self.triples.push((s, p, o));
    }

    /// Solutions of one pattern, extending an existing partial row
    pub fn scan_pattern(&self, pattern: &StatementPattern, base: &Row) -> Vec<Row> {
        let mut out = Vec::new();
        for (s, p, o) in &self.triples {
            let mut row = base.clone();
            if unify(&pattern.s, s, &mut row)
                && unify(&pattern.p, p, &mut row)
                && unify(&pattern.o, o, &mut row)
            {
                out.push(row);
            }
        }
        out
    }
}

fn unify(term: &Term, value: &Value, row: &mut Row) -> bool {
    match term {
        Term::Value(c) => c == value,
        Term::Var(v) => match row.get(v) {
            Some(bound) => bound == value,
            None => {
                row.insert(*v, value.clone());
                true
            }
        },
    }
}

fn merge(a: &Row, b: &Row) -> Option<Row> {
    let mut out = a.clone();
    for (var, val) in b {
        match out.get(var) {
            Some(existing) if existing != val => return None,
            _ => {
                out.insert(*var, val.clone());
            }
        }
    }
    Some(out)
}

/// Evaluate an algebra tree against the dataset
///
/// Index scans go through the real `IndexScanOperator`, so storage failures
/// (e.g. a dropped index) propagate out of evaluation exactly as they would
/// from the production executor.
pub fn eval<'a>(
    plan: &'a Algebra,
    data: &'a Dataset,
) -> Pin<Box<dyn Future<Output = Result<Vec<Row>>> + 'a>> {
    Box::pin(async move {
        match plan {
            Algebra::Pattern(p) => Ok(data.scan_pattern(p, &Row::new())),

            Algebra::IndexScan(spec) => {
                let mut op = IndexScanOperator::new(spec.clone());
                op.open().await?;
                let mut rows = Vec::new();
                while let Some(batch) = op.next_batch().await? {
                    let schema = batch.schema().to_vec();
                    for row_view in batch.rows() {
                        let mut row = Row::new();
                        for (col, var) in schema.iter().enumerate() {
                            if let Some(val) =
                                row_view.get_by_col(col).and_then(|b| b.as_value())
                            {
                                row.insert(*var, val.clone());
                            }
                        }
                        rows.push(row);
                    }
                }
                op.close();
                Ok(rows)
            }

            Algebra::Join(children) => {
                let mut rows = vec![Row::new()];
                for child in children {
                    let child_rows = eval(child, data).await?;
                    let mut next = Vec::new();
                    for left in &rows {
                        for right in &child_rows {
                            if let Some(merged) = merge(left, right) {
                                next.push(merged);
                            }
                        }
                    }
                    rows = next;
                }
                Ok(rows)
            }

            Algebra::Filter { expr, input } => {
                let rows = eval(input, data).await?;
                Ok(rows
                    .into_iter()
                    .filter(|row| expr.evaluate(&|v| row.get(&v)))
                    .collect())
            }

            Algebra::Projection { vars, input } => {
                let rows = eval(input, data).await?;
                Ok(rows
                    .into_iter()
                    .map(|row| {
                        vars.iter()
                            .filter_map(|v| row.get(v).map(|val| (*v, val.clone())))
                            .collect()
                    })
                    .collect())
            }
        }
    })
}

/// Materialize an index's pattern graph against the dataset
///
/// Returns rows in export order, ready for `MemoryPcjStore::register`.
pub fn materialize_index(data: &Dataset, pattern: &PatternGraph) -> Vec<Vec<Value>> {
    let mut rows = vec![Row::new()];
    for p in pattern.patterns() {
        let mut next = Vec::new();
        for base in &rows {
            next.extend(data.scan_pattern(p, base));
        }
        rows = next;
    }

    rows.iter()
        .map(|row| {
            pattern
                .exported()
                .iter()
                .map(|v| row.get(v).expect("exported variable bound").clone())
                .collect()
        })
        .collect()
}

/// Normalize rows for multiset comparison
pub fn normalized(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort();
    rows
}

/// Assert two evaluations agree as multisets of rows
pub fn assert_same_solutions(a: Vec<Row>, b: Vec<Row>) {
    assert_eq!(normalized(a), normalized(b));
}
