//! Index scan operator: streams a precomputed result set into a plan
//!
//! Wraps one [`IndexScanSpec`]: pulls chunks from the index's cursor, renames
//! columns from the index's variable space into the query's, applies
//! pre-bound values pushed down from the left side of a join (semi-join) and
//! any residual filters, and assembles columnar batches.
//!
//! Pre-bound values are an exact-match filter: they are forwarded to the
//! source so it can prune storage reads, and re-checked row-by-row here, so a
//! source that only approximates the push-down cannot leak wrong rows.
//!
//! Storage failures (connectivity, decode, index dropped after the catalog
//! snapshot was taken) propagate as scan errors; the executor falls back to
//! evaluating the covered patterns directly.

use crate::algebra::IndexScanSpec;
use crate::catalog::PcjCursor;
use crate::error::{PcjError, Result};
use crate::operator::{Operator, OperatorState};
use async_trait::async_trait;
use std::sync::Arc;
use tessera_db_core::{Batch, Binding, Value, VarId};
use tracing::debug;

const DEFAULT_BATCH_SIZE: usize = 1024;

/// Scan over one precomputed join result set
pub struct IndexScanOperator {
    spec: Arc<IndexScanSpec>,
    /// Query-space output schema, in the index's export order
    schema: Arc<[VarId]>,
    /// Query-space pre-bound values (semi-join push-down)
    pre_bound: Vec<(VarId, Value)>,
    batch_size: usize,
    state: OperatorState,
    cursor: Option<Box<dyn PcjCursor>>,
}

impl IndexScanOperator {
    /// Create a scan for a spec produced by the rewriter
    pub fn new(spec: Arc<IndexScanSpec>) -> Self {
        let schema: Arc<[VarId]> = Arc::from(spec.output_schema());
        Self {
            spec,
            schema,
            pre_bound: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            state: OperatorState::Created,
            cursor: None,
        }
    }

    /// Set pre-bound values pushed down from a sibling operator
    ///
    /// Values for variables this scan does not produce are ignored; they
    /// cannot constrain the scan and the join above re-checks them anyway.
    pub fn with_pre_bound(mut self, pre_bound: Vec<(VarId, Value)>) -> Self {
        self.pre_bound = pre_bound;
        self
    }

    /// Override the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Replace the pre-bound values before a rescan
    ///
    /// Only legal while not open; nested-loop drivers close, rebind, reopen.
    pub fn rebind(&mut self, pre_bound: Vec<(VarId, Value)>) -> Result<()> {
        if !self.state.can_open() {
            return Err(PcjError::OperatorClosed);
        }
        self.pre_bound = pre_bound;
        Ok(())
    }

    /// The scan's spec
    pub fn spec(&self) -> &Arc<IndexScanSpec> {
        &self.spec
    }

    /// Translate query-space pre-bound values into the index's variable space
    fn index_space_pre_bound(&self) -> Vec<(VarId, Value)> {
        self.pre_bound
            .iter()
            .filter_map(|(qv, val)| {
                self.spec
                    .renaming()
                    .iter()
                    .find(|(_, q)| q == qv)
                    .map(|(iv, _)| (*iv, val.clone()))
            })
            .collect()
    }

    /// Check one renamed row against pre-bound values and residual filters
    fn row_passes(&self, row: &[Value]) -> bool {
        for (qv, expected) in &self.pre_bound {
            if let Some(col) = self.schema.iter().position(|v| v == qv) {
                if &row[col] != expected {
                    return false;
                }
            }
        }

        let lookup = |v: VarId| {
            self.schema
                .iter()
                .position(|&sv| sv == v)
                .map(|col| &row[col])
        };
        self.spec.residual().iter().all(|f| f.evaluate(&lookup))
    }
}

#[async_trait]
impl Operator for IndexScanOperator {
    fn schema(&self) -> &[VarId] {
        &self.schema
    }

    async fn open(&mut self) -> Result<()> {
        if !self.state.can_open() {
            return Err(PcjError::OperatorNotOpened);
        }

        debug!(
            index = %self.spec.index_id(),
            pre_bound = self.pre_bound.len(),
            "opening index scan"
        );

        let pre_bound = self.index_space_pre_bound();
        let cursor = self.spec.descriptor().source().scan(&pre_bound).await?;
        self.cursor = Some(cursor);
        self.state = OperatorState::Open;
        Ok(())
    }

    async fn next_batch(&mut self) -> Result<Option<Batch>> {
        if !self.state.can_next() {
            return Err(match self.state {
                OperatorState::Closed => PcjError::OperatorClosed,
                _ => PcjError::OperatorNotOpened,
            });
        }

        let mut cursor = self.cursor.take().ok_or(PcjError::OperatorNotOpened)?;
        let mut rows: Vec<Vec<Binding>> = Vec::new();

        while rows.len() < self.batch_size {
            let Some(chunk) = cursor.next_chunk().await? else {
                break;
            };
            for row in chunk {
                if row.len() != self.schema.len() {
                    return Err(PcjError::scan(format!(
                        "index {} returned a row of width {}, expected {}",
                        self.spec.index_id(),
                        row.len(),
                        self.schema.len()
                    )));
                }
                if self.row_passes(&row) {
                    rows.push(row.into_iter().map(Binding::Bound).collect());
                }
            }
        }

        if rows.is_empty() {
            self.state = OperatorState::Exhausted;
            return Ok(None);
        }

        self.cursor = Some(cursor);
        Ok(Some(Batch::from_rows(Arc::clone(&self.schema), rows)?))
    }

    fn close(&mut self) {
        self.cursor = None;
        self.state = OperatorState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::{CompareOp, FilterExpr};
    use crate::catalog::{IndexCatalog, IndexDescriptor, IndexId, PcjSource};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tessera_db_core::{PatternGraph, StatementPattern, Term};

    /// Source yielding fixed rows in fixed-size chunks, recording the
    /// pre-bound values each scan call received.
    struct FixedSource {
        id: IndexId,
        pattern: PatternGraph,
        rows: Vec<Vec<Value>>,
        chunk_size: usize,
        seen_pre_bound: Mutex<Vec<Vec<(VarId, Value)>>>,
        fail: bool,
    }

    struct FixedCursor {
        chunks: VecDeque<Vec<Vec<Value>>>,
    }

    #[async_trait]
    impl PcjCursor for FixedCursor {
        async fn next_chunk(&mut self) -> Result<Option<Vec<Vec<Value>>>> {
            Ok(self.chunks.pop_front())
        }
    }

    #[async_trait]
    impl PcjSource for FixedSource {
        fn id(&self) -> &IndexId {
            &self.id
        }

        fn pattern(&self) -> &PatternGraph {
            &self.pattern
        }

        async fn scan(&self, pre_bound: &[(VarId, Value)]) -> Result<Box<dyn PcjCursor>> {
            if self.fail {
                return Err(PcjError::scan("backing store unreachable"));
            }
            self.seen_pre_bound
                .lock()
                .expect("lock")
                .push(pre_bound.to_vec());
            let chunks = self
                .rows
                .chunks(self.chunk_size)
                .map(|c| c.to_vec())
                .collect();
            Ok(Box::new(FixedCursor { chunks }))
        }
    }

    /// Index { ?a type ?b } with index vars ?a=0, ?b=1, exported in order.
    fn fixture(rows: Vec<Vec<Value>>, fail: bool) -> (Arc<FixedSource>, Arc<IndexDescriptor>) {
        let pattern = PatternGraph::new(
            vec![StatementPattern::new(
                Term::Var(VarId(0)),
                Term::Value(Value::iri("rdf:type")),
                Term::Var(VarId(1)),
            )],
            vec![VarId(0), VarId(1)],
        )
        .unwrap();
        let source = Arc::new(FixedSource {
            id: IndexId::new("pcj_types"),
            pattern,
            rows,
            chunk_size: 2,
            seen_pre_bound: Mutex::new(Vec::new()),
            fail,
        });
        let catalog =
            IndexCatalog::snapshot(vec![Arc::clone(&source) as Arc<dyn PcjSource>]);
        (source, Arc::clone(&catalog.descriptors()[0]))
    }

    /// Renames index ?a -> query var 10, ?b -> query var 11.
    fn spec_for(desc: &Arc<IndexDescriptor>) -> Arc<IndexScanSpec> {
        let covered = desc.pattern().patterns().to_vec();
        Arc::new(IndexScanSpec::new(
            Arc::clone(desc),
            vec![(VarId(0), VarId(10)), (VarId(1), VarId(11))],
            covered,
        ))
    }

    fn rows3() -> Vec<Vec<Value>> {
        vec![
            vec![Value::iri("uri:entity"), Value::iri("uri:class")],
            vec![Value::iri("uri:entity2"), Value::iri("uri:class2")],
            vec![Value::iri("uri:entity3"), Value::iri("uri:class")],
        ]
    }

    async fn drain(op: &mut IndexScanOperator) -> Vec<Vec<Binding>> {
        let mut out = Vec::new();
        while let Some(batch) = op.next_batch().await.unwrap() {
            out.extend(batch.rows().map(|r| r.to_vec()));
        }
        out
    }

    #[tokio::test]
    async fn test_scan_renames_into_query_space() {
        let (_, desc) = fixture(rows3(), false);
        let mut op = IndexScanOperator::new(spec_for(&desc));

        assert_eq!(op.schema(), &[VarId(10), VarId(11)]);
        op.open().await.unwrap();
        let rows = drain(&mut op).await;
        op.close();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], Binding::Bound(Value::iri("uri:entity")));
        assert_eq!(rows[0][1], Binding::Bound(Value::iri("uri:class")));
    }

    #[tokio::test]
    async fn test_pre_bound_is_exact_match_filter() {
        let (source, desc) = fixture(rows3(), false);
        let mut op = IndexScanOperator::new(spec_for(&desc))
            .with_pre_bound(vec![(VarId(11), Value::iri("uri:class"))]);

        op.open().await.unwrap();
        let rows = drain(&mut op).await;

        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row[1], Binding::Bound(Value::iri("uri:class")));
        }

        // The push-down reached the source translated to index space.
        let seen = source.seen_pre_bound.lock().unwrap();
        assert_eq!(seen[0], vec![(VarId(1), Value::iri("uri:class"))]);
    }

    #[tokio::test]
    async fn test_pre_bound_for_foreign_var_is_ignored() {
        let (source, desc) = fixture(rows3(), false);
        let mut op = IndexScanOperator::new(spec_for(&desc))
            .with_pre_bound(vec![(VarId(99), Value::Long(1))]);

        op.open().await.unwrap();
        assert_eq!(drain(&mut op).await.len(), 3);
        assert!(source.seen_pre_bound.lock().unwrap()[0].is_empty());
    }

    #[tokio::test]
    async fn test_residual_filter_applied_during_scan() {
        let (_, desc) = fixture(rows3(), false);
        let spec = IndexScanSpec::new(
            Arc::clone(&desc),
            vec![(VarId(0), VarId(10)), (VarId(1), VarId(11))],
            desc.pattern().patterns().to_vec(),
        )
        .with_residual(FilterExpr::compare_const(
            CompareOp::Ne,
            VarId(10),
            Value::iri("uri:entity2"),
        ));
        let mut op = IndexScanOperator::new(Arc::new(spec));

        op.open().await.unwrap();
        let rows = drain(&mut op).await;
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_rescan_after_close() {
        let (_, desc) = fixture(rows3(), false);
        let mut op = IndexScanOperator::new(spec_for(&desc));

        op.open().await.unwrap();
        assert_eq!(drain(&mut op).await.len(), 3);
        op.close();

        op.rebind(vec![(VarId(11), Value::iri("uri:class2"))]).unwrap();
        op.open().await.unwrap();
        assert_eq!(drain(&mut op).await.len(), 1);
    }

    #[tokio::test]
    async fn test_next_batch_requires_open() {
        let (_, desc) = fixture(rows3(), false);
        let mut op = IndexScanOperator::new(spec_for(&desc));
        assert!(matches!(
            op.next_batch().await,
            Err(PcjError::OperatorNotOpened)
        ));

        op.open().await.unwrap();
        op.close();
        assert!(matches!(op.next_batch().await, Err(PcjError::OperatorClosed)));
    }

    #[tokio::test]
    async fn test_source_failure_propagates() {
        let (_, desc) = fixture(rows3(), true);
        let mut op = IndexScanOperator::new(spec_for(&desc));
        assert!(matches!(op.open().await, Err(PcjError::Scan(_))));
    }

    #[tokio::test]
    async fn test_row_width_mismatch_is_scan_error() {
        let (_, desc) = fixture(vec![vec![Value::Long(1)]], false);
        let mut op = IndexScanOperator::new(spec_for(&desc));
        op.open().await.unwrap();
        assert!(matches!(op.next_batch().await, Err(PcjError::Scan(_))));
    }
}
