//! In-memory PCJ store
//!
//! A minimal [`PcjSource`] backend for tests and embedded use: indexes are
//! registered with their pattern graph and fully-materialized rows, scanned
//! in chunks, and can be dropped to exercise the invalidation contract - a
//! scan against a dropped index fails, it never serves stale rows.

use crate::catalog::{IndexCatalog, IndexId, PcjCursor, PcjSource};
use crate::error::{PcjError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tessera_db_core::{PatternGraph, Value, VarId};

const DEFAULT_CHUNK_SIZE: usize = 1024;

/// One registered in-memory index
///
/// Rows hold one value per exported variable of the pattern graph, in export
/// order.
#[derive(Debug)]
pub struct MemoryPcjIndex {
    id: IndexId,
    pattern: PatternGraph,
    rows: Vec<Vec<Value>>,
    chunk_size: usize,
    dropped: AtomicBool,
}

impl MemoryPcjIndex {
    /// Number of materialized rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the index holds no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl PcjSource for MemoryPcjIndex {
    fn id(&self) -> &IndexId {
        &self.id
    }

    fn pattern(&self) -> &PatternGraph {
        &self.pattern
    }

    fn cardinality(&self) -> Option<u64> {
        Some(self.rows.len() as u64)
    }

    async fn scan(&self, pre_bound: &[(VarId, Value)]) -> Result<Box<dyn PcjCursor>> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(PcjError::IndexDropped(self.id.clone()));
        }

        // Pre-bound pruning at the source; the scan operator re-checks.
        let positions: Vec<(usize, &Value)> = pre_bound
            .iter()
            .filter_map(|(var, val)| {
                self.pattern
                    .exported()
                    .iter()
                    .position(|v| v == var)
                    .map(|col| (col, val))
            })
            .collect();

        let selected: Vec<Vec<Value>> = self
            .rows
            .iter()
            .filter(|row| positions.iter().all(|(col, val)| &&row[*col] == val))
            .cloned()
            .collect();

        let chunks = selected
            .chunks(self.chunk_size.max(1))
            .map(|c| c.to_vec())
            .collect();
        Ok(Box::new(MemoryCursor { chunks }))
    }
}

struct MemoryCursor {
    chunks: VecDeque<Vec<Vec<Value>>>,
}

#[async_trait]
impl PcjCursor for MemoryCursor {
    async fn next_chunk(&mut self) -> Result<Option<Vec<Vec<Value>>>> {
        Ok(self.chunks.pop_front())
    }
}

/// Registry of in-memory indexes
///
/// Registration order is preserved and becomes the catalog's default
/// priority order.
#[derive(Default)]
pub struct MemoryPcjStore {
    indexes: RwLock<Vec<Arc<MemoryPcjIndex>>>,
}

impl MemoryPcjStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an index with its materialized rows
    ///
    /// Each row must hold one value per exported variable of `pattern`, in
    /// export order.
    pub fn register(
        &self,
        id: IndexId,
        pattern: PatternGraph,
        rows: Vec<Vec<Value>>,
    ) -> Result<Arc<MemoryPcjIndex>> {
        if pattern.is_empty() {
            return Err(PcjError::Core(
                tessera_db_core::CoreError::EmptyPatternGraph,
            ));
        }
        let width = pattern.exported().len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(PcjError::invariant(format!(
                "index {id} row width {} does not match {width} exported variables",
                bad.len()
            )));
        }

        let mut indexes = self.indexes.write().expect("store lock poisoned");
        if indexes.iter().any(|idx| idx.id == id) {
            return Err(PcjError::invariant(format!(
                "index {id} is already registered"
            )));
        }

        let index = Arc::new(MemoryPcjIndex {
            id,
            pattern,
            rows,
            chunk_size: DEFAULT_CHUNK_SIZE,
            dropped: AtomicBool::new(false),
        });
        indexes.push(Arc::clone(&index));
        Ok(index)
    }

    /// Drop an index: remove it from the store and fail its future scans
    ///
    /// Returns false when the id is unknown. Optimizations holding an older
    /// catalog snapshot discover the drop as a scan error.
    pub fn drop_index(&self, id: &IndexId) -> bool {
        let mut indexes = self.indexes.write().expect("store lock poisoned");
        match indexes.iter().position(|idx| &idx.id == id) {
            Some(pos) => {
                let index = indexes.remove(pos);
                index.dropped.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Snapshot the live indexes as an optimizer catalog
    pub fn catalog(&self) -> IndexCatalog {
        let indexes = self.indexes.read().expect("store lock poisoned");
        IndexCatalog::snapshot(
            indexes
                .iter()
                .map(|idx| Arc::clone(idx) as Arc<dyn PcjSource>)
                .collect::<Vec<_>>(),
        )
    }
}
