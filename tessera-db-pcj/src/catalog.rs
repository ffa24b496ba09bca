//! Index catalog: descriptors for available precomputed join results
//!
//! The maintenance layer that creates and populates precomputed indexes lives
//! outside this crate. It hands the optimizer a list of [`PcjSource`]s; the
//! optimizer captures them in an owned [`IndexCatalog`] snapshot at the start
//! of each pass, so indexes added or dropped mid-pass are never consulted.
//! A dropped index is only discovered at scan time, as a scan error that the
//! executor recovers from by evaluating the raw patterns instead.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tessera_db_core::{PatternGraph, Value, VarId};

/// Identifier of one precomputed index
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexId(Arc<str>);

impl IndexId {
    /// Create a new index id
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// The id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IndexId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Chunked cursor over a precomputed result set
///
/// Rows are in the source's own variable space: one [`Value`] per exported
/// variable of the source's pattern graph, in `pattern().exported()` order.
/// Materialized join results bind every exported variable, so rows carry
/// values, not optional bindings.
#[async_trait]
pub trait PcjCursor: Send {
    /// Pull the next chunk of rows, or None when exhausted
    ///
    /// Storage failures (connectivity, decode, index dropped mid-scan)
    /// surface as errors; they are never silently treated as end-of-scan.
    async fn next_chunk(&mut self) -> Result<Option<Vec<Vec<Value>>>>;
}

/// A precomputed join result set, scannable by the executor
///
/// Implementations are backed by whatever store the maintenance layer chose;
/// this crate does not know or care. All methods other than `scan` must be
/// cheap and infallible: they describe the index, captured at registration.
#[async_trait]
pub trait PcjSource: Send + Sync {
    /// Identifier of this index
    fn id(&self) -> &IndexId;

    /// The pattern graph this index materializes
    fn pattern(&self) -> &PatternGraph;

    /// Estimated row count, if the store tracks one
    ///
    /// Used only to order sibling scans at a join; never to reject a match.
    fn cardinality(&self) -> Option<u64> {
        None
    }

    /// Start a scan, optionally constrained by pre-bound variable values
    ///
    /// `pre_bound` pairs are in this source's variable space. The source may
    /// use them to prune storage reads, but the caller re-checks them
    /// row-by-row, so a source that ignores `pre_bound` is still correct.
    async fn scan(&self, pre_bound: &[(VarId, Value)]) -> Result<Box<dyn PcjCursor>>;
}

/// Immutable descriptor for one catalog entry
///
/// Snapshots the source's identity and pattern graph at capture time. The
/// scan capability stays live through the `Arc`; if the underlying index is
/// dropped out-of-band, scans fail rather than serve stale results.
#[derive(Clone)]
pub struct IndexDescriptor {
    id: IndexId,
    pattern: Arc<PatternGraph>,
    cardinality: Option<u64>,
    source: Arc<dyn PcjSource>,
}

impl IndexDescriptor {
    /// Capture a descriptor from a source
    pub fn from_source(source: Arc<dyn PcjSource>) -> Self {
        Self {
            id: source.id().clone(),
            pattern: Arc::new(source.pattern().clone()),
            cardinality: source.cardinality(),
            source,
        }
    }

    /// Identifier of the index
    pub fn id(&self) -> &IndexId {
        &self.id
    }

    /// The pattern graph the index materializes
    pub fn pattern(&self) -> &PatternGraph {
        &self.pattern
    }

    /// Estimated row count at capture time
    pub fn cardinality(&self) -> Option<u64> {
        self.cardinality
    }

    /// The scan capability
    pub fn source(&self) -> &Arc<dyn PcjSource> {
        &self.source
    }
}

impl fmt::Debug for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDescriptor")
            .field("id", &self.id)
            .field("patterns", &self.pattern.len())
            .field("cardinality", &self.cardinality)
            .finish()
    }
}

/// Owned snapshot of the available indexes
///
/// Captured once per optimization pass. Order is the caller's registration
/// order and doubles as the default priority order for the selector.
#[derive(Clone, Debug, Default)]
pub struct IndexCatalog {
    descriptors: Vec<Arc<IndexDescriptor>>,
}

impl IndexCatalog {
    /// Capture a snapshot from an ordered list of sources
    pub fn snapshot(sources: impl IntoIterator<Item = Arc<dyn PcjSource>>) -> Self {
        Self {
            descriptors: sources
                .into_iter()
                .map(|s| Arc::new(IndexDescriptor::from_source(s)))
                .collect(),
        }
    }

    /// Build a catalog from already-captured descriptors
    pub fn from_descriptors(descriptors: Vec<Arc<IndexDescriptor>>) -> Self {
        Self { descriptors }
    }

    /// The descriptors in priority order
    pub fn descriptors(&self) -> &[Arc<IndexDescriptor>] {
        &self.descriptors
    }

    /// Look up a descriptor by id
    pub fn get(&self, id: &IndexId) -> Option<&Arc<IndexDescriptor>> {
        self.descriptors.iter().find(|d| d.id() == id)
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
