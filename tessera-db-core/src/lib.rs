//! Core data model for the Tessera RDF store.
//!
//! This crate carries the types shared by the query layers:
//! - [`Value`]: RDF term values (IRIs and literals)
//! - [`VarId`] / [`VarRegistry`]: compact per-query variable identifiers
//! - [`StatementPattern`] / [`PatternGraph`]: triple patterns and pattern sets
//! - [`Binding`] / [`Batch`]: solution rows and columnar batches

pub mod binding;
pub mod error;
pub mod pattern;
pub mod value;
pub mod var_registry;

pub use binding::{Batch, BatchError, Binding, RowView};
pub use error::{CoreError, Result};
pub use pattern::{PatternGraph, PatternId, StatementPattern, Term};
pub use value::Value;
pub use var_registry::{VarId, VarRegistry};
