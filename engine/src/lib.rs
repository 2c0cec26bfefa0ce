//! # Gurglefish Engine
//!
//! Pure mapping and transformation logic for the Gurglefish mirror.
//!
//! This crate knows how a remote sobject's field list becomes a local
//! relational schema, and how a remote record becomes a typed row. It has no
//! IO: no HTTP, no database, no files. Everything here is deterministic and
//! unit-testable in isolation; the `gurglefish-sync` crate supplies the
//! drivers around it.
//!
//! ## Core Concepts
//!
//! ### Field descriptors
//!
//! [`SObjectFields`] is the ingested shape of a remote describe document:
//! fields unique by lower-cased name, `address` compounds dropped (their
//! constituent scalars are separate fields).
//!
//! ### Column mapping
//!
//! [`map_column`] turns one [`FieldDescriptor`] into at most one
//! [`ColumnMap`]: the SQL type fragment, the effective truncation length,
//! and the remote/local name pair. Unknown remote types fail loudly.
//!
//! ### Transform recipes
//!
//! Instead of generated per-sobject code, a transformer is a persisted,
//! ordered list of [`RecipeEntry`] steps applied through a fixed dispatch
//! table. [`Transformer::parse`] yields a [`TransformedRow`] of typed
//! [`CellValue`] cells, the unit of change detection and DML binding.
//!
//! ### SOQL and export encoding
//!
//! [`soql`] builds the persisted SELECT and the inclusive watermark clause;
//! [`export`] encodes transformed rows as the tab-delimited stream the
//! database's COPY path accepts back.

pub mod error;
pub mod export;
pub mod mapper;
pub mod sobject;
pub mod soql;
pub mod transform;

// Re-export main types at crate root
pub use error::Error;
pub use mapper::{map_column, ColumnMap};
pub use sobject::{FieldDescriptor, SObjectFields, SObjectSummary};
pub use transform::{
    canonical_id, epoch_millis_to_iso, CellValue, RecipeEntry, TransformKind, TransformedRow,
    Transformer,
};

/// Type aliases for clarity
pub type SObjectName = String;
pub type ColumnName = String;
