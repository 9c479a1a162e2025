//! Query Guardrail
//!
//! Validates and safely executes read-only queries against the tabular
//! store. Every caller-supplied query is validated fail-closed, capped with
//! an implicit row limit, and run on an immutable connection.

pub mod store;
pub mod validate;

pub use store::{ColumnInfo, QueryResult, ReadOnlyStore, TableSchema};
pub use validate::{check_query, validate_query, wrap_with_limit, CheckReport};
