//! Run Persistence
//!
//! SQLite-backed storage for finished pipeline runs: transcripts, stage
//! summaries, and terminal statuses.

mod database;
mod schema;

pub use database::{RunRecord, RunStore};
pub use schema::{CREATE_TABLES, SCHEMA_VERSION};
