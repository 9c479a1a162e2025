//! Consilium -- Consulting Pipeline Runtime
//!
//! A staged reasoning pipeline over an OpenAI-compatible inference API:
//! internal baseline from a guarded KPI store, competitor discovery and
//! benchmarking from the web, and a final synthesized plan.

pub mod config;
pub mod error;
pub mod graph;
pub mod guardrail;
pub mod llm;
pub mod pipeline;
pub mod state;
pub mod tools;
pub mod types;
