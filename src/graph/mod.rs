//! Reasoning Graph
//!
//! The stage-graph executor: append-only conversation state, stage nodes
//! with static routing, and the engine that drives a run to a terminal
//! status.

pub mod engine;
pub mod stage;
pub mod state;

pub use engine::{GraphEngine, PipelineGraph, RunReport, RunStatus};
pub use stage::{should_continue, Next, Route, StageNode};
pub use state::ConversationState;
