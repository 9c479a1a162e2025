//! Error Types
//!
//! Each layer carries its own error enum so callers can branch on kind
//! instead of substring-matching message text.

use thiserror::Error;

/// Errors raised by the read-only query guardrail.
#[derive(Debug, Error)]
pub enum GuardrailError {
    /// The query was rejected before touching the store.
    #[error("validation failed: {}", violations.join("; "))]
    Validation { violations: Vec<String> },

    /// The query passed validation but failed at runtime.
    /// Carries the underlying SQLite message verbatim.
    #[error("execution error: {message}")]
    Execution { message: String },

    /// The store file could not be opened read-only.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

/// Errors produced while dispatching a tool call. These never cross the
/// dispatcher boundary as `Err`; they are flattened into the outcome's
/// error text so the calling stage can react.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {name}")]
    Unknown { name: String },

    #[error("tool {name} timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("tool {name} failed: {message}")]
    Failed { name: String, message: String },
}

/// Fatal engine faults. These indicate a configuration problem, not a data
/// problem, and abort the run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown stage: {stage}")]
    UnknownStage { stage: String },

    #[error("graph has no stages")]
    EmptyGraph,

    #[error("inference failed in stage {stage}: {message}")]
    Inference { stage: String, message: String },
}
