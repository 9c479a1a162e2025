//! Tool System
//!
//! The registry maps tool names to capabilities; the dispatcher invokes one
//! request under a timeout and always comes back with a `ToolOutcome` --
//! unknown tools, timeouts, and capability failures are folded into the
//! outcome's error text rather than crossing this boundary as panics or
//! errors.

pub mod retrieval;
pub mod sql;
pub mod web;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::types::{PipelineTool, ToolDefinition, ToolDefinitionFunction, ToolOutcome, ToolRequest};

/// Named capability set, supplied once at startup and immutable thereafter.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn PipelineTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn PipelineTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn PipelineTool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Inference-format definitions for a stage's allowed subset, in the
    /// order the stage declares them. Unknown names are skipped.
    pub fn definitions(&self, allowed: &[String]) -> Vec<ToolDefinition> {
        allowed
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition {
                def_type: "function".to_string(),
                function: ToolDefinitionFunction {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters(),
                },
            })
            .collect()
    }
}

/// Execute one tool request. Exactly one outcome per request, always.
pub async fn dispatch(
    registry: &ToolRegistry,
    request: &ToolRequest,
    timeout: Duration,
) -> ToolOutcome {
    let started = Instant::now();

    let Some(tool) = registry.get(&request.name) else {
        let err = ToolError::Unknown {
            name: request.name.clone(),
        };
        warn!(tool = %request.name, "dispatch to unknown tool");
        return error_outcome(request, err.to_string(), started);
    };

    debug!(tool = %request.name, "dispatching tool call");
    let invocation = tool.invoke(request.arguments.clone());

    match tokio::time::timeout(timeout, invocation).await {
        Ok(Ok(value)) => ToolOutcome {
            correlation_id: request.correlation_id.clone(),
            name: request.name.clone(),
            result: canonical_text(value),
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
        },
        Ok(Err(err)) => {
            let err = ToolError::Failed {
                name: request.name.clone(),
                // {:#} keeps the whole context chain in one line
                message: format!("{:#}", err),
            };
            warn!(tool = %request.name, error = %err, "tool call failed");
            error_outcome(request, err.to_string(), started)
        }
        Err(_) => {
            let err = ToolError::Timeout {
                name: request.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            };
            warn!(tool = %request.name, "tool call timed out");
            error_outcome(request, err.to_string(), started)
        }
    }
}

fn error_outcome(request: &ToolRequest, error: String, started: Instant) -> ToolOutcome {
    ToolOutcome {
        correlation_id: request.correlation_id.clone(),
        name: request.name.clone(),
        result: String::new(),
        error: Some(error),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Flatten a tool's JSON result to the text form stages consume. Strings
/// pass through; everything else is serialized with serde_json's map
/// ordering, which is stable across runs.
fn canonical_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
