//! Pipeline Stages
//!
//! A stage is one reasoning step in the graph: a system instruction, an
//! inference binding, and the subset of tools it may call. Routing after a
//! stage's turn is a pure function of the assistant message it produced.

use std::sync::Arc;

use tracing::debug;

use crate::error::EngineError;
use crate::graph::state::ConversationState;
use crate::tools::ToolRegistry;
use crate::types::{ChatMessage, InferenceClient, InferenceOptions};

/// Where control flows once a stage finishes its tool loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Next {
    Stage(String),
    End,
}

pub struct StageNode {
    pub name: String,
    pub instruction: String,
    pub client: Arc<dyn InferenceClient>,
    /// Tool names this stage may call, in the order they are offered to
    /// the model. Empty means a pure reasoning stage.
    pub allowed_tools: Vec<String>,
    pub next: Next,
}

/// Routing decision after an assistant turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// The message declared tool requests; run them and revisit the stage.
    Tools,
    /// No tool requests; the stage is done.
    Advance,
}

/// Decide routing from the assistant message alone. A missing or empty
/// `tool_calls` list advances; anything the response parser could not turn
/// into requests has already been normalized to `None` upstream, so a
/// malformed declaration also advances rather than wedging the run.
pub fn should_continue(message: &ChatMessage) -> Route {
    match &message.tool_calls {
        Some(calls) if !calls.is_empty() => Route::Tools,
        _ => Route::Advance,
    }
}

/// Run one inference turn for a stage and append the assistant message to
/// the state. Exactly one message is appended per call.
pub async fn run_stage_turn(
    stage: &StageNode,
    registry: &ToolRegistry,
    state: &mut ConversationState,
    max_tokens: Option<u32>,
) -> Result<ChatMessage, EngineError> {
    let mut messages = Vec::with_capacity(state.len() + 1);
    messages.push(ChatMessage::system(stage.instruction.clone()));
    messages.extend_from_slice(state.messages());

    let tools = if stage.allowed_tools.is_empty() {
        None
    } else {
        Some(registry.definitions(&stage.allowed_tools))
    };
    let options = InferenceOptions {
        max_tokens,
        temperature: None,
        tools,
    };

    debug!(stage = %stage.name, transcript_len = state.len(), "running stage turn");
    let response = stage
        .client
        .chat(messages, Some(options))
        .await
        .map_err(|err| EngineError::Inference {
            stage: stage.name.clone(),
            message: format!("{:#}", err),
        })?;

    let message = response.message;
    state.push(message.clone());
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolRequest;
    use serde_json::json;

    fn assistant(tool_calls: Option<Vec<ToolRequest>>) -> ChatMessage {
        ChatMessage::assistant("content", tool_calls)
    }

    #[test]
    fn test_route_tools_when_requests_present() {
        let msg = assistant(Some(vec![ToolRequest {
            correlation_id: "tc_1".to_string(),
            name: "sql_query".to_string(),
            arguments: json!({ "query": "SELECT 1" }),
        }]));
        assert_eq!(should_continue(&msg), Route::Tools);
    }

    #[test]
    fn test_route_advance_when_no_requests() {
        assert_eq!(should_continue(&assistant(None)), Route::Advance);
    }

    #[test]
    fn test_route_advance_on_empty_request_list() {
        assert_eq!(should_continue(&assistant(Some(vec![]))), Route::Advance);
    }
}
