//! Consilium - Type Definitions
//!
//! Shared types for the reasoning-graph pipeline: chat messages, tool
//! requests and outcomes, and the capability traits bound at the seams.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─── Chat Messages ───────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolRequest>>) -> Self {
        ChatMessage {
            role: ChatRole::Assistant,
            content: content.into(),
            name: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool result message, linked back to its request by correlation id.
    pub fn tool(outcome: &ToolOutcome) -> Self {
        let content = match outcome.error {
            Some(ref err) => format!("TOOL ERROR: {}", err),
            None => outcome.result.clone(),
        };
        ChatMessage {
            role: ChatRole::Tool,
            content,
            name: Some(outcome.name.clone()),
            tool_calls: None,
            tool_call_id: Some(outcome.correlation_id.clone()),
        }
    }

    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

// ─── Tool Requests & Outcomes ────────────────────────────────────

/// A declared intent to call a tool, extracted from an assistant message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    /// Links the eventual outcome back to this request.
    pub correlation_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The result of dispatching one `ToolRequest`. Exactly one outcome is
/// produced per request; a failed call carries its error text here rather
/// than propagating an exception.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    pub correlation_id: String,
    pub name: String,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

// ─── Inference ───────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResponse {
    pub id: String,
    pub model: String,
    pub message: ChatMessage,
    pub usage: TokenUsage,
    pub finish_reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InferenceOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
}

/// OpenAI-compatible function-tool definition handed to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub def_type: String,
    pub function: ToolDefinitionFunction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinitionFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A reasoning capability: one chat completion per call. Stages hold their
/// own binding, so different stages can use different models without the
/// executor changing.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: Option<InferenceOptions>,
    ) -> anyhow::Result<InferenceResponse>;
}

// ─── Tools ───────────────────────────────────────────────────────

/// A named external capability the pipeline can invoke. Implementations
/// return a JSON value; the dispatcher flattens it to text before it is
/// appended to the conversation.
#[async_trait]
pub trait PipelineTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> serde_json::Value;

    async fn invoke(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}
