//! Inference Client
//!
//! Client for an OpenAI-compatible /v1/chat/completions endpoint. The
//! response parser is deliberately tolerant: a malformed tool_calls block
//! is treated as no tool requests at all, so a confused model response
//! routes the run forward instead of wedging it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::types::{
    ChatMessage, ChatRole, InferenceClient, InferenceOptions, InferenceResponse, TokenUsage,
    ToolRequest,
};

pub struct ChatCompletionsClient {
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    http: Client,
}

impl ChatCompletionsClient {
    pub fn new(
        api_url: String,
        api_key: String,
        model: String,
        max_tokens: u32,
        request_timeout: std::time::Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            api_url,
            api_key,
            model,
            max_tokens,
            http,
        })
    }
}

/// Convert a chat message to the wire shape. Tool request arguments travel
/// as a JSON-encoded string on this API.
fn format_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    };
    let mut out = serde_json::json!({
        "role": role,
        "content": message.content,
    });
    if let Some(name) = &message.name {
        out["name"] = serde_json::json!(name);
    }
    if let Some(id) = &message.tool_call_id {
        out["tool_call_id"] = serde_json::json!(id);
    }
    if let Some(calls) = &message.tool_calls {
        if !calls.is_empty() {
            let wire: Vec<Value> = calls
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.correlation_id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        },
                    })
                })
                .collect();
            out["tool_calls"] = Value::Array(wire);
        }
    }
    out
}

/// Extract tool requests from a response message. Returns `None` when the
/// block is missing, not an array, or empty. An entry with unparseable
/// arguments keeps its name and id with an empty-object argument set.
fn parse_tool_requests(message: &Value) -> Option<Vec<ToolRequest>> {
    let calls = message["tool_calls"].as_array()?;
    let requests: Vec<ToolRequest> = calls
        .iter()
        .filter_map(|tc| {
            let name = tc["function"]["name"].as_str()?;
            let arguments = tc["function"]["arguments"]
                .as_str()
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_else(|| serde_json::json!({}));
            // an id is synthesized when the model omits one, so the
            // outcome can still be linked back on the wire
            let correlation_id = match tc["id"].as_str().filter(|s| !s.is_empty()) {
                Some(id) => id.to_string(),
                None => format!("call_{}", uuid::Uuid::new_v4()),
            };
            Some(ToolRequest {
                correlation_id,
                name: name.to_string(),
                arguments,
            })
        })
        .collect();
    if requests.is_empty() {
        None
    } else {
        Some(requests)
    }
}

#[async_trait]
impl InferenceClient for ChatCompletionsClient {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: Option<InferenceOptions>,
    ) -> Result<InferenceResponse> {
        let token_limit = options
            .as_ref()
            .and_then(|o| o.max_tokens)
            .unwrap_or(self.max_tokens);

        let formatted: Vec<Value> = messages.iter().map(format_message).collect();
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": formatted,
            "max_tokens": token_limit,
            "stream": false,
        });
        if let Some(ref opts) = options {
            if let Some(temp) = opts.temperature {
                body["temperature"] = serde_json::json!(temp);
            }
            if let Some(tools) = opts.tools.as_ref().filter(|t| !t.is_empty()) {
                body["tools"] = serde_json::json!(tools);
                body["tool_choice"] = serde_json::json!("auto");
            }
        }

        let url = format!("{}/v1/chat/completions", self.api_url);
        debug!(model = %self.model, messages = messages.len(), "sending chat completion");
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("Inference request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Inference error: {}: {}", status.as_u16(), text);
        }

        let data: Value = resp
            .json()
            .await
            .context("Failed to parse inference response")?;

        let choice = data["choices"]
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("No completion choice returned from inference"))?;
        let message = &choice["message"];

        let response_message = ChatMessage {
            role: ChatRole::Assistant,
            content: message["content"].as_str().unwrap_or("").to_string(),
            name: None,
            tool_calls: parse_tool_requests(message),
            tool_call_id: None,
        };

        Ok(InferenceResponse {
            id: data["id"].as_str().unwrap_or("").to_string(),
            model: data["model"].as_str().unwrap_or(&self.model).to_string(),
            message: response_message,
            usage: TokenUsage {
                prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
                completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0),
                total_tokens: data["usage"]["total_tokens"].as_u64().unwrap_or(0),
            },
            finish_reason: choice["finish_reason"].as_str().unwrap_or("stop").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tool_requests_happy_path() {
        let message = json!({
            "tool_calls": [
                {
                    "id": "tc_1",
                    "type": "function",
                    "function": { "name": "sql_query", "arguments": "{\"query\":\"SELECT 1\"}" }
                }
            ]
        });
        let requests = parse_tool_requests(&message).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].correlation_id, "tc_1");
        assert_eq!(requests[0].arguments["query"], json!("SELECT 1"));
    }

    #[test]
    fn test_parse_tool_requests_malformed_block_is_none() {
        assert!(parse_tool_requests(&json!({ "tool_calls": "not an array" })).is_none());
        assert!(parse_tool_requests(&json!({ "tool_calls": [] })).is_none());
        assert!(parse_tool_requests(&json!({})).is_none());
    }

    #[test]
    fn test_parse_tool_requests_bad_arguments_default_to_empty_object() {
        let message = json!({
            "tool_calls": [
                {
                    "id": "tc_1",
                    "function": { "name": "fetch", "arguments": "{oops" }
                }
            ]
        });
        let requests = parse_tool_requests(&message).unwrap();
        assert_eq!(requests[0].arguments, json!({}));
    }

    #[test]
    fn test_parse_tool_requests_synthesizes_missing_id() {
        let message = json!({
            "tool_calls": [
                { "function": { "name": "fetch", "arguments": "{}" } },
                { "id": "", "function": { "name": "fetch", "arguments": "{}" } }
            ]
        });
        let requests = parse_tool_requests(&message).unwrap();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            assert!(request.correlation_id.starts_with("call_"));
            assert!(request.correlation_id.len() > "call_".len());
        }
    }

    #[test]
    fn test_parse_tool_requests_skips_nameless_entries() {
        let message = json!({
            "tool_calls": [
                { "id": "tc_1", "function": { "arguments": "{}" } }
            ]
        });
        assert!(parse_tool_requests(&message).is_none());
    }

    #[test]
    fn test_format_assistant_message_with_tool_calls() {
        let msg = ChatMessage::assistant(
            "",
            Some(vec![ToolRequest {
                correlation_id: "tc_9".to_string(),
                name: "web_search".to_string(),
                arguments: json!({ "query": "rust" }),
            }]),
        );
        let wire = format_message(&msg);
        assert_eq!(wire["role"], json!("assistant"));
        assert_eq!(wire["tool_calls"][0]["id"], json!("tc_9"));
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"],
            json!("{\"query\":\"rust\"}")
        );
    }

    #[test]
    fn test_format_tool_message_carries_link_fields() {
        let outcome = crate::types::ToolOutcome {
            correlation_id: "tc_9".to_string(),
            name: "web_search".to_string(),
            result: "{\"urls\":[]}".to_string(),
            error: None,
            duration_ms: 3,
        };
        let wire = format_message(&ChatMessage::tool(&outcome));
        assert_eq!(wire["role"], json!("tool"));
        assert_eq!(wire["name"], json!("web_search"));
        assert_eq!(wire["tool_call_id"], json!("tc_9"));
    }
}
