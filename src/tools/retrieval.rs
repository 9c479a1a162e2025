//! Retrieval Tool
//!
//! Client for the external document-retrieval service. The service answers
//! a natural-language question with the passages it grounded the answer on;
//! the tool hands both back so the stage can cite context directly.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::types::PipelineTool;

/// Answer contract of the retrieval service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalAnswer {
    pub context: String,
    pub answer: String,
}

#[async_trait]
pub trait RetrievalClient: Send + Sync {
    async fn retrieve(&self, question: &str) -> anyhow::Result<RetrievalAnswer>;
}

/// Talks to an HTTP retrieval endpoint that accepts `{"question": ...}` and
/// responds with the [`RetrievalAnswer`] shape.
pub struct HttpRetrievalClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRetrievalClient {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl RetrievalClient for HttpRetrievalClient {
    async fn retrieve(&self, question: &str) -> anyhow::Result<RetrievalAnswer> {
        debug!(endpoint = %self.endpoint, "querying retrieval service");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "question": question }))
            .send()
            .await
            .context("Retrieval request failed")?
            .error_for_status()
            .context("Retrieval service returned an error status")?;

        response
            .json::<RetrievalAnswer>()
            .await
            .context("Failed to parse retrieval response")
    }
}

pub struct RetrievalTool {
    client: Arc<dyn RetrievalClient>,
}

impl RetrievalTool {
    pub fn new(client: Arc<dyn RetrievalClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PipelineTool for RetrievalTool {
    fn name(&self) -> &str {
        "retrieve"
    }

    fn description(&self) -> &str {
        "Answer a question from the internal document corpus. Returns the \
         grounding context alongside the answer."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" }
            },
            "required": ["question"]
        })
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        let question = args["question"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'question' argument"))?;
        let answer = self.client.retrieve(question).await?;
        Ok(serde_json::to_value(answer)?)
    }
}
